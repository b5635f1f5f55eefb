//! # Derivation Engine
//!
//! Keeps the three quantities of every ingredient and the batch totals
//! consistent after each edit.
//!
//! ## Model
//!
//! - Every ingredient has exactly one authority field; the other two are
//!   always derived from it plus the batch context (unit weight, unit count,
//!   total batch weight). Derivation never flows between two derived fields.
//! - [`apply`] performs the immediate update for one edit and a recompute
//!   pass that leaves the row being typed into alone.
//! - [`settle`] runs the full recompute once the edit is finished. It is
//!   keyed by a [`SettleToken`]; a newer edit supersedes an older token.
//!
//! Both are pure: `(state, context, edit) -> (state', context', advisories)`.
//!
//! ## Modes
//!
//! In `Manual` mode the unit count is typed in, the batch weight is
//! `unit count x unit weight`, and the free ingredient takes whatever the other
//! rows leave over. In `Auto` mode the batch weight is the sum of the
//! ingredient weights and the unit count follows from it, which makes weight
//! per unit edits circular; those are solved in closed form.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auto_mode;
use crate::batch_model::{BatchFormulation, Ingredient, IngredientField, QuantityField};
use crate::numeric_input::{
    finite, is_effectively_zero, parse_quantity, positive, round2, round_whole, EPSILON,
};

/// Smallest unit count `Auto` mode will derive
pub const MIN_AUTO_UNIT_COUNT: f64 = 0.01;

/// Tolerance when comparing percentage sums against 100
pub const PERCENTAGE_SUM_TOLERANCE: f64 = 0.05;

/// Grams a requested batch weight may differ from the ingredient sum
pub const BATCH_WEIGHT_TOLERANCE: f64 = 0.01;

/// One edit event
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Raw text typed into an ingredient field (grams for weights)
    SetIngredientField {
        index: usize,
        field: IngredientField,
        raw: String,
    },
    SetUnitWeight(String),
    SetUnitCount(String),
    /// `Auto` mode only: batch weight the unit count is re-derived from.
    ///
    /// Meant to carry the ingredient sum. The next settle replaces it with the
    /// weight the rows resolve to, so a value that differs from the sum only
    /// lasts until then and is reported with [`Advisory::BatchWeightMismatch`].
    SetTotalBatchWeight(f64),
    ToggleAutoMode(bool),
    SetFreeIngredient(usize),
    SetBatchName(String),
    AddIngredient,
    RemoveIngredient(usize),
    Reset,
    /// Replace the snapshot wholesale, e.g. with a stored batch
    Load(Box<BatchFormulation>),
}

impl Edit {
    /// Edit of one quantity of an ingredient
    pub fn quantity(index: usize, field: QuantityField, raw: &str) -> Self {
        Edit::SetIngredientField {
            index,
            field: IngredientField::Quantity(field),
            raw: raw.to_string(),
        }
    }

    /// Edit of an ingredient name
    pub fn name(index: usize, name: &str) -> Self {
        Edit::SetIngredientField {
            index,
            field: IngredientField::Name,
            raw: name.to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Edit::SetIngredientField { .. } => "set-ingredient-field",
            Edit::SetUnitWeight(_) => "set-unit-weight",
            Edit::SetUnitCount(_) => "set-unit-count",
            Edit::SetTotalBatchWeight(_) => "set-total-batch-weight",
            Edit::ToggleAutoMode(_) => "toggle-auto-mode",
            Edit::SetFreeIngredient(_) => "set-free-ingredient",
            Edit::SetBatchName(_) => "set-batch-name",
            Edit::AddIngredient => "add-ingredient",
            Edit::RemoveIngredient(_) => "remove-ingredient",
            Edit::Reset => "reset",
            Edit::Load(_) => "load",
        }
    }
}

/// A quantity field of one ingredient row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub index: usize,
    pub field: QuantityField,
}

/// What a pending settle pass was scheduled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettleTarget {
    Field(FieldRef),
    Batch,
}

/// Handle for one pending settle pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleToken {
    pub id: u64,
    pub target: SettleTarget,
}

/// Edit bookkeeping passed alongside the snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditContext {
    /// Field the user is typing into; recompute passes leave its row alone
    pub active: Option<FieldRef>,
    /// The only settle pass still worth running
    pub pending_settle: Option<SettleToken>,
    issued: u64,
}

impl EditContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row currently being edited
    pub fn active_index(&self) -> Option<usize> {
        self.active.map(|field| field.index)
    }

    pub fn is_active(&self, index: usize, field: QuantityField) -> bool {
        self.active == Some(FieldRef { index, field })
    }

    /// Issue a new token, superseding any pending one
    fn schedule(&mut self, target: SettleTarget) -> SettleToken {
        self.issued += 1;
        let token = SettleToken { id: self.issued, target };
        if let Some(stale) = self.pending_settle.replace(token) {
            debug!("Settle {} superseded by {}", stale.id, token.id);
        }
        token
    }

    /// Forget the active edit and any pending settle; token ids keep counting
    fn clear(&mut self) {
        self.active = None;
        self.pending_settle = None;
    }
}

/// Non-fatal conditions reported to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Advisory {
    /// A single ingredient exceeds 100% of the unit weight
    PercentageOverflow { index: usize, percentage: f64 },
    /// All ingredients together exceed 100%
    PercentageSumOverflow { total: f64 },
    /// `Auto` mode percentages do not add up to 100% until the edit settles
    PercentageSumMismatch { total: f64 },
    /// The field is derived in the current mode and cannot be edited
    LockedField { index: usize, field: QuantityField },
    UnknownIngredient { index: usize },
    /// The edit has no meaning in the current unit count mode
    IgnoredInMode { edit: String },
    /// `Auto` mode could not derive a batch weight; the unit count was kept
    UnresolvedBatchWeight,
    /// A requested batch weight differs from the ingredient sum that settling restores
    BatchWeightMismatch { requested: f64, ingredients: f64 },
    /// A settle token was superseded by a newer edit
    StaleSettle { token: u64 },
}

impl Advisory {
    /// The edit itself was refused, as opposed to a flag on the resulting state
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Advisory::LockedField { .. } | Advisory::UnknownIngredient { .. } | Advisory::IgnoredInMode { .. }
        )
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::PercentageOverflow { index, percentage } => {
                write!(f, "Ingredient #{} exceeds 100% ({percentage:.2}%)", index + 1)
            }
            Advisory::PercentageSumOverflow { total } => {
                write!(f, "Ingredients add up to {total:.2}%, more than 100%")
            }
            Advisory::PercentageSumMismatch { total } => {
                write!(f, "Ingredients add up to {total:.2}% until the edit settles")
            }
            Advisory::LockedField { index, field } => {
                write!(f, "The {field} of ingredient #{} is calculated automatically", index + 1)
            }
            Advisory::UnknownIngredient { index } => {
                write!(f, "There is no ingredient #{}", index + 1)
            }
            Advisory::IgnoredInMode { edit } => {
                write!(f, "'{edit}' does not apply in the current unit count mode")
            }
            Advisory::UnresolvedBatchWeight => {
                write!(f, "The batch weight cannot be derived from these ingredients")
            }
            Advisory::BatchWeightMismatch { requested, ingredients } => write!(
                f,
                "Batch weight {requested:.2} g differs from the ingredients' {ingredients:.2} g until the edit settles"
            ),
            Advisory::StaleSettle { token } => write!(f, "Settle {token} was superseded"),
        }
    }
}

/// Result of one engine pass
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: BatchFormulation,
    pub context: EditContext,
    pub advisories: Vec<Advisory>,
}

/// Batch figures a row's derived fields are computed from
#[derive(Debug, Clone, Copy)]
struct Basis {
    unit_weight: Option<f64>,
    unit_count: Option<f64>,
    batch_weight: Option<f64>,
}

/// Exact (unrounded) values of all three quantities of a row
#[derive(Debug, Clone, Copy, Default)]
struct Derived {
    weight_per_unit: Option<f64>,
    percentage: Option<f64>,
    total_weight: Option<f64>,
}

impl Derived {
    fn get(&self, field: QuantityField) -> Option<f64> {
        match field {
            QuantityField::WeightPerUnit => self.weight_per_unit,
            QuantityField::Percentage => self.percentage,
            QuantityField::TotalWeight => self.total_weight,
        }
    }
}

/// Derive the other two quantities from one authoritative value
fn derive_from(field: QuantityField, value: f64, basis: &Basis) -> Derived {
    match field {
        QuantityField::WeightPerUnit => Derived {
            weight_per_unit: Some(value),
            total_weight: basis.unit_count.map(|count| value * count),
            percentage: basis.unit_weight.map(|weight| value / weight * 100.0),
        },
        QuantityField::Percentage => {
            let total_weight = basis.batch_weight.map(|batch| value / 100.0 * batch);
            Derived {
                percentage: Some(value),
                weight_per_unit: total_weight.zip(basis.unit_count).map(|(total, count)| total / count),
                total_weight,
            }
        }
        QuantityField::TotalWeight => {
            let weight_per_unit = basis.unit_count.map(|count| value / count);
            Derived {
                total_weight: Some(value),
                percentage: weight_per_unit
                    .zip(basis.unit_weight)
                    .map(|(per_unit, weight)| per_unit / weight * 100.0),
                weight_per_unit,
            }
        }
    }
}

/// Write rounded derived values into every field except `keep`
///
/// Values that could not be derived, or overflowed, leave the previous value
/// in place.
fn store_derived(ingredient: &mut Ingredient, derived: &Derived, keep: QuantityField) {
    for field in QuantityField::ALL {
        if field == keep {
            continue;
        }
        if let Some(value) = derived.get(field).and_then(finite) {
            ingredient.set(field, Some(round2(value)));
        }
    }
}

/// Store a batch weight; an overflowed weight leaves the previous one in place
fn store_batch_weight(batch: &mut BatchFormulation, weight: f64) {
    match finite(weight) {
        Some(weight) => batch.total_batch_weight = round2(weight),
        None => warn!("Batch weight overflowed, keeping {} g", batch.total_batch_weight),
    }
}

/// Apply one edit to a snapshot
///
/// Never fails: unparseable input clears the field, impossible edits leave the
/// snapshot untouched and report an [`Advisory`].
pub fn apply(state: &BatchFormulation, context: &EditContext, edit: &Edit) -> Transition {
    let mut next = state.clone();
    let mut ctx = context.clone();
    let mut advisories = Vec::new();

    debug!("Applying {}", edit.label());

    match edit {
        Edit::SetIngredientField { index, field, raw } => {
            edit_ingredient(&mut next, &mut ctx, *index, *field, raw, &mut advisories);
        }
        Edit::SetUnitWeight(raw) => {
            next.unit_weight = parse_quantity(raw);
            ctx.schedule(SettleTarget::Batch);
            recompute(&mut next, ctx.active_index());
        }
        Edit::SetUnitCount(raw) => {
            if next.is_auto() {
                advisories.push(ignored(edit));
            } else {
                next.unit_count = parse_quantity(raw);
                ctx.schedule(SettleTarget::Batch);
                recompute(&mut next, ctx.active_index());
            }
        }
        Edit::SetTotalBatchWeight(weight) => {
            if !next.is_auto() {
                advisories.push(ignored(edit));
            } else if let Some(weight) = finite(weight.max(0.0)) {
                let ingredients = next.ingredient_weight_sum();
                if (weight - ingredients).abs() > BATCH_WEIGHT_TOLERANCE {
                    debug!("Batch weight {} g set against an ingredient sum of {} g", weight, ingredients);
                    advisories.push(Advisory::BatchWeightMismatch {
                        requested: round2(weight),
                        ingredients: round2(ingredients),
                    });
                }
                next.total_batch_weight = round2(weight);
                ctx.schedule(SettleTarget::Batch);
                reseed_auto(&mut next, ctx.active_index());
            } else {
                warn!("Ignoring batch weight {}", weight);
            }
        }
        Edit::ToggleAutoMode(enabled) => {
            next = auto_mode::set_auto_mode(&next, *enabled);
            ctx.active = None;
            ctx.schedule(SettleTarget::Batch);
            recompute(&mut next, None);
        }
        Edit::SetFreeIngredient(index) => {
            if next.is_auto() {
                advisories.push(ignored(edit));
            } else if *index >= next.ingredients.len() {
                advisories.push(Advisory::UnknownIngredient { index: *index });
            } else if *index != next.free_ingredient_index {
                next = auto_mode::set_free_ingredient(&next, *index);
                ctx.schedule(SettleTarget::Batch);
                recompute(&mut next, ctx.active_index());
            }
        }
        Edit::SetBatchName(name) => {
            next.name = name.clone();
        }
        Edit::AddIngredient => {
            next = auto_mode::add_ingredient(&next);
        }
        Edit::RemoveIngredient(index) => {
            if *index >= next.ingredients.len() {
                advisories.push(Advisory::UnknownIngredient { index: *index });
            } else if next.ingredients.len() > 1 {
                next = auto_mode::remove_ingredient(&next, *index);
                ctx.active = match ctx.active {
                    Some(active) if active.index == *index => None,
                    Some(active) if active.index > *index => Some(FieldRef {
                        index: active.index - 1,
                        field: active.field,
                    }),
                    other => other,
                };
                if next.is_auto() {
                    let sum = next.ingredient_weight_sum();
                    store_batch_weight(&mut next, sum);
                }
                ctx.schedule(SettleTarget::Batch);
                recompute(&mut next, ctx.active_index());
            }
        }
        Edit::Reset => {
            next = auto_mode::reset();
            ctx.clear();
        }
        Edit::Load(batch) => {
            next = auto_mode::normalize_loaded((**batch).clone());
            ctx.clear();
        }
    }

    collect_advisories(&next, &mut advisories);
    Transition { state: next, context: ctx, advisories }
}

/// Run the full recompute for a pending settle token
///
/// A token that is no longer the pending one was superseded: the snapshot is
/// returned as is with a [`Advisory::StaleSettle`].
pub fn settle(state: &BatchFormulation, context: &EditContext, token: &SettleToken) -> Transition {
    if context.pending_settle.map(|pending| pending.id) != Some(token.id) {
        debug!("Ignoring stale settle {}", token.id);
        return Transition {
            state: state.clone(),
            context: context.clone(),
            advisories: vec![Advisory::StaleSettle { token: token.id }],
        };
    }

    let mut next = state.clone();
    let mut ctx = context.clone();
    let mut advisories = Vec::new();
    ctx.clear();

    if next.is_auto() {
        settle_auto(&mut next, &mut advisories);
    } else {
        recompute_manual(&mut next, None);
    }

    collect_advisories(&next, &mut advisories);
    Transition { state: next, context: ctx, advisories }
}

/// Settle whatever is pending; without a pending token only the active marker is cleared
pub fn settle_pending(state: &BatchFormulation, context: &EditContext) -> Transition {
    match context.pending_settle {
        Some(token) => settle(state, context, &token),
        None => {
            let mut ctx = context.clone();
            ctx.active = None;
            let mut advisories = Vec::new();
            collect_advisories(state, &mut advisories);
            Transition { state: state.clone(), context: ctx, advisories }
        }
    }
}

fn ignored(edit: &Edit) -> Advisory {
    Advisory::IgnoredInMode { edit: edit.label().to_string() }
}

fn edit_ingredient(
    batch: &mut BatchFormulation,
    ctx: &mut EditContext,
    index: usize,
    field: IngredientField,
    raw: &str,
    advisories: &mut Vec<Advisory>,
) {
    if index >= batch.ingredients.len() {
        advisories.push(Advisory::UnknownIngredient { index });
        return;
    }

    let quantity = match field {
        IngredientField::Name => {
            batch.ingredients[index].name = raw.to_string();
            return;
        }
        IngredientField::Quantity(quantity) => quantity,
    };

    if batch.is_locked(index, field) {
        warn!("Ingredient #{} {} is derived, edit ignored", index + 1, quantity);
        advisories.push(Advisory::LockedField { index, field: quantity });
        return;
    }

    let target = FieldRef { index, field: quantity };
    ctx.active = Some(target);
    ctx.schedule(SettleTarget::Field(target));

    match parse_quantity(raw) {
        None => clear_quantity(batch, index, quantity),
        Some(value) => {
            let ingredient = &mut batch.ingredients[index];
            ingredient.set(quantity, Some(value));
            ingredient.authority = quantity;
            if quantity == QuantityField::WeightPerUnit {
                ingredient.weight_per_unit_pinned = true;
            }

            if batch.is_auto() {
                derive_auto_edit(batch, index, quantity, value);
            } else {
                derive_manual_edit(batch, index, quantity, value);
            }
        }
    }

    recompute(batch, Some(index));
}

/// Clear one field; clearing the authority field clears the whole row
fn clear_quantity(batch: &mut BatchFormulation, index: usize, field: QuantityField) {
    let ingredient = &mut batch.ingredients[index];
    ingredient.set(field, None);
    if field == QuantityField::WeightPerUnit {
        ingredient.weight_per_unit_pinned = false;
    }
    if ingredient.authority == field {
        ingredient.clear_quantities();
        debug!("Cleared calculated values for ingredient #{} after {} was deleted", index + 1, field);
    }

    if batch.is_auto() {
        let sum = batch.ingredient_weight_sum();
        store_batch_weight(batch, sum);
    }
}

fn manual_basis(batch: &BatchFormulation) -> Basis {
    let unit_weight = batch.unit_weight_value();
    let unit_count = batch.unit_count_value();
    let batch_weight = match (unit_count, unit_weight) {
        (Some(count), Some(weight)) => finite(count * weight),
        _ => positive(Some(batch.total_batch_weight)),
    };
    Basis { unit_weight, unit_count, batch_weight }
}

fn derive_manual_edit(batch: &mut BatchFormulation, index: usize, field: QuantityField, value: f64) {
    let basis = manual_basis(batch);
    let mut derived = derive_from(field, value, &basis);
    if field == QuantityField::Percentage && derived.weight_per_unit.is_none() {
        derived.weight_per_unit = Some(0.0);
    }
    store_derived(&mut batch.ingredients[index], &derived, field);
}

fn derive_auto_edit(batch: &mut BatchFormulation, index: usize, field: QuantityField, value: f64) {
    let unit_weight = batch.unit_weight_value();
    let unit_count = batch.unit_count_value();
    let others: f64 = batch
        .ingredients
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .filter_map(|(_, ingredient)| ingredient.total_weight)
        .sum();

    match field {
        QuantityField::WeightPerUnit => {
            let Some(unit_weight) = unit_weight else {
                return;
            };
            let Some(total_weight) = finite(solve_weight_for_per_unit(value, others, unit_weight)) else {
                warn!("Weight per unit {} on #{} overflowed the batch weight", value, index + 1);
                return;
            };
            debug!(
                "Auto weight per unit {} on #{}: others {:.2} g, solved {:.4} g",
                value,
                index + 1,
                others,
                total_weight
            );

            let ingredient = &mut batch.ingredients[index];
            if let Some(percentage) = finite(value / unit_weight * 100.0) {
                ingredient.percentage = Some(round2(percentage));
            }
            ingredient.total_weight = Some(round2(total_weight));
            store_batch_weight(batch, others + total_weight);
        }
        QuantityField::Percentage => {
            // Uses the current batch weight rather than re-solving against the
            // other rows, so percentages may not sum to 100 until settled.
            let current = batch.total_batch_weight;
            if current <= 0.0 {
                warn!("Cannot derive ingredient weight from a percentage with no batch weight");
                return;
            }
            let Some(total_weight) = finite(value / 100.0 * current) else {
                warn!("Percentage {} on #{} overflowed the ingredient weight", value, index + 1);
                return;
            };
            let ingredient = &mut batch.ingredients[index];
            ingredient.total_weight = Some(round2(total_weight));
            if let Some(count) = unit_count {
                ingredient.weight_per_unit = Some(round2(total_weight / count));
            }
        }
        QuantityField::TotalWeight => {
            store_batch_weight(batch, others + value);
            let basis = Basis { unit_weight, unit_count, batch_weight: None };
            let derived = derive_from(QuantityField::TotalWeight, value, &basis);
            store_derived(&mut batch.ingredients[index], &derived, QuantityField::TotalWeight);
        }
    }
}

/// Total weight an ingredient needs so that, next to `others` grams of other
/// ingredients, it comes to `target` grams per unit of `unit_weight`
///
/// From `target = x / ((others + x) / unit_weight)`:
/// `x = target * others / (unit_weight - target)`. When the target is the
/// whole unit the ingredient is the entire batch. Never negative.
pub fn solve_weight_for_per_unit(target: f64, others: f64, unit_weight: f64) -> f64 {
    let solved = if !is_effectively_zero(unit_weight - target) {
        target * others / (unit_weight - target)
    } else if target > 0.0 {
        target * (others / target + 1.0)
    } else {
        0.0
    };
    solved.max(0.0)
}

/// Batch-level pass run after each edit; `skip` is the row being typed into
fn recompute(batch: &mut BatchFormulation, skip: Option<usize>) {
    if batch.is_auto() {
        reseed_auto(batch, skip);
    } else {
        recompute_manual(batch, skip);
    }
}

/// `Manual` mode: refresh every row from its authority field and hand the
/// remainder to the free ingredient
fn recompute_manual(batch: &mut BatchFormulation, skip: Option<usize>) {
    let (Some(count), Some(unit_weight)) = (batch.unit_count_value(), batch.unit_weight_value()) else {
        return;
    };
    let Some(batch_weight) = finite(count * unit_weight) else {
        warn!("Batch weight of {} units of {} g overflowed", count, unit_weight);
        return;
    };
    batch.total_batch_weight = round_whole(batch_weight);

    let basis = Basis {
        unit_weight: Some(unit_weight),
        unit_count: Some(count),
        batch_weight: Some(batch_weight),
    };
    let free = batch.free_ingredient_index;
    let mut percentage_used = 0.0;
    let mut weight_used = 0.0;

    for (i, ingredient) in batch.ingredients.iter_mut().enumerate() {
        if i == free {
            continue;
        }
        let authority = ingredient.authority;
        let Some(value) = ingredient.authority_value().filter(|v| *v >= 0.0) else {
            continue;
        };
        let derived = derive_from(authority, value, &basis);
        percentage_used += derived.percentage.unwrap_or(0.0);
        weight_used += derived.total_weight.unwrap_or(0.0);

        if skip != Some(i) {
            store_derived(ingredient, &derived, authority);
        }
    }

    if skip == Some(free) {
        return;
    }
    if let Some(remainder) = batch.ingredients.get_mut(free) {
        let total_weight = (batch_weight - weight_used).max(0.0);
        remainder.percentage = Some(round2((100.0 - percentage_used).max(0.0)));
        remainder.total_weight = Some(round2(total_weight));
        remainder.weight_per_unit = Some(round2(total_weight / count));
    }
}

/// Derived unit count for a batch weight
fn auto_unit_count(batch_weight: f64, unit_weight: f64) -> f64 {
    (batch_weight / unit_weight).max(MIN_AUTO_UNIT_COUNT)
}

/// `Auto` mode: derive the unit count from the current batch weight and carry
/// it into every row
fn reseed_auto(batch: &mut BatchFormulation, skip: Option<usize>) {
    let Some(unit_weight) = batch.unit_weight_value() else {
        return;
    };
    if batch.total_batch_weight <= 0.0 {
        return;
    }

    let Some(count) = finite(auto_unit_count(batch.total_batch_weight, unit_weight)).map(round2) else {
        return;
    };
    if batch.unit_count != Some(count) {
        info!(
            "Auto-updating unit count: {:?} -> {} (batch weight {}, unit weight {})",
            batch.unit_count, count, batch.total_batch_weight, unit_weight
        );
    }
    batch.unit_count = Some(count);

    let basis = Basis {
        unit_weight: Some(unit_weight),
        unit_count: Some(count),
        batch_weight: None,
    };
    for (i, ingredient) in batch.ingredients.iter_mut().enumerate() {
        if skip == Some(i) {
            continue;
        }
        if ingredient.keeps_weight_per_unit() {
            if let Some(per_unit) = positive(ingredient.weight_per_unit) {
                let derived = derive_from(QuantityField::WeightPerUnit, per_unit, &basis);
                store_derived(ingredient, &derived, QuantityField::WeightPerUnit);
            }
        } else if let Some(total_weight) = positive(ingredient.total_weight) {
            let mut derived = derive_from(QuantityField::TotalWeight, total_weight, &basis);
            if ingredient.authority != QuantityField::TotalWeight {
                derived.percentage = None;
            }
            store_derived(ingredient, &derived, QuantityField::TotalWeight);
        }
    }
}

/// `Auto` mode settle: find the batch weight at which the re-seed pass changes
/// nothing.
///
/// With `F` grams fixed by total-weight rows, `W` grams per unit fixed by
/// weight-per-unit rows and a share `P` fixed by percentage rows, the batch
/// weight `T` satisfies `T = F + W * T / unit_weight + P * T`, so
/// `T = F / (1 - W / unit_weight - P)`.
fn settle_auto(batch: &mut BatchFormulation, advisories: &mut Vec<Advisory>) {
    let Some(unit_weight) = batch.unit_weight_value() else {
        return;
    };

    let mut fixed_weight = 0.0;
    let mut per_unit_weight = 0.0;
    let mut share = 0.0;
    for ingredient in &batch.ingredients {
        if ingredient.keeps_weight_per_unit() {
            per_unit_weight += ingredient.weight_per_unit.unwrap_or(0.0);
        } else if ingredient.authority == QuantityField::TotalWeight {
            fixed_weight += ingredient.total_weight.unwrap_or(0.0);
        } else {
            share += ingredient.percentage.unwrap_or(0.0) / 100.0;
        }
    }

    let denominator = 1.0 - per_unit_weight / unit_weight - share;
    let solved = if fixed_weight > 0.0 && denominator > EPSILON {
        finite(fixed_weight / denominator)
    } else {
        None
    };
    let (count, batch_weight) = if let Some(batch_weight) = solved {
        (auto_unit_count(batch_weight, unit_weight), batch_weight)
    } else {
        if per_unit_weight > 0.0 || share > 0.0 || !fixed_weight.is_finite() {
            warn!(
                "No batch weight satisfies the auto-mode rows (fixed {:.2} g, remaining share {:.4})",
                fixed_weight, denominator
            );
            advisories.push(Advisory::UnresolvedBatchWeight);
        }
        let Some(count) = batch.unit_count_value() else {
            let sum = batch.ingredient_weight_sum();
            store_batch_weight(batch, sum);
            return;
        };
        (count, batch.total_batch_weight)
    };

    let basis = Basis {
        unit_weight: Some(unit_weight),
        unit_count: Some(count),
        batch_weight: positive(Some(batch_weight)),
    };

    let mut summed = 0.0;
    for ingredient in batch.ingredients.iter_mut() {
        let field = if ingredient.keeps_weight_per_unit() {
            QuantityField::WeightPerUnit
        } else {
            ingredient.authority
        };
        let Some(value) = ingredient.get(field).filter(|v| *v >= 0.0) else {
            continue;
        };
        let derived = derive_from(field, value, &basis);
        summed += derived.total_weight.and_then(finite).unwrap_or(0.0);
        store_derived(ingredient, &derived, field);
    }

    batch.unit_count = Some(round2(count));
    store_batch_weight(batch, summed);
    debug!("Auto settle: {:.2} units, {:.2} g", count, summed);
}

fn collect_advisories(batch: &BatchFormulation, advisories: &mut Vec<Advisory>) {
    for (index, ingredient) in batch.ingredients.iter().enumerate() {
        if let Some(percentage) = ingredient.percentage_overflow() {
            advisories.push(Advisory::PercentageOverflow { index, percentage });
        }
    }

    if batch.ingredients.iter().all(|i| i.percentage.is_none()) {
        return;
    }
    let total = round2(batch.percentage_sum());
    if total > 100.0 + PERCENTAGE_SUM_TOLERANCE {
        warn!("Total percentage exceeds 100%: {}", total);
        advisories.push(Advisory::PercentageSumOverflow { total });
    } else if batch.is_auto() && (100.0 - total) > PERCENTAGE_SUM_TOLERANCE {
        advisories.push(Advisory::PercentageSumMismatch { total });
    }
}
