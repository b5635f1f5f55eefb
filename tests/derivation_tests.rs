//! # Derivation Tests
//!
//! End-to-end behaviour of the derivation engine: every edit is applied and
//! then settled, the way a caller finishing one field at a time would.

use batch_formulation::batch_model::{BatchFormulation, QuantityField};
use batch_formulation::derivation::{apply, settle, settle_pending, Advisory, Edit, EditContext, Transition};

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("value should be set");
    assert!(
        (actual - expected).abs() <= 0.01,
        "expected {expected}, got {actual}"
    );
}

/// Applies edits one after another, settling each one
struct Harness {
    state: BatchFormulation,
    context: EditContext,
}

impl Harness {
    fn new() -> Self {
        Self {
            state: BatchFormulation::new(),
            context: EditContext::new(),
        }
    }

    fn manual(unit_weight: &str, count: &str) -> Self {
        let mut harness = Self::new();
        harness.step(Edit::SetBatchName("Test batch".into()));
        harness.step(Edit::SetUnitWeight(unit_weight.into()));
        harness.step(Edit::SetUnitCount(count.into()));
        harness
    }

    fn auto(unit_weight: &str) -> Self {
        let mut harness = Self::new();
        harness.step(Edit::SetBatchName("Auto batch".into()));
        harness.step(Edit::SetUnitWeight(unit_weight.into()));
        harness.step(Edit::ToggleAutoMode(true));
        harness
    }

    fn apply(&mut self, edit: Edit) -> Transition {
        let transition = apply(&self.state, &self.context, &edit);
        self.state = transition.state.clone();
        self.context = transition.context.clone();
        transition
    }

    fn settle(&mut self) -> Transition {
        let transition = settle_pending(&self.state, &self.context);
        self.state = transition.state.clone();
        self.context = transition.context.clone();
        transition
    }

    fn step(&mut self, edit: Edit) -> Vec<Advisory> {
        let mut advisories = self.apply(edit).advisories;
        advisories.extend(self.settle().advisories);
        advisories
    }

    fn set(&mut self, index: usize, field: QuantityField, raw: &str) -> Vec<Advisory> {
        self.step(Edit::quantity(index, field, raw))
    }
}

#[test]
fn test_manual_weight_per_unit_derives_total_and_percentage() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::WeightPerUnit, "25");

    let sugar = &h.state.ingredients[1];
    assert_close(sugar.total_weight, 250.0);
    assert_close(sugar.percentage, 25.0);
    assert_eq!(sugar.authority, QuantityField::WeightPerUnit);
    assert_eq!(h.state.total_batch_weight, 1000.0);
}

#[test]
fn test_manual_free_ingredient_takes_remainder() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::Percentage, "20");
    h.set(2, QuantityField::WeightPerUnit, "15");
    h.set(3, QuantityField::TotalWeight, "100");

    let free = &h.state.ingredients[0];
    assert_close(free.percentage, 55.0);
    assert_close(free.total_weight, 550.0);
    assert_close(free.weight_per_unit, 55.0);

    assert_close(h.state.ingredients[3].weight_per_unit, 10.0);
    assert_close(h.state.ingredients[3].percentage, 10.0);
}

#[test]
fn test_free_ingredient_clamps_at_zero_and_flags_overflow() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::Percentage, "80");
    let advisories = h.set(2, QuantityField::Percentage, "30");

    let free = &h.state.ingredients[0];
    assert_close(free.percentage, 0.0);
    assert_close(free.total_weight, 0.0);
    assert!(advisories
        .iter()
        .any(|a| matches!(a, Advisory::PercentageSumOverflow { total } if (*total - 110.0).abs() < 0.01)));
}

#[test]
fn test_single_ingredient_over_hundred_percent() {
    let mut h = Harness::manual("100", "10");
    let advisories = h.set(1, QuantityField::Percentage, "120");

    assert!(advisories.contains(&Advisory::PercentageOverflow {
        index: 1,
        percentage: 120.0
    }));
}

#[test]
fn test_clearing_authority_field_clears_row() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::Percentage, "30");
    h.set(1, QuantityField::Percentage, "");

    let row = &h.state.ingredients[1];
    assert!(row.is_blank());
    assert_close(h.state.ingredients[0].percentage, 100.0);
    assert_close(h.state.ingredients[0].total_weight, 1000.0);
}

#[test]
fn test_unparseable_input_counts_as_cleared() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::Percentage, "30");
    h.set(1, QuantityField::Percentage, "abc");

    assert!(h.state.ingredients[1].is_blank());
}

#[test]
fn test_clearing_derived_field_refills_on_settle() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::Percentage, "30");

    h.apply(Edit::quantity(1, QuantityField::TotalWeight, ""));
    assert_eq!(h.state.ingredients[1].total_weight, None);
    assert_eq!(h.state.ingredients[1].percentage, Some(30.0));

    h.settle();
    assert_close(h.state.ingredients[1].total_weight, 300.0);
}

#[test]
fn test_reassigning_free_ingredient_keeps_previous_values() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::Percentage, "30");
    assert_close(h.state.ingredients[0].percentage, 70.0);

    h.step(Edit::SetFreeIngredient(2));

    let previous = &h.state.ingredients[0];
    assert_eq!(h.state.free_ingredient_index, 2);
    assert_eq!(previous.authority, QuantityField::WeightPerUnit);
    assert_close(previous.weight_per_unit, 70.0);
    assert_close(previous.percentage, 70.0);
    assert_close(previous.total_weight, 700.0);

    assert_close(h.state.ingredients[2].percentage, 0.0);
}

#[test]
fn test_locked_fields_are_ignored() {
    let mut h = Harness::manual("100", "10");
    let before = h.state.clone();
    let advisories = h.set(0, QuantityField::TotalWeight, "500");

    assert_eq!(h.state, before);
    assert!(advisories.contains(&Advisory::LockedField {
        index: 0,
        field: QuantityField::TotalWeight
    }));

    let mut auto = Harness::auto("100");
    let advisories = auto.set(0, QuantityField::Percentage, "50");
    assert!(advisories.contains(&Advisory::LockedField {
        index: 0,
        field: QuantityField::Percentage
    }));
    assert_close(auto.state.ingredients[0].percentage, 100.0);
}

#[test]
fn test_unknown_ingredient() {
    let mut h = Harness::manual("100", "10");
    let advisories = h.set(42, QuantityField::Percentage, "5");
    assert!(advisories.contains(&Advisory::UnknownIngredient { index: 42 }));
}

#[test]
fn test_unit_count_ignored_in_auto_mode() {
    let mut h = Harness::auto("100");
    let advisories = h.step(Edit::SetUnitCount("12".into()));
    assert!(advisories.iter().any(|a| matches!(a, Advisory::IgnoredInMode { .. })));
    assert_eq!(h.state.unit_count, Some(1.0));
}

#[test]
fn test_auto_weight_per_unit_solves_cycle() {
    let mut h = Harness::auto("100");
    h.set(0, QuantityField::TotalWeight, "50");
    assert_eq!(h.state.unit_count, Some(0.5));

    let applied = h.apply(Edit::quantity(1, QuantityField::WeightPerUnit, "25"));
    assert_close(applied.state.ingredients[1].total_weight, 16.67);
    assert_close(Some(applied.state.total_batch_weight), 66.67);

    h.settle();
    let base = &h.state.ingredients[0];
    let added = &h.state.ingredients[1];
    assert_close(Some(h.state.total_batch_weight), 66.67);
    assert_close(added.total_weight, 16.67);
    assert_close(added.percentage, 25.0);
    assert_close(base.weight_per_unit, 75.0);
    assert_close(base.percentage, 75.0);
    assert_close(Some(h.state.percentage_sum()), 100.0);
}

#[test]
fn test_auto_total_weight_edit_sums_ingredients() {
    let mut h = Harness::auto("100");
    h.set(0, QuantityField::TotalWeight, "200");
    h.set(1, QuantityField::TotalWeight, "50");

    assert_eq!(h.state.total_batch_weight, 250.0);
    assert_eq!(h.state.unit_count, Some(2.5));
    assert_close(h.state.ingredients[0].percentage, 80.0);
    assert_close(h.state.ingredients[1].weight_per_unit, 20.0);
    assert_close(h.state.ingredients[1].percentage, 20.0);
}

#[test]
fn test_auto_percentage_edit_settles_to_hundred() {
    let mut h = Harness::auto("100");
    h.set(0, QuantityField::TotalWeight, "50");
    h.set(1, QuantityField::WeightPerUnit, "25");

    let applied = h.apply(Edit::quantity(2, QuantityField::Percentage, "10"));
    assert_close(applied.state.ingredients[2].total_weight, 6.67);

    let settled = h.settle();
    assert_close(Some(h.state.total_batch_weight), 76.92);
    assert_close(h.state.ingredients[0].percentage, 65.0);
    assert_close(h.state.ingredients[2].weight_per_unit, 10.0);
    assert_close(Some(h.state.percentage_sum()), 100.0);
    assert!(!settled.advisories.iter().any(|a| matches!(
        a,
        Advisory::PercentageSumOverflow { .. } | Advisory::PercentageSumMismatch { .. }
    )));
}

#[test]
fn test_settle_is_idempotent() {
    let mut h = Harness::auto("100");
    h.set(0, QuantityField::TotalWeight, "50");
    h.set(1, QuantityField::WeightPerUnit, "25");
    let settled = h.state.clone();

    h.step(Edit::SetUnitWeight("100".into()));
    assert_eq!(h.state, settled);
}

#[test]
fn test_unresolvable_auto_batch_is_flagged() {
    let mut h = Harness::auto("100");
    h.set(0, QuantityField::TotalWeight, "");
    let advisories = h.set(1, QuantityField::WeightPerUnit, "25");

    assert!(advisories.contains(&Advisory::UnresolvedBatchWeight));
    assert_eq!(h.state.unit_count, Some(1.0));
}

#[test]
fn test_typed_weight_per_unit_survives_other_edits() {
    let mut h = Harness::auto("100");
    h.set(0, QuantityField::TotalWeight, "50");
    h.set(1, QuantityField::WeightPerUnit, "25");
    h.set(1, QuantityField::Percentage, "30");

    let row = &h.state.ingredients[1];
    assert_eq!(row.authority, QuantityField::Percentage);
    assert!(row.weight_per_unit_pinned);
    let per_unit = row.weight_per_unit;
    assert_close(row.percentage, per_unit.unwrap_or(0.0));

    // the unit count moves, the typed amount per unit does not
    h.set(0, QuantityField::TotalWeight, "100");
    assert_ne!(h.state.unit_count, Some(0.67));
    assert_eq!(h.state.ingredients[1].weight_per_unit, per_unit);

    h.set(1, QuantityField::WeightPerUnit, "");
    let row = &h.state.ingredients[1];
    assert!(!row.weight_per_unit_pinned);
    assert_eq!(row.authority, QuantityField::Percentage);
    assert!(row.weight_per_unit.is_some());
}

#[test]
fn test_auto_unit_count_from_batch_weight() {
    let mut h = Harness::auto("50");
    h.set(0, QuantityField::TotalWeight, "250");

    let advisories = h.step(Edit::SetTotalBatchWeight(250.0));
    assert!(!advisories.iter().any(|a| matches!(a, Advisory::BatchWeightMismatch { .. })));
    assert_eq!(h.state.unit_count, Some(5.0));
    assert_eq!(h.state.total_batch_weight, 250.0);
    assert_close(h.state.ingredients[0].weight_per_unit, 50.0);
}

#[test]
fn test_batch_weight_off_the_ingredient_sum_lasts_until_settled() {
    let mut h = Harness::auto("50");
    assert_eq!(h.state.total_batch_weight, 50.0);

    let applied = h.apply(Edit::SetTotalBatchWeight(250.0));
    assert_eq!(applied.state.unit_count, Some(5.0));
    assert!(applied.advisories.contains(&Advisory::BatchWeightMismatch {
        requested: 250.0,
        ingredients: 50.0,
    }));

    let settled = h.settle();
    assert_eq!(h.state.total_batch_weight, 50.0);
    assert_eq!(h.state.unit_count, Some(1.0));
    assert_close(h.state.ingredients[0].percentage, 100.0);
    assert!(!settled.advisories.iter().any(|a| matches!(a, Advisory::BatchWeightMismatch { .. })));
}

#[test]
fn test_batch_weight_ignored_in_manual_mode() {
    let mut h = Harness::manual("50", "4");
    let advisories = h.step(Edit::SetTotalBatchWeight(250.0));

    assert!(advisories.contains(&Advisory::IgnoredInMode {
        edit: "set-total-batch-weight".into()
    }));
    assert_eq!(h.state.total_batch_weight, 200.0);
}

fn assert_all_finite(batch: &BatchFormulation) {
    assert!(batch.total_batch_weight.is_finite(), "batch weight {}", batch.total_batch_weight);
    for ingredient in &batch.ingredients {
        for value in [ingredient.weight_per_unit, ingredient.percentage, ingredient.total_weight]
            .into_iter()
            .flatten()
        {
            assert!(value.is_finite(), "{ingredient:?}");
        }
    }
}

#[test]
fn test_vanishing_unit_weight_is_unset() {
    let tiny = format!("0.{}1", "0".repeat(309));
    let mut h = Harness::manual(&tiny, "2");
    h.set(1, QuantityField::WeightPerUnit, "10");

    let row = &h.state.ingredients[1];
    assert_eq!(row.percentage, None);
    assert_eq!(row.total_weight, Some(20.0));
    assert_all_finite(&h.state);
}

#[test]
fn test_overflowing_batch_weight_is_not_stored() {
    let huge = format!("1{}", "0".repeat(200));
    let mut h = Harness::manual(&huge, &huge);
    h.set(1, QuantityField::Percentage, "10");

    assert_eq!(h.state.total_batch_weight, 0.0);
    assert_all_finite(&h.state);
}

#[test]
fn test_leaving_auto_mode_keeps_last_total() {
    let mut h = Harness::auto("100");
    h.set(0, QuantityField::TotalWeight, "50");
    h.set(1, QuantityField::WeightPerUnit, "25");
    h.step(Edit::ToggleAutoMode(false));

    assert_eq!(h.state.unit_count, None);
    assert_eq!(h.state.total_batch_weight, 67.0);
}

#[test]
fn test_superseded_settle_is_ignored() {
    let mut h = Harness::manual("100", "10");
    let first = h.apply(Edit::quantity(1, QuantityField::Percentage, "1"));
    let first_token = first.context.pending_settle.expect("first settle pending");
    let second = h.apply(Edit::quantity(1, QuantityField::Percentage, "12"));
    let second_token = second.context.pending_settle.expect("second settle pending");
    assert_ne!(first_token.id, second_token.id);

    let stale = settle(&h.state, &h.context, &first_token);
    assert_eq!(stale.state, h.state);
    assert!(stale.advisories.contains(&Advisory::StaleSettle { token: first_token.id }));

    let fresh = settle(&h.state, &h.context, &second_token);
    assert!(fresh.context.pending_settle.is_none());
    assert!(fresh.context.active.is_none());
    assert_close(fresh.state.ingredients[1].total_weight, 120.0);
}

#[test]
fn test_active_row_left_alone_until_settled() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::Percentage, "30");

    let applied = h.apply(Edit::quantity(1, QuantityField::TotalWeight, "200"));
    assert!(applied.context.is_active(1, QuantityField::TotalWeight));
    assert_close(applied.state.ingredients[1].percentage, 20.0);
    assert_close(applied.state.ingredients[0].percentage, 80.0);
}

#[test]
fn test_name_edits_do_not_schedule_settle() {
    let state = BatchFormulation::new();
    let transition = apply(&state, &EditContext::new(), &Edit::name(0, "cocoa butter"));

    assert_eq!(transition.state.ingredients[0].name, "cocoa butter");
    assert!(transition.context.pending_settle.is_none());
}

#[test]
fn test_reset_returns_to_empty_batch() {
    let mut h = Harness::manual("100", "10");
    h.set(1, QuantityField::Percentage, "30");
    h.step(Edit::Reset);

    assert_eq!(h.state, BatchFormulation::new());
    assert!(h.context.pending_settle.is_none());
}
