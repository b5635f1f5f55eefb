//! # Auto Mode Controller
//!
//! Structural transitions of a batch: switching between a typed-in and a
//! derived unit count, moving the free ingredient, and adding or removing
//! ingredient rows. Each function takes a snapshot and returns the next one;
//! the derivation engine runs its recompute pass afterwards.

use log::{debug, info};

use crate::batch_model::{
    BatchFormulation, Ingredient, QuantityField, UnitCountMode, BASE_INGREDIENT_INDEX,
};
use crate::numeric_input::{finite, round_whole};

/// Switch between `Manual` and `Auto` unit counting
///
/// Entering `Auto` mode seeds a one-unit batch made entirely of the base
/// ingredient. Without a unit weight the base ingredient gets blank weights
/// instead, so no batch weight appears out of nowhere.
///
/// Leaving `Auto` mode clears the unit count so it has to be typed in again.
/// Requesting the mode the batch is already in returns it unchanged.
pub fn set_auto_mode(state: &BatchFormulation, enabled: bool) -> BatchFormulation {
    let mut next = state.clone();
    if enabled == state.is_auto() {
        debug!("Unit count mode already {:?}, nothing to do", state.unit_count_mode);
        return next;
    }

    if enabled {
        info!("Switching to auto unit count, unit weight: {:?}", state.unit_weight);
        next.unit_count_mode = UnitCountMode::Auto;
        if next.ingredients.is_empty() {
            next.ingredients.push(Ingredient::default());
        }

        let unit_weight = state.unit_weight_value();
        next.total_batch_weight = unit_weight.unwrap_or(0.0);
        next.unit_count = unit_weight.map(|_| 1.0);

        let base = &mut next.ingredients[BASE_INGREDIENT_INDEX];
        base.total_weight = unit_weight;
        base.weight_per_unit = unit_weight;
        base.percentage = Some(100.0);
        base.authority = QuantityField::TotalWeight;
        base.weight_per_unit_pinned = false;
    } else {
        info!("Switching to manual unit count");
        next.unit_count_mode = UnitCountMode::Manual;
        if let (Some(count), Some(unit_weight)) = (state.unit_count_value(), state.unit_weight_value()) {
            if let Some(batch_weight) = finite(count * unit_weight) {
                next.total_batch_weight = round_whole(batch_weight);
            }
        }
        next.unit_count = None;
    }

    next
}

/// Make another ingredient absorb the remainder in `Manual` mode
///
/// The previous free ingredient keeps its last computed amounts: they become
/// its own values, driven by its weight per unit. Out-of-range indices, the
/// current free index and `Auto` mode leave the batch unchanged.
pub fn set_free_ingredient(state: &BatchFormulation, index: usize) -> BatchFormulation {
    let mut next = state.clone();
    if state.is_auto() || index == state.free_ingredient_index || index >= state.ingredients.len() {
        return next;
    }

    let previous = state.free_ingredient_index;
    if let Some(ingredient) = next.ingredients.get_mut(previous) {
        if ingredient.weight_per_unit.is_some() && ingredient.percentage.is_some() {
            ingredient.authority = QuantityField::WeightPerUnit;
            ingredient.weight_per_unit_pinned = true;
        }
    }

    info!("Free ingredient moved from #{} to #{}", previous + 1, index + 1);
    next.free_ingredient_index = index;
    next
}

/// Append a blank ingredient row
pub fn add_ingredient(state: &BatchFormulation) -> BatchFormulation {
    let mut next = state.clone();
    next.ingredients.push(Ingredient::default());
    next
}

/// Remove an ingredient row, keeping the free index on the same ingredient
///
/// The last remaining row is never removed. Removing the free ingredient
/// itself hands the role back to the first row.
pub fn remove_ingredient(state: &BatchFormulation, index: usize) -> BatchFormulation {
    let mut next = state.clone();
    if state.ingredients.len() <= 1 || index >= state.ingredients.len() {
        return next;
    }

    next.ingredients.remove(index);
    if next.free_ingredient_index == index {
        next.free_ingredient_index = 0;
    } else if next.free_ingredient_index > index {
        next.free_ingredient_index -= 1;
    }

    debug!(
        "Removed ingredient #{}, free ingredient is now #{}",
        index + 1,
        next.free_ingredient_index + 1
    );
    next
}

/// A fresh, empty batch
pub fn reset() -> BatchFormulation {
    BatchFormulation::new()
}

/// Bring a loaded snapshot within the structural invariants
pub fn normalize_loaded(mut batch: BatchFormulation) -> BatchFormulation {
    if batch.ingredients.is_empty() {
        batch.ingredients.push(Ingredient::default());
    }
    if batch.free_ingredient_index >= batch.ingredients.len() {
        batch.free_ingredient_index = 0;
    }
    batch
}
