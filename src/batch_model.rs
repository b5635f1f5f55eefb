//! # Batch Formulation Data Model
//!
//! This module defines the data structures describing a production batch: a
//! number of identical units of a fixed weight, made from an ordered list of
//! ingredients.
//!
//! ## Core Concepts
//!
//! - **Ingredient**: a named component whose quantity is held three ways
//!   (weight per unit, percentage of the unit weight, total weight in the batch)
//! - **Authority field**: the one quantity the user drove last; the other two
//!   are derived from it
//! - **Unit count mode**: whether the number of units is typed in (`Manual`) or
//!   derived from the summed ingredient weights (`Auto`)
//! - **Free ingredient**: in `Manual` mode, the ingredient that absorbs whatever
//!   the others leave over
//!
//! ## Usage
//!
//! ```rust
//! use batch_formulation::batch_model::{BatchFormulation, Ingredient, QuantityField};
//!
//! let batch = BatchFormulation::new()
//!     .with_name("Dark 70%")
//!     .with_unit_weight(100.0)
//!     .with_unit_count(10.0);
//!
//! let cocoa = Ingredient::new("cocoa mass").with_quantity(QuantityField::Percentage, 70.0);
//! assert_eq!(cocoa.authority, QuantityField::Percentage);
//! assert!(batch.mandatory_fields_filled());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::numeric_input::EPSILON;

/// Number of blank ingredient rows a fresh batch starts with
pub const DEFAULT_INGREDIENT_SLOTS: usize = 5;

/// Index of the anchor ingredient in `Auto` mode
pub const BASE_INGREDIENT_INDEX: usize = 0;

/// One of the three linked quantities of an ingredient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QuantityField {
    /// Grams of this ingredient in one unit
    #[default]
    WeightPerUnit,
    /// Percent of the unit weight
    Percentage,
    /// Grams of this ingredient in the whole batch
    TotalWeight,
}

/// Any editable field of an ingredient row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngredientField {
    Name,
    Quantity(QuantityField),
}

/// Who decides the number of units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UnitCountMode {
    /// Unit count is typed in; total batch weight follows from it
    #[default]
    Manual,
    /// Unit count follows from the summed ingredient weights
    Auto,
}

fn usable_denominator(value: f64) -> bool {
    value.is_finite() && value > EPSILON
}

/// A single ingredient row of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Ingredient {
    /// Display label, no role in calculations
    pub name: String,

    /// Grams per unit
    pub weight_per_unit: Option<f64>,

    /// Percent of the unit weight
    pub percentage: Option<f64>,

    /// Grams in the whole batch
    pub total_weight: Option<f64>,

    /// The field the user drove most recently
    pub authority: QuantityField,

    /// Set once the user typed a weight per unit and kept through later edits
    /// of the other two fields; `Auto` mode keeps that amount per unit when the
    /// unit count moves. Cleared with the weight per unit itself.
    #[serde(default)]
    pub weight_per_unit_pinned: bool,
}

/// The full state of a batch being formulated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFormulation {
    /// Batch name, mandatory before ingredients can be edited
    pub name: String,

    /// Grams per unit, always supplied by the user
    pub unit_weight: Option<f64>,

    /// Number of units (typed in `Manual` mode, derived in `Auto` mode)
    pub unit_count: Option<f64>,

    /// Grams in the whole batch, `0.0` when unknown
    pub total_batch_weight: f64,

    /// Ordered ingredient rows
    pub ingredients: Vec<Ingredient>,

    /// Whether the unit count is typed in or derived
    pub unit_count_mode: UnitCountMode,

    /// Index of the ingredient absorbing the remainder in `Manual` mode
    pub free_ingredient_index: usize,
}

impl QuantityField {
    /// All three quantities, in display order
    pub const ALL: [QuantityField; 3] = [
        QuantityField::Percentage,
        QuantityField::WeightPerUnit,
        QuantityField::TotalWeight,
    ];

    /// Short label used in logs and the shell
    pub fn label(&self) -> &'static str {
        match self {
            QuantityField::WeightPerUnit => "weight-per-unit",
            QuantityField::Percentage => "percentage",
            QuantityField::TotalWeight => "total-weight",
        }
    }

    /// Parse a shell/user label into a field
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "weight-per-unit" | "wpu" | "weight" => Some(QuantityField::WeightPerUnit),
            "percentage" | "pct" | "%" => Some(QuantityField::Percentage),
            "total-weight" | "total" | "tw" => Some(QuantityField::TotalWeight),
            _ => None,
        }
    }
}

impl fmt::Display for QuantityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Ingredient {
    /// Create a blank ingredient with just a name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Set one quantity and make it the authority field
    pub fn with_quantity(mut self, field: QuantityField, value: f64) -> Self {
        self.set(field, Some(value));
        self.authority = field;
        if field == QuantityField::WeightPerUnit {
            self.weight_per_unit_pinned = true;
        }
        self
    }

    /// Read one of the three quantities
    pub fn get(&self, field: QuantityField) -> Option<f64> {
        match field {
            QuantityField::WeightPerUnit => self.weight_per_unit,
            QuantityField::Percentage => self.percentage,
            QuantityField::TotalWeight => self.total_weight,
        }
    }

    /// Overwrite one of the three quantities
    pub fn set(&mut self, field: QuantityField, value: Option<f64>) {
        match field {
            QuantityField::WeightPerUnit => self.weight_per_unit = value,
            QuantityField::Percentage => self.percentage = value,
            QuantityField::TotalWeight => self.total_weight = value,
        }
    }

    /// Value of the authority field
    pub fn authority_value(&self) -> Option<f64> {
        self.get(self.authority)
    }

    /// Clear all three quantities, keeping the name
    pub fn clear_quantities(&mut self) {
        self.weight_per_unit = None;
        self.percentage = None;
        self.total_weight = None;
        self.weight_per_unit_pinned = false;
    }

    /// True when no quantity is set
    pub fn is_blank(&self) -> bool {
        self.weight_per_unit.is_none() && self.percentage.is_none() && self.total_weight.is_none()
    }

    /// Whether `Auto` mode should keep the weight per unit fixed for this row
    pub fn keeps_weight_per_unit(&self) -> bool {
        self.authority == QuantityField::WeightPerUnit || self.weight_per_unit_pinned
    }

    /// Percentage above 100, if any
    pub fn percentage_overflow(&self) -> Option<f64> {
        self.percentage.filter(|p| *p > 100.0)
    }
}

impl BatchFormulation {
    /// A fresh batch: no unit weight, blank ingredient rows, `Manual` mode
    pub fn new() -> Self {
        Self {
            name: String::new(),
            unit_weight: None,
            unit_count: None,
            total_batch_weight: 0.0,
            ingredients: vec![Ingredient::default(); DEFAULT_INGREDIENT_SLOTS],
            unit_count_mode: UnitCountMode::Manual,
            free_ingredient_index: 0,
        }
    }

    /// Set the batch name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the weight of one unit
    pub fn with_unit_weight(mut self, grams: f64) -> Self {
        self.unit_weight = Some(grams);
        self
    }

    /// Set the number of units
    pub fn with_unit_count(mut self, count: f64) -> Self {
        self.unit_count = Some(count);
        self
    }

    /// Replace the ingredient rows
    pub fn with_ingredients(mut self, ingredients: Vec<Ingredient>) -> Self {
        self.ingredients = ingredients;
        self
    }

    /// True in `Auto` mode
    pub fn is_auto(&self) -> bool {
        self.unit_count_mode == UnitCountMode::Auto
    }

    /// Unit weight usable as a denominator, if set
    pub fn unit_weight_value(&self) -> Option<f64> {
        self.unit_weight.filter(|w| usable_denominator(*w))
    }

    /// Unit count usable as a denominator, if set
    pub fn unit_count_value(&self) -> Option<f64> {
        self.unit_count.filter(|n| usable_denominator(*n))
    }

    /// Batch name, unit weight, and either a unit count or `Auto` mode
    pub fn mandatory_fields_filled(&self) -> bool {
        !self.name.trim().is_empty()
            && self.unit_weight_value().is_some()
            && (self.is_auto() || self.unit_count_value().is_some())
    }

    /// The row whose quantities are derived rather than edited, if any
    pub fn derived_ingredient_index(&self) -> usize {
        match self.unit_count_mode {
            UnitCountMode::Manual => self.free_ingredient_index,
            UnitCountMode::Auto => BASE_INGREDIENT_INDEX,
        }
    }

    /// Whether a field of a row is closed to direct edits in the current mode
    pub fn is_locked(&self, index: usize, field: IngredientField) -> bool {
        let IngredientField::Quantity(quantity) = field else {
            return false;
        };
        match self.unit_count_mode {
            UnitCountMode::Manual => index == self.free_ingredient_index,
            UnitCountMode::Auto => {
                index == BASE_INGREDIENT_INDEX && quantity != QuantityField::TotalWeight
            }
        }
    }

    /// Sum of all set percentages
    pub fn percentage_sum(&self) -> f64 {
        self.ingredients.iter().filter_map(|i| i.percentage).sum()
    }

    /// Sum of all set ingredient total weights
    pub fn ingredient_weight_sum(&self) -> f64 {
        self.ingredients.iter().filter_map(|i| i.total_weight).sum()
    }
}

impl Default for BatchFormulation {
    fn default() -> Self {
        Self::new()
    }
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

impl fmt::Display for Ingredient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() { "(unnamed)" } else { self.name.as_str() };
        write!(
            f,
            "{}: {}% | {} g/unit | {} g total [{}]",
            name,
            format_optional(self.percentage),
            format_optional(self.weight_per_unit),
            format_optional(self.total_weight),
            self.authority
        )
    }
}

impl fmt::Display for BatchFormulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.unit_count_mode {
            UnitCountMode::Manual => "manual",
            UnitCountMode::Auto => "auto",
        };
        writeln!(
            f,
            "Batch '{}' ({} units x {} g, {:.2} g total, {} count):",
            self.name,
            format_optional(self.unit_count),
            format_optional(self.unit_weight),
            self.total_batch_weight,
            mode
        )?;

        let derived = self.derived_ingredient_index();
        for (i, ingredient) in self.ingredients.iter().enumerate() {
            let marker = if i == derived { "*" } else { " " };
            writeln!(f, " {}{}. {}", marker, i + 1, ingredient)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_batch_lifecycle_state() {
        let batch = BatchFormulation::new();
        assert_eq!(batch.ingredients.len(), DEFAULT_INGREDIENT_SLOTS);
        assert!(batch.ingredients.iter().all(Ingredient::is_blank));
        assert_eq!(batch.unit_count_mode, UnitCountMode::Manual);
        assert_eq!(batch.free_ingredient_index, 0);
        assert_eq!(batch.unit_weight, None);
        assert!(!batch.mandatory_fields_filled());
    }

    #[test]
    fn test_mandatory_fields() {
        let batch = BatchFormulation::new().with_name("Milk").with_unit_weight(50.0);
        assert!(!batch.mandatory_fields_filled());

        let manual = batch.clone().with_unit_count(4.0);
        assert!(manual.mandatory_fields_filled());

        let mut auto = batch;
        auto.unit_count_mode = UnitCountMode::Auto;
        assert!(auto.mandatory_fields_filled());

        let unnamed = manual.with_name("   ");
        assert!(!unnamed.mandatory_fields_filled());
    }

    #[test]
    fn test_vanishing_denominators_count_as_unset() {
        let batch = BatchFormulation::new().with_unit_weight(1e-310).with_unit_count(0.001);
        assert_eq!(batch.unit_weight_value(), None);
        assert_eq!(batch.unit_count_value(), None);

        let batch = BatchFormulation::new().with_unit_weight(f64::INFINITY).with_unit_count(0.01);
        assert_eq!(batch.unit_weight_value(), None);
        assert_eq!(batch.unit_count_value(), Some(0.01));
    }

    #[test]
    fn test_ingredient_builder_sets_authority() {
        let sugar = Ingredient::new("sugar").with_quantity(QuantityField::WeightPerUnit, 12.5);
        assert_eq!(sugar.weight_per_unit, Some(12.5));
        assert_eq!(sugar.authority, QuantityField::WeightPerUnit);
        assert!(sugar.weight_per_unit_pinned);
        assert_eq!(sugar.authority_value(), Some(12.5));

        let butter = Ingredient::new("butter").with_quantity(QuantityField::TotalWeight, 300.0);
        assert_eq!(butter.authority, QuantityField::TotalWeight);
        assert!(!butter.keeps_weight_per_unit());
    }

    #[test]
    fn test_locked_fields_follow_mode() {
        let mut batch = BatchFormulation::new();
        batch.free_ingredient_index = 2;

        let pct = IngredientField::Quantity(QuantityField::Percentage);
        let total = IngredientField::Quantity(QuantityField::TotalWeight);

        assert!(batch.is_locked(2, pct));
        assert!(batch.is_locked(2, total));
        assert!(!batch.is_locked(2, IngredientField::Name));
        assert!(!batch.is_locked(0, pct));

        batch.unit_count_mode = UnitCountMode::Auto;
        assert!(batch.is_locked(0, pct));
        assert!(!batch.is_locked(0, total));
        assert!(!batch.is_locked(2, pct));
    }

    #[test]
    fn test_field_labels() {
        for field in QuantityField::ALL {
            assert_eq!(QuantityField::from_label(field.label()), Some(field));
        }
        assert_eq!(QuantityField::from_label("pct"), Some(QuantityField::Percentage));
        assert_eq!(QuantityField::from_label("bogus"), None);
    }

    #[test]
    fn test_display_formatting() {
        let batch = BatchFormulation::new()
            .with_name("Dark")
            .with_unit_weight(100.0)
            .with_unit_count(2.0)
            .with_ingredients(vec![
                Ingredient::new("cocoa").with_quantity(QuantityField::Percentage, 70.0)
            ]);

        let display = format!("{batch}");
        assert!(display.contains("Batch 'Dark'"));
        assert!(display.contains("cocoa: 70.00%"));
        assert!(display.contains("*1."));
    }
}
