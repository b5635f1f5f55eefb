//! # Unit Converter Module
//!
//! Conversion between the canonical gram values held in a batch and the weight
//! unit chosen for display, plus the raw-text buffer that keeps a total weight
//! exactly as typed while its field is being edited.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::numeric_input::round2;

/// Grams in one avoirdupois pound
pub const GRAMS_PER_POUND: f64 = 453.59237;

/// Weight unit used for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WeightUnit {
    #[default]
    Grams,
    Pounds,
}

impl WeightUnit {
    /// Short unit suffix
    pub fn symbol(&self) -> &'static str {
        match self {
            WeightUnit::Grams => "g",
            WeightUnit::Pounds => "lbs",
        }
    }

    /// Parse `g`/`grams`/`lbs`/`pounds`
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim().to_lowercase().as_str() {
            "g" | "gram" | "grams" => Some(WeightUnit::Grams),
            "lb" | "lbs" | "pound" | "pounds" => Some(WeightUnit::Pounds),
            _ => None,
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Convert grams to the display unit without rounding
pub fn from_grams(grams: f64, unit: WeightUnit) -> f64 {
    match unit {
        WeightUnit::Grams => grams,
        WeightUnit::Pounds => grams / GRAMS_PER_POUND,
    }
}

/// Convert grams to the display unit, rounded to two decimals
pub fn to_display(grams: f64, unit: WeightUnit) -> f64 {
    round2(from_grams(grams, unit))
}

/// Convert a display value back to grams at full precision
pub fn to_grams(display_value: f64, unit: WeightUnit) -> f64 {
    match unit {
        WeightUnit::Grams => display_value,
        WeightUnit::Pounds => display_value * GRAMS_PER_POUND,
    }
}

/// Text shown in a weight field: converted value or empty when unset
pub fn display_text(grams: Option<f64>, unit: WeightUnit) -> String {
    match grams {
        Some(value) => format!("{:.2}", to_display(value, unit)),
        None => String::new(),
    }
}

/// Weight with its unit suffix, or `N/A` when unset or not positive
pub fn format_weight(grams: Option<f64>, unit: WeightUnit) -> String {
    match grams.filter(|g| *g > 0.0) {
        Some(value) => format!("{:.2} {}", to_display(value, unit), unit.symbol()),
        None => "N/A".to_string(),
    }
}

/// Raw total-weight text keyed by ingredient index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInputBuffer {
    inputs: BTreeMap<usize, String>,
}

impl RawInputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember what the user typed for a row
    pub fn store(&mut self, index: usize, raw: &str) {
        self.inputs.insert(index, raw.to_string());
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.inputs.get(&index).map(String::as_str)
    }

    pub fn remove(&mut self, index: usize) -> Option<String> {
        self.inputs.remove(&index)
    }

    /// Drop the removed row and move later rows up by one
    pub fn shift_after_removal(&mut self, removed: usize) {
        let shifted = std::mem::take(&mut self.inputs)
            .into_iter()
            .filter(|(index, _)| *index != removed)
            .map(|(index, raw)| if index > removed { (index - 1, raw) } else { (index, raw) })
            .collect();
        self.inputs = shifted;
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}
