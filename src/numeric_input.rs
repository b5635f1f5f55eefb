//! # Numeric Input Module
//!
//! Parsing of raw field text into quantities, plus the rounding helpers used
//! when derived values are stored.
//!
//! Raw text comes straight from an input field while the user is typing, so
//! partial entries like `"12."` must be accepted. Anything that is not a plain
//! decimal number is treated as "unset" rather than an error.

use lazy_static::lazy_static;
use log::trace;
use regex::Regex;

/// Smallest magnitude treated as a usable denominator
pub const EPSILON: f64 = 1e-3;

// Plain decimal numbers, optionally signed, optionally ending with a bare decimal point
pub const QUANTITY_PATTERN: &str = r"^[+-]?(?:\d+\.?\d*|\.\d+)$";

lazy_static! {
    pub static ref QUANTITY_REGEX: Regex =
        Regex::new(QUANTITY_PATTERN).expect("Quantity pattern should be valid");
}

/// Parse raw field text into a quantity
///
/// Returns `None` for empty or non-numeric input. A trailing decimal point is
/// accepted and read as `N.0`, so `"12."` parses to `12.0`.
///
/// # Examples
///
/// ```rust
/// use batch_formulation::numeric_input::parse_quantity;
///
/// assert_eq!(parse_quantity("12."), Some(12.0));
/// assert_eq!(parse_quantity(" 2.5 "), Some(2.5));
/// assert_eq!(parse_quantity(""), None);
/// assert_eq!(parse_quantity("12abc"), None);
/// ```
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !QUANTITY_REGEX.is_match(trimmed) {
        trace!("Treating {:?} as unset", raw);
        return None;
    }

    let normalized = if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    };

    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Round to two decimal places for storage and display
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / 100.0
}

/// Round to a whole gram
pub fn round_whole(value: f64) -> f64 {
    value.round()
}

/// True when `value` is too close to zero to divide by
pub fn is_effectively_zero(value: f64) -> bool {
    value.abs() <= EPSILON
}

/// Returns the value only when it is a finite number
pub fn finite(value: f64) -> Option<f64> {
    Some(value).filter(|v| v.is_finite())
}

/// Returns the value only when it is strictly positive
pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}
