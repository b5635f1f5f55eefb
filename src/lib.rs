//! # Batch Formulation
//!
//! Formulation of production batches: a number of identical units of a fixed
//! weight, made from ingredients held as weight per unit, percentage and total
//! weight. Editing any one of these derives the other two and keeps the batch
//! totals consistent, with the unit count either typed in or derived from the
//! ingredient weights. Batches can be stored in a JSON file or PostgreSQL.

pub mod app_config;
pub mod auto_mode;
pub mod batch_model;
pub mod batch_store;
pub mod db;
pub mod derivation;
pub mod localization;
pub mod numeric_input;
pub mod session;
pub mod store_errors;
pub mod unit_converter;
