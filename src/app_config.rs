//! Runtime configuration read from the environment (and `.env` via `dotenv`).

use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;

use crate::batch_store::StoreRecoveryConfig;
use crate::localization::DEFAULT_LANGUAGE;
use crate::unit_converter::WeightUnit;

/// Default location of the JSON batch file
pub const DEFAULT_STORE_PATH: &str = "batches.json";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string; the JSON file store is used without it
    pub database_url: Option<String>,
    pub store_path: PathBuf,
    pub weight_unit: WeightUnit,
    pub language: String,
    pub recovery: StoreRecoveryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            weight_unit: WeightUnit::Grams,
            language: DEFAULT_LANGUAGE.to_string(),
            recovery: StoreRecoveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read `DATABASE_URL`, `BATCH_STORE_PATH`, `WEIGHT_UNIT` and `BATCH_LANG`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let weight_unit = match non_empty("WEIGHT_UNIT") {
            Some(symbol) => WeightUnit::from_symbol(&symbol)
                .ok_or_else(|| anyhow!("Unsupported WEIGHT_UNIT '{}', expected g or lbs", symbol))?,
            None => defaults.weight_unit,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            store_path: non_empty("BATCH_STORE_PATH").map_or(defaults.store_path, PathBuf::from),
            weight_unit,
            language: non_empty("BATCH_LANG").unwrap_or(defaults.language),
            recovery: defaults.recovery,
        })
    }
}
