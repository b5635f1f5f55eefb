//! # Batch Store Module
//!
//! Persistence of batch snapshots: the stored document format, the
//! [`BatchRepository`] interface, a JSON file implementation and a retry
//! helper for transient store failures.
//!
//! ## Stored document
//!
//! Each record stores a camelCase document (`batchName`, `numBars`,
//! `barWeight`, `totalBatchWeight`, `ingredients`, `isNumBarsAuto`,
//! `autoPercentageIndex`). Older documents stored numbers as strings and may
//! lack the mode fields, so reading is lenient: numbers, numeric strings, `""`
//! and `null` are all accepted, and missing mode fields fall back to `Manual`
//! with the first ingredient free.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::auto_mode::normalize_loaded;
use crate::batch_model::{BatchFormulation, Ingredient, QuantityField, UnitCountMode};
use crate::numeric_input::parse_quantity;
use crate::store_errors::{StoreError, StoreResult};

/// Length of generated record ids
pub const RECORD_ID_LENGTH: usize = 20;

/// A stored batch with its bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub id: String,
    pub batch: BatchFormulation,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persistence interface for batch snapshots
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// All stored batches, oldest first
    async fn list(&self) -> StoreResult<Vec<BatchRecord>>;
    /// Store a new record and return it with its assigned id
    async fn create(&self, batch: &BatchFormulation) -> StoreResult<BatchRecord>;
    /// Overwrite an existing record
    async fn update(&self, id: &str, batch: &BatchFormulation) -> StoreResult<BatchRecord>;
    /// Delete a record; `false` when there was nothing to delete
    async fn delete(&self, id: &str) -> StoreResult<bool>;
}

/// Accept a number, a numeric string, `""` or `null`
fn loose_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => number.as_f64(),
        Some(serde_json::Value::String(text)) => parse_quantity(&text),
        _ => None,
    })
}

/// Stored form of an ingredient row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngredientDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "loose_number")]
    pub weight_per_bar: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub percentage: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub total_weight: Option<f64>,
    #[serde(default)]
    pub static_field: Option<String>,
    /// Weight per bar was typed by the user; absent in older documents
    #[serde(default)]
    pub weight_per_bar_user_entered: bool,
}

/// Stored form of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchDocument {
    #[serde(default)]
    pub batch_name: String,
    #[serde(default, deserialize_with = "loose_number")]
    pub num_bars: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub bar_weight: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub total_batch_weight: Option<f64>,
    #[serde(default)]
    pub ingredients: Vec<IngredientDocument>,
    #[serde(default)]
    pub is_num_bars_auto: Option<bool>,
    #[serde(default, deserialize_with = "loose_number")]
    pub auto_percentage_index: Option<f64>,
}

fn field_key(field: QuantityField) -> &'static str {
    match field {
        QuantityField::WeightPerUnit => "weightPerBar",
        QuantityField::Percentage => "percentage",
        QuantityField::TotalWeight => "totalWeight",
    }
}

fn field_from_key(key: Option<&str>) -> QuantityField {
    match key {
        Some("percentage") => QuantityField::Percentage,
        Some("totalWeight") => QuantityField::TotalWeight,
        _ => QuantityField::WeightPerUnit,
    }
}

impl From<&Ingredient> for IngredientDocument {
    fn from(ingredient: &Ingredient) -> Self {
        Self {
            name: ingredient.name.clone(),
            weight_per_bar: ingredient.weight_per_unit,
            percentage: ingredient.percentage,
            total_weight: ingredient.total_weight,
            static_field: Some(field_key(ingredient.authority).to_string()),
            weight_per_bar_user_entered: ingredient.weight_per_unit_pinned,
        }
    }
}

impl From<IngredientDocument> for Ingredient {
    fn from(document: IngredientDocument) -> Self {
        Ingredient {
            name: document.name,
            weight_per_unit: document.weight_per_bar,
            percentage: document.percentage,
            total_weight: document.total_weight,
            authority: field_from_key(document.static_field.as_deref()),
            weight_per_unit_pinned: document.weight_per_bar_user_entered,
        }
    }
}

impl From<&BatchFormulation> for BatchDocument {
    fn from(batch: &BatchFormulation) -> Self {
        Self {
            batch_name: batch.name.clone(),
            num_bars: batch.unit_count,
            bar_weight: batch.unit_weight,
            total_batch_weight: Some(batch.total_batch_weight),
            ingredients: batch.ingredients.iter().map(IngredientDocument::from).collect(),
            is_num_bars_auto: Some(batch.is_auto()),
            auto_percentage_index: Some(batch.free_ingredient_index as f64),
        }
    }
}

impl From<BatchDocument> for BatchFormulation {
    fn from(document: BatchDocument) -> Self {
        let unit_count_mode = if document.is_num_bars_auto.unwrap_or(false) {
            UnitCountMode::Auto
        } else {
            UnitCountMode::Manual
        };
        let free_ingredient_index = document
            .auto_percentage_index
            .filter(|index| index.is_finite() && *index >= 0.0)
            .map_or(0, |index| index as usize);

        normalize_loaded(BatchFormulation {
            name: document.batch_name,
            unit_weight: document.bar_weight,
            unit_count: document.num_bars,
            total_batch_weight: document.total_batch_weight.unwrap_or(0.0),
            ingredients: document.ingredients.into_iter().map(Ingredient::from).collect(),
            unit_count_mode,
            free_ingredient_index,
        })
    }
}

/// A record as laid out in the JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredBatch {
    id: String,
    document: BatchDocument,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<StoredBatch> for BatchRecord {
    fn from(stored: StoredBatch) -> Self {
        BatchRecord {
            id: stored.id,
            batch: stored.document.into(),
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

/// Random alphanumeric record id
pub fn generate_record_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECORD_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Repository keeping every record in a single JSON file
pub struct JsonFileBatchRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileBatchRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StoreResult<Vec<StoredBatch>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Batch file does not exist yet");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, batches: &[StoredBatch]) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(batches)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchRepository for JsonFileBatchRepository {
    async fn list(&self) -> StoreResult<Vec<BatchRecord>> {
        let _guard = self.lock.lock().await;
        let stored = self.read_all().await?;
        debug!(count = stored.len(), "Listed stored batches");
        Ok(stored.into_iter().map(BatchRecord::from).collect())
    }

    async fn create(&self, batch: &BatchFormulation) -> StoreResult<BatchRecord> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read_all().await?;

        let record = StoredBatch {
            id: generate_record_id(),
            document: BatchDocument::from(batch),
            created_at: Utc::now(),
            updated_at: None,
        };
        stored.push(record.clone());
        self.write_all(&stored).await?;

        info!(id = %record.id, name = %batch.name, "Created batch record");
        Ok(record.into())
    }

    async fn update(&self, id: &str, batch: &BatchFormulation) -> StoreResult<BatchRecord> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read_all().await?;

        let record = stored
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.document = BatchDocument::from(batch);
        record.updated_at = Some(Utc::now());
        let updated = record.clone();

        self.write_all(&stored).await?;
        info!(id = %id, name = %batch.name, "Updated batch record");
        Ok(updated.into())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read_all().await?;

        let before = stored.len();
        stored.retain(|record| record.id != id);
        let removed = stored.len() != before;

        if removed {
            self.write_all(&stored).await?;
            info!(id = %id, "Deleted batch record");
        }
        Ok(removed)
    }
}

/// Retry policy for store operations
#[derive(Debug, Clone)]
pub struct StoreRecoveryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
}

impl Default for StoreRecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 200,
            max_retry_delay_ms: 2000,
        }
    }
}

/// Exponential backoff with random jitter, capped at the configured maximum
pub fn calculate_retry_delay(config: &StoreRecoveryConfig, attempt: u32) -> Duration {
    let exponential = config
        .base_retry_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_retry_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=exponential / 4);
    Duration::from_millis((exponential + jitter).min(config.max_retry_delay_ms))
}

/// Run a store operation, retrying failures that may be transient
pub async fn with_retry<T, F, Fut>(
    config: &StoreRecoveryConfig,
    operation: &str,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt, "Store operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = calculate_retry_delay(config, attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(operation, error = %e, "Store operation failed");
                return Err(e);
            }
        }
    }
}
