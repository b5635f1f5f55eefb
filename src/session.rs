//! # Batch Session
//!
//! Caller-facing wrapper around the derivation engine. A session owns the
//! current batch snapshot and its edit context, the display unit with the
//! raw text being typed into total-weight fields, and the bookkeeping that
//! decides whether a save creates a new record or updates the loaded one.
//!
//! Saving never blocks editing: [`BatchSession::begin_save`] hands out a
//! [`SaveRequest`] holding a copy of the snapshot, the caller runs it against a
//! repository, and [`BatchSession::finish_save`] records the outcome.

use anyhow::{bail, Result};
use log::{debug, info, warn};

use crate::batch_model::{BatchFormulation, IngredientField, QuantityField};
use crate::batch_store::{BatchRecord, BatchRepository};
use crate::derivation::{apply, settle_pending, Advisory, Edit, EditContext, Transition};
use crate::numeric_input::parse_quantity;
use crate::store_errors::StoreResult;
use crate::unit_converter::{display_text, format_weight, to_grams, RawInputBuffer, WeightUnit};

/// State of the last save
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PersistenceStatus {
    #[default]
    Idle,
    Pending,
    Failed(String),
}

/// The stored record the current batch came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedRecord {
    pub id: String,
    pub name: String,
}

/// Whether a save writes a new record or overwrites an existing one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTarget {
    Create,
    Update(String),
}

/// A snapshot on its way to the store
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub target: SaveTarget,
    pub batch: BatchFormulation,
}

impl SaveRequest {
    /// Write the snapshot
    pub async fn execute<R>(&self, repository: &R) -> StoreResult<BatchRecord>
    where
        R: BatchRepository + ?Sized,
    {
        match &self.target {
            SaveTarget::Create => repository.create(&self.batch).await,
            SaveTarget::Update(id) => repository.update(id, &self.batch).await,
        }
    }
}

/// An editing session over one batch
#[derive(Debug, Clone, Default)]
pub struct BatchSession {
    state: BatchFormulation,
    context: EditContext,
    unit: WeightUnit,
    raw_inputs: RawInputBuffer,
    advisories: Vec<Advisory>,
    loaded: Option<LoadedRecord>,
    status: PersistenceStatus,
}

impl BatchSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(unit: WeightUnit) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &BatchFormulation {
        &self.state
    }

    pub fn context(&self) -> &EditContext {
        &self.context
    }

    pub fn unit(&self) -> WeightUnit {
        self.unit
    }

    /// Advisories raised by the last edit or settle
    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    pub fn loaded_record(&self) -> Option<&LoadedRecord> {
        self.loaded.as_ref()
    }

    pub fn status(&self) -> &PersistenceStatus {
        &self.status
    }

    fn take(&mut self, transition: Transition) -> &[Advisory] {
        self.state = transition.state;
        self.context = transition.context;
        self.advisories = transition.advisories;
        &self.advisories
    }

    /// Apply one edit
    pub fn edit(&mut self, edit: Edit) -> &[Advisory] {
        match &edit {
            Edit::RemoveIngredient(index) if self.state.ingredients.len() > 1 => {
                self.raw_inputs.shift_after_removal(*index);
            }
            Edit::Reset => {
                self.raw_inputs.clear();
                self.loaded = None;
            }
            Edit::Load(_) => self.raw_inputs.clear(),
            _ => {}
        }

        let transition = apply(&self.state, &self.context, &edit);
        self.take(transition)
    }

    /// Finish the current edit
    pub fn settle(&mut self) -> &[Advisory] {
        let transition = settle_pending(&self.state, &self.context);
        self.take(transition)
    }

    /// Start editing a total weight: the field shows its current display value
    pub fn focus_total_weight(&mut self, index: usize) {
        if self.total_weight_locked(index) {
            return;
        }
        let Some(ingredient) = self.state.ingredients.get(index) else {
            return;
        };
        let shown = display_text(ingredient.total_weight, self.unit);
        self.raw_inputs.store(index, &shown);
    }

    /// Keystroke in a total-weight field, in the display unit
    ///
    /// The text is kept verbatim so partial input like `"1."` survives, while
    /// the engine receives the value converted to grams.
    /// Locked or missing rows keep no text; the engine reports the refusal.
    pub fn type_total_weight(&mut self, index: usize, raw: &str) -> &[Advisory] {
        if index < self.state.ingredients.len() && !self.total_weight_locked(index) {
            self.raw_inputs.store(index, raw);
        }
        let grams = parse_quantity(raw)
            .map(|value| to_grams(value, self.unit).to_string())
            .unwrap_or_default();
        self.edit(Edit::quantity(index, QuantityField::TotalWeight, &grams))
    }

    fn total_weight_locked(&self, index: usize) -> bool {
        self.state
            .is_locked(index, IngredientField::Quantity(QuantityField::TotalWeight))
    }

    /// Leave a total-weight field
    pub fn blur_total_weight(&mut self, index: usize) -> &[Advisory] {
        self.raw_inputs.remove(index);
        self.settle()
    }

    /// Text of a total-weight field: what was typed while it is being edited,
    /// otherwise the stored value in the display unit
    pub fn display_total_weight(&self, index: usize) -> String {
        if self.context.is_active(index, QuantityField::TotalWeight) {
            if let Some(raw) = self.raw_inputs.get(index) {
                return raw.to_string();
            }
        }
        let grams = self.state.ingredients.get(index).and_then(|i| i.total_weight);
        display_text(grams, self.unit)
    }

    /// Total batch weight label in the display unit
    pub fn display_batch_weight(&self) -> String {
        format_weight(Some(self.state.total_batch_weight), self.unit)
    }

    /// Change the display unit; any edit in progress is finished first
    pub fn set_weight_unit(&mut self, unit: WeightUnit) {
        if unit == self.unit {
            return;
        }
        self.settle();
        self.raw_inputs.clear();
        self.unit = unit;
        debug!("Display unit changed to {}", unit);
    }

    /// Prepare a save of the current snapshot
    ///
    /// Updates the loaded record only while the batch still carries that
    /// record's name; a renamed batch is saved as a new record.
    pub fn begin_save(&mut self) -> Result<SaveRequest> {
        if self.state.name.trim().is_empty() {
            bail!("Please enter a batch name before saving");
        }

        let target = match &self.loaded {
            Some(record) if record.name == self.state.name => SaveTarget::Update(record.id.clone()),
            _ => SaveTarget::Create,
        };
        debug!("Saving batch '{}' as {:?}", self.state.name, target);

        self.status = PersistenceStatus::Pending;
        Ok(SaveRequest {
            target,
            batch: self.state.clone(),
        })
    }

    /// Record the outcome of a save; the snapshot is left alone either way
    pub fn finish_save(&mut self, result: StoreResult<BatchRecord>) {
        match result {
            Ok(record) => {
                info!("Batch '{}' saved as record {}", record.batch.name, record.id);
                self.loaded = Some(LoadedRecord {
                    id: record.id,
                    name: record.batch.name,
                });
                self.status = PersistenceStatus::Idle;
            }
            Err(e) => {
                warn!("Failed to save batch: {}", e);
                self.status = PersistenceStatus::Failed(e.to_string());
            }
        }
    }

    /// Replace the batch with a stored record
    pub fn load(&mut self, record: BatchRecord) -> &[Advisory] {
        info!("Loading batch record {} ('{}')", record.id, record.batch.name);
        self.loaded = Some(LoadedRecord {
            id: record.id,
            name: record.batch.name.clone(),
        });
        self.status = PersistenceStatus::Idle;
        self.edit(Edit::Load(Box::new(record.batch)))
    }

    /// The record was deleted from the store
    pub fn forget_record(&mut self, id: &str) {
        if self.loaded.as_ref().is_some_and(|record| record.id == id) {
            self.loaded = None;
        }
    }
}
