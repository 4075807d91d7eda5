// Weight Tables - Source and Field Weights with Snapshot Replacement
//
// Tables are immutable once built. The store swaps whole `Arc` snapshots
// under a lock, so a scoring call holding a snapshot never observes a
// partially applied update.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::info;
use trialscope_common::{Error, Result};

/// Mapping name -> weight in [0, 1]; weights need not sum to 1
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable(BTreeMap<String, f64>);

/// Source name -> weight
pub type SourceWeightTable = WeightTable;

/// Record field name -> weight, one table per annotation task
pub type FieldWeightTable = WeightTable;

impl WeightTable {
    /// Build a validated table
    pub fn new(weights: BTreeMap<String, f64>) -> Result<Self> {
        let table = Self(weights);
        table.validate()?;
        Ok(table)
    }

    fn from_static(pairs: &[(&str, f64)]) -> Self {
        Self(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    /// Weight of `name`; unknown names weigh 0
    pub fn weight(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    /// Sum of all weights
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every weight finite and within [0, 1], every name non-blank
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in &self.0 {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput("weight name must not be empty".into()));
            }
            if !weight.is_finite() || !(0.0..=1.0).contains(weight) {
                return Err(Error::InvalidInput(format!(
                    "weight for '{}' must be within [0, 1], got {}",
                    name, weight
                )));
            }
        }
        Ok(())
    }

    /// Copy of `self` with `updates` applied on top
    fn merged(&self, updates: &WeightTable) -> WeightTable {
        let mut merged = self.0.clone();
        merged.extend(updates.0.iter().map(|(k, v)| (k.clone(), *v)));
        WeightTable(merged)
    }
}

impl FromIterator<(String, f64)> for WeightTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Annotation task scored by its own field weight table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationTask {
    Classification,
    DeliveryMode,
    Outcome,
    FailureReason,
    Peptide,
}

impl AnnotationTask {
    pub const ALL: [AnnotationTask; 5] = [
        AnnotationTask::Classification,
        AnnotationTask::DeliveryMode,
        AnnotationTask::Outcome,
        AnnotationTask::FailureReason,
        AnnotationTask::Peptide,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationTask::Classification => "classification",
            AnnotationTask::DeliveryMode => "delivery_mode",
            AnnotationTask::Outcome => "outcome",
            AnnotationTask::FailureReason => "failure_reason",
            AnnotationTask::Peptide => "peptide",
        }
    }
}

impl fmt::Display for AnnotationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationTask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AnnotationTask::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::NotFound(format!("unknown annotation task '{}'", s)))
    }
}

/// Compiled default source weights
pub fn default_source_weights() -> SourceWeightTable {
    WeightTable::from_static(&[
        ("clinical_trials", 0.40),
        ("pubmed", 0.20),
        ("pmc", 0.15),
        ("openfda", 0.15),
        ("web_search", 0.10),
    ])
}

/// Compiled default field weights for `task`
pub fn default_field_weights(task: AnnotationTask) -> FieldWeightTable {
    match task {
        AnnotationTask::Classification => WeightTable::from_static(&[
            ("conditions", 0.30),
            ("interventions", 0.25),
            ("brief_summary", 0.20),
            ("keywords", 0.15),
            ("intervention_descriptions", 0.10),
        ]),
        AnnotationTask::DeliveryMode => WeightTable::from_static(&[
            ("intervention_descriptions", 0.35),
            ("routes", 0.35),
            ("interventions", 0.20),
            ("products", 0.10),
        ]),
        AnnotationTask::Outcome => WeightTable::from_static(&[
            ("overall_status", 0.50),
            ("has_results", 0.20),
            ("publications", 0.20),
            ("why_stopped", 0.10),
        ]),
        AnnotationTask::FailureReason => WeightTable::from_static(&[
            ("why_stopped", 0.60),
            ("overall_status", 0.30),
            ("publications", 0.10),
        ]),
        AnnotationTask::Peptide => WeightTable::from_static(&[
            ("interventions", 0.40),
            ("keywords", 0.20),
            ("brief_summary", 0.20),
            ("products", 0.20),
        ]),
    }
}

/// Consistent view of every table, taken once per scoring call
#[derive(Debug, Clone)]
pub struct WeightSnapshot {
    pub sources: Arc<SourceWeightTable>,
    pub fields: BTreeMap<AnnotationTask, Arc<FieldWeightTable>>,
}

impl WeightSnapshot {
    /// Field table for `task` (empty if somehow absent)
    pub fn field(&self, task: AnnotationTask) -> Arc<FieldWeightTable> {
        self.fields.get(&task).cloned().unwrap_or_default()
    }
}

/// Owner of the live weight tables
pub struct WeightStore {
    sources: RwLock<Arc<SourceWeightTable>>,
    fields: BTreeMap<AnnotationTask, RwLock<Arc<FieldWeightTable>>>,
}

impl Default for WeightStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightStore {
    /// Store initialized with the compiled defaults
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Arc::new(default_source_weights())),
            fields: AnnotationTask::ALL
                .into_iter()
                .map(|task| (task, RwLock::new(Arc::new(default_field_weights(task)))))
                .collect(),
        }
    }

    fn read(lock: &RwLock<Arc<WeightTable>>) -> Arc<WeightTable> {
        Arc::clone(&lock.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn swap(lock: &RwLock<Arc<WeightTable>>, table: WeightTable) -> Arc<WeightTable> {
        let table = Arc::new(table);
        *lock.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&table);
        table
    }

    /// Apply `updates` to the current table under the write lock
    fn update(lock: &RwLock<Arc<WeightTable>>, updates: &WeightTable) -> Result<Arc<WeightTable>> {
        updates.validate()?;
        let mut guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let table = Arc::new(guard.merged(updates));
        *guard = Arc::clone(&table);
        Ok(table)
    }

    fn field_lock(&self, task: AnnotationTask) -> Result<&RwLock<Arc<FieldWeightTable>>> {
        self.fields
            .get(&task)
            .ok_or_else(|| Error::Internal(format!("no weight table for task {}", task)))
    }

    pub fn snapshot(&self) -> WeightSnapshot {
        WeightSnapshot {
            sources: self.source_weights(),
            fields: self
                .fields
                .iter()
                .map(|(task, lock)| (*task, Self::read(lock)))
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // Source weights
    // ------------------------------------------------------------------

    pub fn source_weights(&self) -> Arc<SourceWeightTable> {
        Self::read(&self.sources)
    }

    pub fn default_source_weights(&self) -> SourceWeightTable {
        default_source_weights()
    }

    /// Partially update: listed names are overwritten, others kept
    pub fn set_source_weights(&self, updates: &SourceWeightTable) -> Result<Arc<SourceWeightTable>> {
        let table = Self::update(&self.sources, updates)?;
        info!(table = "sources", entries = updates.len(), "Source weights updated");
        Ok(table)
    }

    /// Replace the whole table
    pub fn replace_source_weights(&self, table: SourceWeightTable) -> Result<Arc<SourceWeightTable>> {
        table.validate()?;
        info!(table = "sources", entries = table.len(), "Source weights replaced");
        Ok(Self::swap(&self.sources, table))
    }

    pub fn reset_source_weights(&self) -> Arc<SourceWeightTable> {
        info!(table = "sources", "Source weights reset to defaults");
        Self::swap(&self.sources, default_source_weights())
    }

    // ------------------------------------------------------------------
    // Field weights
    // ------------------------------------------------------------------

    pub fn field_weights(&self, task: AnnotationTask) -> Result<Arc<FieldWeightTable>> {
        Ok(Self::read(self.field_lock(task)?))
    }

    pub fn default_field_weights(&self, task: AnnotationTask) -> FieldWeightTable {
        default_field_weights(task)
    }

    pub fn set_field_weights(
        &self,
        task: AnnotationTask,
        updates: &FieldWeightTable,
    ) -> Result<Arc<FieldWeightTable>> {
        let table = Self::update(self.field_lock(task)?, updates)?;
        info!(table = task.as_str(), entries = updates.len(), "Field weights updated");
        Ok(table)
    }

    pub fn replace_field_weights(
        &self,
        task: AnnotationTask,
        table: FieldWeightTable,
    ) -> Result<Arc<FieldWeightTable>> {
        table.validate()?;
        let lock = self.field_lock(task)?;
        info!(table = task.as_str(), entries = table.len(), "Field weights replaced");
        Ok(Self::swap(lock, table))
    }

    pub fn reset_field_weights(&self, task: AnnotationTask) -> Result<Arc<FieldWeightTable>> {
        let lock = self.field_lock(task)?;
        info!(table = task.as_str(), "Field weights reset to defaults");
        Ok(Self::swap(lock, default_field_weights(task)))
    }
}
