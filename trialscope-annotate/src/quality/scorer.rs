// Quality Scorer - Source-Level and Field-Level Reliability Scores
//
// Scores are derived per call and never persisted. They inform prompt
// wording and warnings only; they never change the annotation itself.

use super::weights::{AnnotationTask, FieldWeightTable, SourceWeightTable, WeightSnapshot};
use crate::aggregator::AggregatedRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Both score tiers for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub source_score: f64,
    pub field_scores: BTreeMap<AnnotationTask, f64>,
}

impl QualityScore {
    pub fn source_band(&self) -> QualityBand {
        QualityBand::from_score(self.source_score)
    }

    pub fn field_band(&self, task: AnnotationTask) -> Option<QualityBand> {
        self.field_scores.get(&task).copied().map(QualityBand::from_score)
    }
}

/// Qualitative band of a score in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            QualityBand::Excellent
        } else if score >= 0.5 {
            QualityBand::Good
        } else if score >= 0.3 {
            QualityBand::Fair
        } else {
            QualityBand::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityBand::Excellent => "excellent",
            QualityBand::Good => "good",
            QualityBand::Fair => "fair",
            QualityBand::Poor => "poor",
        }
    }
}

impl fmt::Display for QualityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sum of the weights of `ok` sources, clamped to [0, 1]
pub fn score_sources(record: &AggregatedRecord, table: &SourceWeightTable) -> f64 {
    let total: f64 = record.ok_sources().map(|name| table.weight(name)).sum();
    total.clamp(0.0, 1.0)
}

/// Present-field weight over total field weight for `task`
///
/// A table with no positive weight yields 1.0: nothing is required, so
/// nothing is missing.
pub fn score_field(task: AnnotationTask, record: &AggregatedRecord, table: &FieldWeightTable) -> f64 {
    let total = table.total();
    if total <= 0.0 {
        debug!(task = task.as_str(), "Empty field weight table, vacuous score");
        return 1.0;
    }
    let present: f64 = table
        .iter()
        .filter(|(field, _)| record.is_present(field))
        .map(|(_, weight)| weight)
        .sum();
    (present / total).clamp(0.0, 1.0)
}

/// Score a record against one consistent weight snapshot
pub fn score(record: &AggregatedRecord, weights: &WeightSnapshot) -> QualityScore {
    let source_score = score_sources(record, &weights.sources);
    let field_scores = AnnotationTask::ALL
        .into_iter()
        .map(|task| (task, score_field(task, record, &weights.field(task))))
        .collect();

    let score = QualityScore {
        source_score,
        field_scores,
    };
    debug!(
        trial_id = %record.trial_id(),
        source_score = score.source_score,
        band = %score.source_band(),
        "Quality scored"
    );
    score
}
