//! Annotation pipeline: search -> aggregate -> score -> extract
//!
//! One caller task drives a run. Only the search suspends; the remaining
//! stages are pure functions of its results and one weight snapshot.

use crate::aggregator::{aggregate, AggregatedRecord};
use crate::annotation::{extract, extract_from_response, AnnotationRecord};
use crate::prompt::{InstructionPayload, PromptBuilder};
use crate::quality::{score, QualityScore, WeightStore};
use crate::sources::SourceRegistry;
use crate::types::{SourceKind, SourceResult, SourceStatus, TrialQuery};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use trialscope_common::config::TomlConfig;
use trialscope_common::events::EventBus;
use trialscope_common::{Error, Result};

/// Per-source section of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub status: SourceStatus,
    pub kind: SourceKind,
    #[serde(default)]
    pub hit_count: usize,
    #[serde(default)]
    pub over_broad: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output document of one annotation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialReport {
    pub nct_id: String,
    pub sources: BTreeMap<String, SourceReport>,
    pub quality: QualityScore,
    pub annotation: AnnotationRecord,
    /// Prompt for an external model, built from the same evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<InstructionPayload>,
}

impl TrialReport {
    pub fn new(record: &AggregatedRecord, quality: QualityScore, annotation: AnnotationRecord) -> Self {
        let sources = record
            .raw_sources
            .iter()
            .map(|(name, result)| {
                (
                    name.clone(),
                    SourceReport {
                        status: result.status,
                        kind: result.kind,
                        hit_count: result.hit_count,
                        over_broad: result.over_broad,
                        data: result.payload.clone(),
                        error: result.error_detail.clone(),
                    },
                )
            })
            .collect();

        Self {
            nct_id: record.trial_id().to_string(),
            sources,
            quality,
            annotation,
            instruction: None,
        }
    }

    pub fn with_instruction(mut self, instruction: InstructionPayload) -> Self {
        self.instruction = Some(instruction);
        self
    }

    /// Source results reconstructed from the report
    pub fn source_results(&self) -> Vec<SourceResult> {
        self.sources
            .iter()
            .map(|(name, report)| SourceResult {
                source_name: name.clone(),
                kind: report.kind,
                status: report.status,
                payload: report.data.clone(),
                hit_count: report.hit_count,
                over_broad: report.over_broad,
                error_detail: report.error.clone(),
            })
            .collect()
    }
}

pub struct AnnotationPipeline {
    registry: SourceRegistry,
    weights: Arc<WeightStore>,
    prompt: PromptBuilder,
}

impl AnnotationPipeline {
    pub fn new(registry: SourceRegistry, weights: Arc<WeightStore>, prompt: PromptBuilder) -> Self {
        Self {
            registry,
            weights,
            prompt,
        }
    }

    /// Registry, default weights and prompt limit from configuration
    pub fn from_config(config: &TomlConfig, events: EventBus) -> Result<Self> {
        let registry = SourceRegistry::from_config(config, events)?;
        Ok(Self::new(
            registry,
            Arc::new(WeightStore::new()),
            PromptBuilder::new(config.prompt.max_chars),
        ))
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn weights(&self) -> &Arc<WeightStore> {
        &self.weights
    }

    pub async fn run(&self, query: &TrialQuery, enabled: Option<&[String]>) -> Result<TrialReport> {
        self.run_with_cancel(query, enabled, CancellationToken::new())
            .await
    }

    /// Run the pipeline; a cancelled search still yields a report built
    /// from the sources that answered in time
    pub async fn run_with_cancel(
        &self,
        query: &TrialQuery,
        enabled: Option<&[String]>,
        cancel: CancellationToken,
    ) -> Result<TrialReport> {
        if query.trial_id.trim().is_empty() {
            return Err(Error::InvalidInput("trial_id must not be empty".into()));
        }

        let results = self
            .registry
            .search_all_with_cancel(query, enabled, cancel)
            .await?;

        let weights = self.weights.snapshot();
        let record = aggregate(&query.trial_id, results.into_values(), &weights.sources);
        let quality = score(&record, &weights);
        let annotation = extract(&record, &quality);
        let instruction = self.prompt.build(&record, &quality, &annotation.warnings);

        info!(
            trial_id = %query.trial_id,
            source_score = quality.source_score,
            outcome = %annotation.outcome,
            warnings = annotation.warnings.len(),
            "Trial annotated"
        );

        Ok(TrialReport::new(&record, quality, annotation).with_instruction(instruction))
    }

    /// Validate an external model's answer against a previous report
    pub fn annotate_response(&self, report: &TrialReport, text: &str) -> AnnotationRecord {
        let record = aggregate(
            &report.nct_id,
            report.source_results(),
            &self.weights.source_weights(),
        );
        extract_from_response(text, &record, &report.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::mock::{Behavior, MockSource};
    use crate::types::SourceClient;
    use serde_json::json;

    fn pipeline() -> AnnotationPipeline {
        let data: Map<String, Value> = serde_json::from_value(json!({
            "overall_status": "WITHDRAWN",
            "why_stopped": "Funding withdrawn by sponsor",
            "phases": ["PHASE2"]
        }))
        .unwrap();
        let clients: Vec<Arc<dyn SourceClient>> = vec![
            Arc::new(MockSource::new("clinical_trials", SourceKind::Registry, Behavior::Data(data))),
            Arc::new(MockSource::new("pubmed", SourceKind::Literature, Behavior::Fail)),
        ];
        AnnotationPipeline::new(
            SourceRegistry::new(clients, EventBus::new(16)),
            Arc::new(WeightStore::new()),
            PromptBuilder::new(12_000),
        )
    }

    #[tokio::test]
    async fn test_run_produces_report() {
        let report = pipeline()
            .run(&TrialQuery::new("NCT00000001"), None)
            .await
            .unwrap();

        assert_eq!(report.nct_id, "NCT00000001");
        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.sources["pubmed"].status, SourceStatus::Error);
        assert!(report.sources["pubmed"].error.is_some());
        assert_eq!(report.annotation.outcome.to_string(), "Withdrawn");
        assert_eq!(report.annotation.failure_reason.to_string(), "Business reasons");
        assert!((report.quality.source_score - 0.40).abs() < 1e-9);
        assert!(report.instruction.is_some());
    }

    #[tokio::test]
    async fn test_empty_trial_id_rejected() {
        let err = pipeline().run(&TrialQuery::new("  "), None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_report_json_shape() {
        let report = pipeline()
            .run(&TrialQuery::new("NCT00000001"), None)
            .await
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["nct_id"], "NCT00000001");
        assert_eq!(json["sources"]["clinical_trials"]["status"], "ok");
        assert_eq!(json["sources"]["clinical_trials"]["data"]["overall_status"], "WITHDRAWN");
        assert_eq!(json["sources"]["pubmed"]["status"], "error");
        assert!(json["quality"]["field_scores"]["outcome"].is_number());
        assert_eq!(json["annotation"]["study_status"], "WITHDRAWN");
        assert_eq!(json["annotation"]["phases"], json!(["PHASE2"]));
        assert_eq!(json["annotation"]["failure_reason"], "Business reasons");
        assert!(json["annotation"]["peptide"].is_boolean());
        assert!(json["annotation"]["warnings"].is_array());

        let parsed: TrialReport = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.sources, report.sources);
        assert_eq!(parsed.annotation, report.annotation);
    }

    #[tokio::test]
    async fn test_annotate_response_applies_conditional_rule() {
        let pipeline = pipeline();
        let report = pipeline
            .run(&TrialQuery::new("NCT00000001"), None)
            .await
            .unwrap();

        let annotation = pipeline.annotate_response(
            &report,
            "Study Status: Withdrawn\nPhase: II\nClassification: Other\n\
             Delivery Mode: Oral\nOutcome: Recruiting\nReason for Failure: Toxic/Unsafe\nPeptide: no",
        );
        assert_eq!(annotation.outcome.to_string(), "Recruiting");
        assert_eq!(annotation.failure_reason.to_string(), "N/A");
        assert!(annotation.warnings.iter().any(|w| w.contains("overridden")));
    }
}
