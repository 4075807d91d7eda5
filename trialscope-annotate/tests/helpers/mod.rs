//! Test Helper Utilities
//!
//! Stub source clients and pipeline builders shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use trialscope_annotate::prompt::PromptBuilder;
use trialscope_annotate::quality::WeightStore;
use trialscope_annotate::sources::SourceRegistry;
use trialscope_annotate::types::{
    SourceClient, SourceError, SourceKind, SourcePayload, TrialQuery,
};
use trialscope_annotate::{AnnotationPipeline, AppState};
use trialscope_common::events::EventBus;

/// Canned response of a stub source
#[derive(Clone)]
pub enum Stub {
    /// Payload with the given hit count
    Data(Value, usize),
    /// Provider answered with no records
    Empty,
    /// Transport failure
    Fail,
    /// Never answers
    Hang,
}

pub struct StubSource {
    name: &'static str,
    kind: SourceKind,
    stub: Stub,
}

impl StubSource {
    pub fn new(name: &'static str, kind: SourceKind, stub: Stub) -> Self {
        Self { name, kind, stub }
    }

    pub fn shared(name: &'static str, kind: SourceKind, stub: Stub) -> Arc<dyn SourceClient> {
        Arc::new(Self::new(name, kind, stub))
    }
}

#[async_trait]
impl SourceClient for StubSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(200)
    }

    async fn search(&self, _query: &TrialQuery) -> Result<SourcePayload, SourceError> {
        match &self.stub {
            Stub::Data(value, hits) => {
                let data: Map<String, Value> = value.as_object().cloned().unwrap_or_default();
                Ok(SourcePayload::new(data, *hits))
            }
            Stub::Empty => Ok(SourcePayload::default()),
            Stub::Fail => Err(SourceError::Network("connection refused".to_string())),
            Stub::Hang => std::future::pending().await,
        }
    }
}

pub fn pipeline_with(clients: Vec<Arc<dyn SourceClient>>, bus: EventBus) -> AnnotationPipeline {
    AnnotationPipeline::new(
        SourceRegistry::new(clients, bus).with_overall_timeout(Duration::from_secs(2)),
        Arc::new(WeightStore::new()),
        PromptBuilder::new(12_000),
    )
}

/// clinical_trials ok (COMPLETED), pubmed not found, pmc ok with 2 hits
pub fn completed_trial_sources() -> Vec<Arc<dyn SourceClient>> {
    vec![
        StubSource::shared(
            "clinical_trials",
            SourceKind::Registry,
            Stub::Data(
                serde_json::json!({
                    "nct_id": "NCT04043065",
                    "title": "A Leap to Understand the Effect of Peptide Therapy",
                    "overall_status": "COMPLETED",
                    "phases": ["PHASE1", "PHASE2"],
                    "conditions": ["Healthy Volunteers"],
                    "interventions": ["Leuprolide"],
                    "intervention_types": ["DRUG"],
                    "has_results": false
                }),
                1,
            ),
        ),
        StubSource::shared("pubmed", SourceKind::Literature, Stub::Empty),
        StubSource::shared(
            "pmc",
            SourceKind::Literature,
            Stub::Data(
                serde_json::json!({
                    "pmc_ids": ["PMC7000001", "PMC7000002"],
                    "pmc_article_count": 2
                }),
                2,
            ),
        ),
    ]
}

pub fn test_app_state(clients: Vec<Arc<dyn SourceClient>>) -> AppState {
    let bus = EventBus::new(100);
    let pipeline = Arc::new(pipeline_with(clients, bus.clone()));
    AppState::new(pipeline, bus)
}
