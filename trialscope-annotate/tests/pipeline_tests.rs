//! End-to-end pipeline tests against stub sources

mod helpers;

use helpers::{completed_trial_sources, pipeline_with, Stub, StubSource};
use serde_json::json;
use trialscope_annotate::aggregator::aggregate;
use trialscope_annotate::annotation::vocab::{
    Classification, DeliveryMode, FailureReason, Outcome, Phase, StudyStatus, Vocabulary,
};
use trialscope_annotate::annotation::{extract, normalize_field, normalize_phases, validate, RawAnnotation};
use trialscope_annotate::quality::{score, score_sources, WeightStore};
use trialscope_annotate::types::{SourceKind, SourceStatus, TrialQuery};
use trialscope_common::events::{EventBus, SearchEvent};

fn query() -> TrialQuery {
    TrialQuery::new("NCT04043065").with_title("A Leap to Understand the Effect of Peptide Therapy")
}

#[tokio::test]
async fn test_completed_trial_scenario() {
    let pipeline = pipeline_with(completed_trial_sources(), EventBus::new(64));
    let report = pipeline.run(&query(), None).await.unwrap();

    assert_eq!(report.sources["clinical_trials"].status, SourceStatus::Ok);
    assert_eq!(report.sources["pubmed"].status, SourceStatus::NotFound);
    assert_eq!(report.sources["pmc"].status, SourceStatus::Ok);
    assert_eq!(report.sources["pmc"].hit_count, 2);

    let annotation = &report.annotation;
    assert_eq!(annotation.study_status, StudyStatus::Completed);
    assert!(matches!(
        annotation.outcome,
        Outcome::Positive | Outcome::ActiveNotRecruiting | Outcome::Unknown
    ));
    // PMC articles count as published evidence
    assert_eq!(annotation.outcome, Outcome::Positive);
    assert_eq!(annotation.failure_reason, FailureReason::NotApplicable);
    assert_eq!(annotation.phases, vec![Phase::Phase1, Phase::Phase2]);

    // clinical_trials 0.40 + pmc 0.15
    assert!((report.quality.source_score - 0.55).abs() < 1e-9);
}

#[tokio::test]
async fn test_partial_failures_keep_every_result() {
    let clients = vec![
        StubSource::shared(
            "clinical_trials",
            SourceKind::Registry,
            Stub::Data(json!({ "overall_status": "RECRUITING" }), 1),
        ),
        StubSource::shared("pubmed", SourceKind::Literature, Stub::Fail),
        StubSource::shared(
            "pmc",
            SourceKind::Literature,
            Stub::Data(json!({ "pmc_ids": ["PMC1"] }), 1),
        ),
        StubSource::shared(
            "openfda",
            SourceKind::DrugSafety,
            Stub::Data(json!({ "routes": ["ORAL"] }), 1),
        ),
        StubSource::shared("web_search", SourceKind::WebSearch, Stub::Fail),
    ];
    let pipeline = pipeline_with(clients, EventBus::new(64));

    let results = pipeline.registry().search_all(&query(), None).await.unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results.values().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(results["pubmed"].status, SourceStatus::Error);
    assert_eq!(results["web_search"].status, SourceStatus::Error);

    let weights = WeightStore::new();
    let record = aggregate("NCT04043065", results.into_values(), &weights.source_weights());
    let source_score = score_sources(&record, &weights.source_weights());
    // clinical_trials 0.40 + pmc 0.15 + openfda 0.15
    assert!((source_score - 0.70).abs() < 1e-9);
}

#[tokio::test]
async fn test_hanging_source_recorded_as_timeout() {
    let mut clients = completed_trial_sources();
    clients.push(StubSource::shared("web_search", SourceKind::WebSearch, Stub::Hang));
    let pipeline = pipeline_with(clients, EventBus::new(64));

    let report = pipeline.run(&query(), None).await.unwrap();
    assert_eq!(report.sources.len(), 4);
    assert_eq!(report.sources["web_search"].status, SourceStatus::Timeout);
    assert_eq!(report.sources["clinical_trials"].status, SourceStatus::Ok);
}

#[tokio::test]
async fn test_source_selection() {
    let pipeline = pipeline_with(completed_trial_sources(), EventBus::new(64));

    let only = vec!["pmc".to_string(), "nonexistent".to_string()];
    let report = pipeline.run(&query(), Some(only.as_slice())).await.unwrap();
    assert_eq!(report.sources.keys().collect::<Vec<_>>(), vec!["pmc"]);

    let unknown = vec!["nonexistent".to_string()];
    assert!(pipeline.run(&query(), Some(unknown.as_slice())).await.is_err());
}

#[tokio::test]
async fn test_progress_events_published() {
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let pipeline = pipeline_with(completed_trial_sources(), bus);

    pipeline.run(&query(), None).await.unwrap();

    let mut completed_sources = 0;
    let mut finished = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            SearchEvent::SourceCompleted { .. } => completed_sources += 1,
            SearchEvent::SearchCompleted { .. } => finished = true,
            _ => {}
        }
    }
    assert_eq!(completed_sources, 3);
    assert!(finished);
}

#[tokio::test]
async fn test_extract_is_idempotent() {
    let pipeline = pipeline_with(completed_trial_sources(), EventBus::new(64));
    let results = pipeline.registry().search_all(&query(), None).await.unwrap();

    let weights = WeightStore::new();
    let snapshot = weights.snapshot();
    let record = aggregate("NCT04043065", results.into_values(), &snapshot.sources);
    let quality = score(&record, &snapshot);

    let first = extract(&record, &quality);
    let second = extract(&record, &quality);
    assert_eq!(first, second);

    let revalidated = validate(&first.to_raw());
    assert_eq!(revalidated.study_status, first.study_status);
    assert_eq!(revalidated.phases, first.phases);
    assert_eq!(revalidated.outcome, first.outcome);
    assert_eq!(revalidated.failure_reason, first.failure_reason);
    assert!(revalidated.warnings.is_empty(), "{:?}", revalidated.warnings);
}

fn assert_exact_round_trip<V: Vocabulary>() {
    for member in V::members() {
        let mut warnings = Vec::new();
        let value: V = normalize_field(Some(member.label()), &mut warnings);
        assert_eq!(value, *member);
        assert!(warnings.is_empty(), "{}: {:?}", member.label(), warnings);
    }
}

#[test]
fn test_every_vocabulary_member_round_trips() {
    assert_exact_round_trip::<StudyStatus>();
    assert_exact_round_trip::<Phase>();
    assert_exact_round_trip::<Classification>();
    assert_exact_round_trip::<DeliveryMode>();
    assert_exact_round_trip::<Outcome>();
    assert_exact_round_trip::<FailureReason>();
}

#[test]
fn test_failure_reason_requires_failed_outcome() {
    for outcome in Outcome::members() {
        let raw = RawAnnotation {
            outcome: Some(outcome.label().to_string()),
            failure_reason: Some("Toxic/Unsafe".to_string()),
            ..Default::default()
        };
        let record = validate(&raw);
        if outcome.is_failure() {
            assert_eq!(record.failure_reason.label(), "Toxic/Unsafe");
        } else {
            assert_eq!(record.failure_reason, FailureReason::NotApplicable);
        }
    }
}

#[test]
fn test_phase_spellings() {
    let mut warnings = Vec::new();
    assert_eq!(normalize_phases(Some("Phase 1"), &mut warnings), vec![Phase::Phase1]);
    assert!(warnings.is_empty());

    let phases = normalize_phases(Some("Phase 1 and 2"), &mut warnings);
    assert_eq!(phases, vec![Phase::Phase1, Phase::Phase2]);
    assert!(warnings.is_empty());
}
