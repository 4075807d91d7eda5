//! Annotation extraction and validation
//!
//! `RawAnnotation` holds unvalidated per-field strings, derived either
//! from the aggregated record or from an external model's text answer.
//! Both paths go through `validate`, which never fails: every field ends
//! as a vocabulary member, with a warning for each substitution.

use super::normalize::{join_phases, normalize_field, normalize_phases};
use super::vocab::{
    Classification, DeliveryMode, FailureReason, Outcome, Phase, StudyStatus, Vocabulary,
};
use crate::aggregator::AggregatedRecord;
use crate::quality::{AnnotationTask, QualityBand, QualityScore};
use serde::{Deserialize, Serialize};

/// Unvalidated annotation fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAnnotation {
    pub study_status: Option<String>,
    pub phases: Option<String>,
    pub classification: Option<String>,
    pub delivery_mode: Option<String>,
    pub outcome: Option<String>,
    pub failure_reason: Option<String>,
    pub peptide: Option<String>,
}

/// Validated annotation of one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub study_status: StudyStatus,
    pub phases: Vec<Phase>,
    pub classification: Classification,
    pub delivery_mode: DeliveryMode,
    pub outcome: Outcome,
    pub failure_reason: FailureReason,
    pub peptide: bool,
    pub warnings: Vec<String>,
}

impl AnnotationRecord {
    /// Raw form that validates back to the same values
    pub fn to_raw(&self) -> RawAnnotation {
        RawAnnotation {
            study_status: Some(self.study_status.label().to_string()),
            phases: Some(join_phases(&self.phases)),
            classification: Some(self.classification.label().to_string()),
            delivery_mode: Some(self.delivery_mode.label().to_string()),
            outcome: Some(self.outcome.label().to_string()),
            failure_reason: Some(self.failure_reason.label().to_string()),
            peptide: Some(if self.peptide { "True" } else { "False" }.to_string()),
        }
    }
}

// ============================================================================
// Derivation from the aggregated record
// ============================================================================

const INFECTION_TERMS: &[&str] = &[
    "infection", "infectious", "sepsis", "septic", "bacteremia", "bacterial", "pneumonia",
    "tuberculosis", "fungal", "candida", "viral", "hiv", "hepatitis", "osteomyelitis",
    "cellulitis", "abscess", "impetigo", "staphylococc", "pseudomonas", "mrsa",
];

const ANTIMICROBIAL_TERMS: &[&str] = &[
    "antimicrobial", "antibacterial", "antibiotic", "antifungal", "antiviral",
    "bactericidal", "host defense peptide", "host defence peptide",
];

/// Abbreviations that only count as whole words ("amp" but not "amputation")
const ANTIMICROBIAL_ABBREVIATIONS: &[&str] = &["amp", "amps"];

const INJECTION_TERMS: &[&str] = &[
    "inject", "infusion", "intravenous", "subcutaneous", "intramuscular", "intradermal",
    "intravitreal", "intrathecal", "bolus", "syringe", "i.v.", "s.c.",
];

const TOPICAL_TERMS: &[&str] = &[
    "topical", "cream", "gel", "ointment", "dressing", "cutaneous", "dermal", "lotion",
    "mouthwash", "mouth rinse", "eye drop", "nasal spray", "inhal",
];

const ORAL_TERMS: &[&str] = &["oral", "tablet", "capsule", "by mouth", "syrup", "per os"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| contains_word_prefix(haystack, n))
}

/// `needle` occurs at a word start (so "amp" does not match "example")
fn contains_word_prefix(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// `needle` occurs as a whole word
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == needle)
}

/// Peptide drug names conventionally end in "-tide"; nucleotides do not count
fn has_peptide_name(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|w| w.len() > 5 && w.ends_with("tide") && !w.ends_with("nucleotide"))
}

impl RawAnnotation {
    /// Rule-based derivation from aggregated source data
    ///
    /// Fields without supporting data stay `None`.
    pub fn from_record(record: &AggregatedRecord) -> Self {
        let study_status = record.text("overall_status");

        let phases = {
            let phases = record.strings("phases");
            (!phases.is_empty()).then(|| phases.join("|"))
        };

        let drug_text = [
            record.strings("interventions"),
            record.strings("products"),
            record.strings("keywords"),
        ]
        .concat()
        .join(" ")
        .to_lowercase();
        let summary = record.text("brief_summary").unwrap_or_default().to_lowercase();
        let evidence = format!("{} {}", drug_text, summary);

        let peptide = (!evidence.trim().is_empty()).then(|| {
            let is_peptide = evidence.contains("peptide") || has_peptide_name(&drug_text);
            let label = if is_peptide { "True" } else { "False" };
            label.to_string()
        });

        let classification = peptide.as_deref().map(|p| {
            let conditions = record.strings("conditions").join(" ").to_lowercase();
            let infection = contains_any(&conditions, INFECTION_TERMS);
            let antimicrobial = contains_any(&evidence, ANTIMICROBIAL_TERMS)
                || ANTIMICROBIAL_ABBREVIATIONS
                    .iter()
                    .any(|a| contains_word(&evidence, a));
            let label = match (p == "True", antimicrobial || infection, infection) {
                (true, true, true) => Classification::AmpInfection,
                (true, true, false) => Classification::AmpOther,
                _ => Classification::Other,
            };
            label.label().to_string()
        });

        let delivery_mode = derive_delivery_mode(record);
        let outcome = study_status
            .as_deref()
            .map(|status| derive_outcome(status, record).label().to_string());
        let failure_reason = record.text("why_stopped").map(|why| derive_failure_reason(&why));

        Self {
            study_status,
            phases,
            classification,
            delivery_mode,
            outcome,
            failure_reason,
            peptide,
        }
    }

    /// Parse an external model answer of `Field: value` lines
    ///
    /// Keys are matched case-insensitively ignoring spaces, underscores and
    /// markdown emphasis; unknown keys are ignored and the first occurrence
    /// of a key wins.
    pub fn parse_response(text: &str) -> Self {
        let mut raw = RawAnnotation::default();

        for line in text.lines() {
            let line = line.trim().trim_start_matches(['-', '*', '•', '#', ' ']);
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key: String = key
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            let value = value.trim().trim_matches(['*', '"', '`', '\'']).trim();
            let value = value.strip_suffix('.').unwrap_or(value).trim();
            if value.is_empty() {
                continue;
            }

            let slot = match key.as_str() {
                "studystatus" | "status" | "overallstatus" => &mut raw.study_status,
                "phase" | "phases" => &mut raw.phases,
                "classification" => &mut raw.classification,
                "deliverymode" | "delivery" | "route" => &mut raw.delivery_mode,
                "outcome" => &mut raw.outcome,
                "failurereason" | "reasonforfailure" => &mut raw.failure_reason,
                "peptide" => &mut raw.peptide,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        raw
    }
}

fn derive_delivery_mode(record: &AggregatedRecord) -> Option<String> {
    // openFDA route names are authoritative when present
    let routes = record.strings("routes").join(" ").to_lowercase();
    let descriptions = [
        record.strings("intervention_descriptions"),
        record.strings("interventions"),
    ]
    .concat()
    .join(" ")
    .to_lowercase();

    for text in [routes, descriptions] {
        if text.trim().is_empty() {
            continue;
        }
        let mode = if contains_any(&text, INJECTION_TERMS) {
            DeliveryMode::InjectionInfusion
        } else if contains_any(&text, TOPICAL_TERMS) {
            DeliveryMode::Topical
        } else if contains_any(&text, ORAL_TERMS) {
            DeliveryMode::Oral
        } else {
            continue;
        };
        return Some(mode.label().to_string());
    }

    record
        .is_present("interventions")
        .then(|| DeliveryMode::Other.label().to_string())
}

/// Map registry status (plus result evidence) to an outcome
fn derive_outcome(status: &str, record: &AggregatedRecord) -> Outcome {
    let status: StudyStatus = normalize_field(Some(status), &mut Vec::new());
    match status {
        StudyStatus::Recruiting
        | StudyStatus::NotYetRecruiting
        | StudyStatus::EnrollingByInvitation => Outcome::Recruiting,
        StudyStatus::ActiveNotRecruiting => Outcome::ActiveNotRecruiting,
        StudyStatus::Terminated => Outcome::Terminated,
        StudyStatus::Withdrawn => Outcome::Withdrawn,
        StudyStatus::Completed => {
            let has_evidence = record.bool("has_results") == Some(true)
                || record.is_present("publications")
                || record.is_present("pmc_ids");
            if has_evidence {
                Outcome::Positive
            } else {
                Outcome::Unknown
            }
        }
        _ => Outcome::Unknown,
    }
}

/// Map free-text stop reason to a failure category; unmatched text is
/// passed through for the validator to reject
fn derive_failure_reason(why_stopped: &str) -> String {
    let why = why_stopped.to_lowercase();
    let reason = if why.contains("covid") || why.contains("pandemic") || why.contains("sars-cov") {
        Some(FailureReason::Covid)
    } else if ["enrol", "recruit", "accrual", "participants"].iter().any(|t| why.contains(t)) {
        Some(FailureReason::Recruitment)
    } else if ["safety", "toxic", "adverse", "side effect"].iter().any(|t| why.contains(t)) {
        Some(FailureReason::Toxic)
    } else if ["efficacy", "futility", "ineffective", "lack of effect", "no benefit"]
        .iter()
        .any(|t| why.contains(t))
    {
        Some(FailureReason::Ineffective)
    } else if ["fund", "sponsor", "business", "financial", "commercial", "strategic", "company"]
        .iter()
        .any(|t| why.contains(t))
    {
        Some(FailureReason::Business)
    } else {
        None
    };
    reason
        .map(|r| r.label().to_string())
        .unwrap_or_else(|| why_stopped.trim().to_string())
}

// ============================================================================
// Validation
// ============================================================================

fn parse_peptide(raw: Option<&str>, warnings: &mut Vec<String>) -> bool {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        warnings.push("peptide: no value available; using \"False\"".to_string());
        return false;
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "peptide" => true,
        "false" | "no" | "n" | "0" | "not peptide" => false,
        _ => {
            warnings.push(format!(
                "peptide: rejected value \"{}\" (allowed: True, False); using \"False\"",
                raw
            ));
            false
        }
    }
}

/// Validate and normalize every field
pub fn validate(raw: &RawAnnotation) -> AnnotationRecord {
    let mut warnings = Vec::new();

    let study_status = normalize_field(raw.study_status.as_deref(), &mut warnings);
    let phases = normalize_phases(raw.phases.as_deref(), &mut warnings);
    let classification = normalize_field(raw.classification.as_deref(), &mut warnings);
    let delivery_mode = normalize_field(raw.delivery_mode.as_deref(), &mut warnings);
    let outcome: Outcome = normalize_field(raw.outcome.as_deref(), &mut warnings);

    let failure_reason = if outcome.is_failure() {
        normalize_field(raw.failure_reason.as_deref(), &mut warnings)
    } else {
        let mut ignored = Vec::new();
        let stated: FailureReason = normalize_field(raw.failure_reason.as_deref(), &mut ignored);
        if stated != FailureReason::NotApplicable {
            warnings.push(format!(
                "failure_reason: \"{}\" overridden to \"N/A\" because outcome is \"{}\"",
                stated.label(),
                outcome.label()
            ));
        }
        FailureReason::NotApplicable
    };

    let peptide = parse_peptide(raw.peptide.as_deref(), &mut warnings);

    AnnotationRecord {
        study_status,
        phases,
        classification,
        delivery_mode,
        outcome,
        failure_reason,
        peptide,
        warnings,
    }
}

/// Quality warnings, prepended to the validation warnings
fn quality_warnings(record: &AggregatedRecord, score: &QualityScore) -> Vec<String> {
    let mut warnings = Vec::new();
    if !record.has_data() {
        warnings.push("no source returned data".to_string());
    }
    let band = score.source_band();
    if band <= QualityBand::Fair {
        warnings.push(format!(
            "source quality {} ({:.2}): annotation rests on limited sources",
            band, score.source_score
        ));
    }
    for task in AnnotationTask::ALL {
        if score.field_band(task) == Some(QualityBand::Poor) {
            warnings.push(format!(
                "{}: field evidence poor ({:.2})",
                task,
                score.field_scores.get(&task).copied().unwrap_or_default()
            ));
        }
    }
    warnings
}

/// Derive, validate and annotate quality for one aggregated record
///
/// Pure: the same inputs always produce the same record.
pub fn extract(record: &AggregatedRecord, score: &QualityScore) -> AnnotationRecord {
    let mut annotation = validate(&RawAnnotation::from_record(record));
    let mut warnings = quality_warnings(record, score);
    warnings.append(&mut annotation.warnings);
    annotation.warnings = warnings;
    annotation
}

/// Validate an external model answer against the same record's quality
pub fn extract_from_response(
    text: &str,
    record: &AggregatedRecord,
    score: &QualityScore,
) -> AnnotationRecord {
    let mut annotation = validate(&RawAnnotation::parse_response(text));
    let mut warnings = quality_warnings(record, score);
    warnings.append(&mut annotation.warnings);
    annotation.warnings = warnings;
    annotation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::quality::{score, WeightStore};
    use crate::types::{SourceKind, SourcePayload, SourceResult};
    use serde_json::{json, Map, Value};

    fn record(fields: Value) -> AggregatedRecord {
        let data: Map<String, Value> = serde_json::from_value(fields).unwrap();
        aggregate(
            "NCT04043065",
            vec![SourceResult::ok(
                "clinical_trials",
                SourceKind::Registry,
                SourcePayload::new(data, 1),
            )],
            &WeightStore::new().source_weights(),
        )
    }

    fn raw(outcome: &str, failure_reason: &str) -> RawAnnotation {
        RawAnnotation {
            study_status: Some("TERMINATED".into()),
            phases: Some("PHASE2".into()),
            classification: Some("Other".into()),
            delivery_mode: Some("Oral".into()),
            outcome: Some(outcome.into()),
            failure_reason: Some(failure_reason.into()),
            peptide: Some("False".into()),
        }
    }

    #[test]
    fn test_valid_raw_has_no_warnings() {
        let annotation = validate(&raw("Terminated", "Business reasons"));
        assert_eq!(annotation.outcome, Outcome::Terminated);
        assert_eq!(annotation.failure_reason, FailureReason::Business);
        assert!(annotation.warnings.is_empty(), "{:?}", annotation.warnings);
    }

    #[test]
    fn test_failure_reason_forced_na_for_non_failure_outcome() {
        for outcome in ["Positive", "Recruiting", "Active, not recruiting", "Unknown", "garbage"] {
            let annotation = validate(&raw(outcome, "Toxic/Unsafe"));
            assert_eq!(annotation.failure_reason, FailureReason::NotApplicable, "{}", outcome);
            assert!(annotation
                .warnings
                .iter()
                .any(|w| w.contains("overridden to \"N/A\"")));
        }
    }

    #[test]
    fn test_failure_reason_kept_for_failure_outcomes() {
        for outcome in ["Terminated", "Withdrawn", "Failed - completed trial"] {
            let annotation = validate(&raw(outcome, "recruitment"));
            assert_eq!(annotation.failure_reason, FailureReason::Recruitment, "{}", outcome);
        }
    }

    #[test]
    fn test_to_raw_round_trip() {
        let annotation = validate(&raw("Withdrawn", "Due to covid"));
        let again = validate(&annotation.to_raw());
        assert_eq!(again, annotation);
    }

    #[test]
    fn test_parse_response() {
        let text = "\
Here is the annotation:
**Study Status:** COMPLETED
- Phase: Phase 1 and 2
Classification: AMP(infection)
Delivery Mode: \"Topical\"
Outcome: Positive.
Reason for Failure: N/A
Peptide: True
Outcome: Terminated
Notes: none";
        let raw = RawAnnotation::parse_response(text);
        assert_eq!(raw.study_status.as_deref(), Some("COMPLETED"));
        assert_eq!(raw.phases.as_deref(), Some("Phase 1 and 2"));
        assert_eq!(raw.classification.as_deref(), Some("AMP(infection)"));
        assert_eq!(raw.delivery_mode.as_deref(), Some("Topical"));
        assert_eq!(raw.outcome.as_deref(), Some("Positive"), "first occurrence wins");
        assert_eq!(raw.failure_reason.as_deref(), Some("N/A"));
        assert_eq!(raw.peptide.as_deref(), Some("True"));

        let annotation = validate(&raw);
        assert_eq!(annotation.phases, vec![Phase::Phase1, Phase::Phase2]);
        assert!(annotation.peptide);
        assert!(annotation.warnings.is_empty(), "{:?}", annotation.warnings);
    }

    #[test]
    fn test_from_record_derivation() {
        let record = record(json!({
            "overall_status": "TERMINATED",
            "why_stopped": "Slow enrollment",
            "phases": ["PHASE1", "PHASE2"],
            "conditions": ["Diabetic Foot Infection"],
            "interventions": ["Pexiganan cream"],
            "intervention_descriptions": ["Applied topically to the ulcer"],
            "keywords": ["antimicrobial peptide"]
        }));
        let raw = RawAnnotation::from_record(&record);

        assert_eq!(raw.study_status.as_deref(), Some("TERMINATED"));
        assert_eq!(raw.phases.as_deref(), Some("PHASE1|PHASE2"));
        assert_eq!(raw.outcome.as_deref(), Some("Terminated"));
        assert_eq!(raw.failure_reason.as_deref(), Some("Recruitment issues"));
        assert_eq!(raw.delivery_mode.as_deref(), Some("Topical"));
        assert_eq!(raw.peptide.as_deref(), Some("True"));
        assert_eq!(raw.classification.as_deref(), Some("AMP(infection)"));
    }

    #[test]
    fn test_openfda_route_preferred() {
        let record = record(json!({
            "routes": ["INTRAVENOUS"],
            "interventions": ["Drug X tablet"]
        }));
        let raw = RawAnnotation::from_record(&record);
        assert_eq!(raw.delivery_mode.as_deref(), Some("Injection/Infusion"));
    }

    #[test]
    fn test_completed_outcome_depends_on_evidence() {
        let without = record(json!({ "overall_status": "COMPLETED", "has_results": false }));
        assert_eq!(
            RawAnnotation::from_record(&without).outcome.as_deref(),
            Some("Unknown")
        );
        let with = record(json!({ "overall_status": "COMPLETED", "has_results": true }));
        assert_eq!(
            RawAnnotation::from_record(&with).outcome.as_deref(),
            Some("Positive")
        );
    }

    #[test]
    fn test_word_prefix_matching() {
        assert!(contains_word_prefix("an amp study", "amp"));
        assert!(!contains_word_prefix("for example", "amp"));
        assert!(contains_word_prefix("injection site", "inject"));
        assert!(has_peptide_name("liraglutide injection"));
        assert!(!has_peptide_name("tide pods"));
    }

    #[test]
    fn test_nucleotides_and_amp_lookalikes_not_flagged() {
        assert!(!has_peptide_name("antisense oligonucleotide"));
        assert!(!has_peptide_name("nucleotide analogue"));
        assert!(has_peptide_name("octreotide"));

        assert!(contains_word("an amp study", "amp"));
        assert!(!contains_word("below-knee amputation", "amp"));
        assert!(!contains_word("single-dose ampoule", "amp"));

        let record = record(json!({
            "interventions": ["Oligonucleotide", "Saline ampoule"],
            "conditions": ["Amputation"],
            "brief_summary": "Wound care after amputation"
        }));
        let raw = RawAnnotation::from_record(&record);
        assert_eq!(raw.peptide.as_deref(), Some("False"));
        assert_eq!(raw.classification.as_deref(), Some("Other"));
    }

    #[test]
    fn test_extract_is_idempotent() {
        let store = WeightStore::new();
        let record = record(json!({
            "overall_status": "Recruiting",
            "why_stopped": "Sponsor decision",
            "interventions": ["Placebo"]
        }));
        let quality = score(&record, &store.snapshot());

        let first = extract(&record, &quality);
        let second = extract(&record, &quality);
        assert_eq!(first, second);
        assert_eq!(first.outcome, Outcome::Recruiting);
        assert_eq!(first.failure_reason, FailureReason::NotApplicable);
    }

    #[test]
    fn test_empty_record_warns() {
        let store = WeightStore::new();
        let record = aggregate("NCT1", Vec::new(), &store.source_weights());
        let annotation = extract(&record, &score(&record, &store.snapshot()));

        assert_eq!(annotation.warnings[0], "no source returned data");
        assert_eq!(annotation.study_status, StudyStatus::Unknown);
        assert_eq!(annotation.phases, vec![Phase::Unknown]);
        assert!(!annotation.peptide);
    }
}
