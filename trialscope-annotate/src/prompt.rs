//! Instruction payload for an external language model
//!
//! The system part fixes the answer format (`Field: value` lines using the
//! permitted vocabulary) so the answer can be fed back through
//! `RawAnnotation::parse_response`. The user part carries the aggregated
//! evidence and is cut to fit `max_chars`.

use crate::aggregator::AggregatedRecord;
use crate::annotation::vocab::{
    Classification, DeliveryMode, FailureReason, Outcome, Phase, StudyStatus, Vocabulary,
};
use crate::quality::{QualityBand, QualityScore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;

const TRUNCATION_MARKER: &str = "\n[evidence truncated]";

/// Prompt ready for an inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionPayload {
    pub system: String,
    pub user: String,
    /// Evidence was cut to respect the size limit
    pub truncated: bool,
}

pub struct PromptBuilder {
    max_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn build(
        &self,
        record: &AggregatedRecord,
        score: &QualityScore,
        warnings: &[String],
    ) -> InstructionPayload {
        let system = system_prompt(score.source_band());
        let user = evidence_text(record, score, warnings);

        let budget = self.max_chars.saturating_sub(system.chars().count());
        let (user, truncated) = truncate_chars(&user, budget);

        InstructionPayload {
            system,
            user,
            truncated,
        }
    }
}

fn caution(band: QualityBand) -> &'static str {
    match band {
        QualityBand::Excellent => "The evidence below comes from several reliable sources.",
        QualityBand::Good => "The evidence below is mostly complete; minor gaps are possible.",
        QualityBand::Fair => {
            "The evidence below is limited. Prefer \"Unknown\" when a field is not clearly supported."
        }
        QualityBand::Poor => {
            "The evidence below is very sparse. Answer \"Unknown\" (or \"N/A\") unless a value is stated explicitly."
        }
    }
}

fn allowed_line<V: Vocabulary>(name: &str) -> String {
    format!("{}: one of {}", name, V::allowed().join(" | "))
}

fn system_prompt(band: QualityBand) -> String {
    let mut prompt = String::from(
        "You annotate clinical trials. Use only the evidence provided. \
         Answer with exactly one line per field in the form `Field: value`, \
         using only the permitted values.\n",
    );
    prompt.push_str(caution(band));
    prompt.push_str("\n\nFields:\n");
    for line in [
        allowed_line::<StudyStatus>("Study Status"),
        allowed_line::<Phase>("Phase (several allowed, separated by |)"),
        allowed_line::<Classification>("Classification"),
        allowed_line::<DeliveryMode>("Delivery Mode"),
        allowed_line::<Outcome>("Outcome"),
        allowed_line::<FailureReason>("Reason for Failure"),
        "Peptide: True | False".to_string(),
    ] {
        prompt.push_str("- ");
        prompt.push_str(&line);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nReason for Failure must be N/A unless Outcome is Terminated, Withdrawn \
         or Failed - completed trial.\n",
    );
    prompt
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => map
                    .get("title")
                    .map(render_value)
                    .unwrap_or_else(|| item.to_string()),
                other => render_value(other),
            })
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

fn evidence_text(record: &AggregatedRecord, score: &QualityScore, warnings: &[String]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Trial: {}", record.trial_id());
    let _ = writeln!(
        text,
        "Source quality: {} ({:.2})",
        score.source_band(),
        score.source_score
    );

    text.push_str("\nSources:\n");
    for (name, result) in &record.raw_sources {
        let _ = writeln!(text, "- {}: {} ({} hits)", name, result.status, result.hit_count);
    }

    if !warnings.is_empty() {
        text.push_str("\nWarnings:\n");
        for warning in warnings {
            let _ = writeln!(text, "- {}", warning);
        }
    }

    text.push_str("\nEvidence:\n");
    for (field, value) in &record.fields {
        let _ = writeln!(
            text,
            "{} [{}]: {}",
            field,
            value.source,
            render_value(&value.value)
        );
    }
    text
}

/// Cut `text` to at most `max` characters including the marker
fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    if text.chars().count() <= max {
        return (text.to_string(), false);
    }
    let keep = max.saturating_sub(TRUNCATION_MARKER.chars().count());
    let cut: String = text.chars().take(keep).collect();
    (format!("{}{}", cut, TRUNCATION_MARKER), true)
}
