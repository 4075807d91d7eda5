// Result Aggregator - Field-Wise Weighted Selection
//
// Merges per-source payloads into one record. For each field the value from
// the highest-weighted `ok` source wins; equal weights fall back to the fixed
// source-kind priority and then to the source name, so the merge does not
// depend on completion order.

use crate::quality::weights::SourceWeightTable;
use crate::types::{SourceKind, SourceResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Selected value of one field with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: Value,
    /// Source that supplied `value`
    pub source: String,
}

/// Two or more sources reported different values for a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    /// Winning source
    pub selected: String,
    /// Sources whose differing values lost
    pub overridden: Vec<String>,
}

/// Merged view of one trial across all sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    trial_id: String,
    pub fields: BTreeMap<String, FieldValue>,
    /// Every source result, including failures
    pub raw_sources: BTreeMap<String, SourceResult>,
    #[serde(default)]
    pub conflicts: Vec<FieldConflict>,
}

impl AggregatedRecord {
    pub fn trial_id(&self) -> &str {
        &self.trial_id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).map(|f| &f.value)
    }

    pub fn is_present(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Field rendered as a single string (arrays joined with "; ")
    pub fn text(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Array(items) => {
                let parts = value_strings(items);
                (!parts.is_empty()).then(|| parts.join("; "))
            }
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Field as a list of strings (a scalar string becomes one item)
    pub fn strings(&self, field: &str) -> Vec<String> {
        match self.get(field) {
            Some(Value::String(s)) => vec![s.trim().to_string()],
            Some(Value::Array(items)) => value_strings(items),
            _ => Vec::new(),
        }
    }

    pub fn bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    /// Names of sources with status `ok`
    pub fn ok_sources(&self) -> impl Iterator<Item = &str> {
        self.raw_sources
            .values()
            .filter(|r| r.is_ok())
            .map(|r| r.source_name.as_str())
    }

    pub fn has_data(&self) -> bool {
        self.ok_sources().next().is_some()
    }
}

fn value_strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => map
                .get("title")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Value counts as present: not null, not blank, not an empty container
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

struct Candidate<'a> {
    weight: f64,
    kind: SourceKind,
    source: &'a str,
    value: &'a Value,
}

impl Candidate<'_> {
    /// `Less` means `self` takes precedence
    fn precedence(&self, other: &Candidate<'_>) -> Ordering {
        other
            .weight
            .total_cmp(&self.weight)
            .then(self.kind.cmp(&other.kind))
            .then(self.source.cmp(other.source))
    }
}

/// Merge source results into one record
///
/// Only `ok` payloads contribute field values; every result is kept in
/// `raw_sources`. Sources missing from `weights` weigh 0.
pub fn aggregate(
    trial_id: &str,
    results: impl IntoIterator<Item = SourceResult>,
    weights: &SourceWeightTable,
) -> AggregatedRecord {
    let raw_sources: BTreeMap<String, SourceResult> = results
        .into_iter()
        .map(|r| (r.source_name.clone(), r))
        .collect();

    let mut candidates: BTreeMap<&str, Vec<Candidate<'_>>> = BTreeMap::new();
    for result in raw_sources.values().filter(|r| r.is_ok()) {
        let weight = weights.weight(&result.source_name);
        for (field, value) in &result.payload {
            if !is_present(value) {
                continue;
            }
            candidates.entry(field.as_str()).or_default().push(Candidate {
                weight,
                kind: result.kind,
                source: &result.source_name,
                value,
            });
        }
    }

    let mut fields = BTreeMap::new();
    let mut conflicts = Vec::new();
    for (field, mut group) in candidates {
        group.sort_by(|a, b| a.precedence(b));
        let winner = &group[0];

        let overridden: Vec<String> = group[1..]
            .iter()
            .filter(|c| c.value != winner.value)
            .map(|c| c.source.to_string())
            .collect();
        if !overridden.is_empty() {
            conflicts.push(FieldConflict {
                field: field.to_string(),
                selected: winner.source.to_string(),
                overridden,
            });
        }

        fields.insert(
            field.to_string(),
            FieldValue {
                value: winner.value.clone(),
                source: winner.source.to_string(),
            },
        );
    }

    debug!(
        trial_id = %trial_id,
        fields = fields.len(),
        sources = raw_sources.len(),
        conflicts = conflicts.len(),
        "Aggregation complete"
    );

    AggregatedRecord {
        trial_id: trial_id.to_string(),
        fields,
        raw_sources,
        conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::weights::default_source_weights;
    use crate::types::{SourcePayload, SourceStatus};
    use serde_json::{json, Map};

    fn ok(name: &str, kind: SourceKind, fields: Value) -> SourceResult {
        let data: Map<String, Value> = serde_json::from_value(fields).unwrap();
        SourceResult::ok(name, kind, SourcePayload::new(data, 1))
    }

    #[test]
    fn test_highest_weight_wins() {
        let results = vec![
            ok("web_search", SourceKind::WebSearch, json!({ "title": "Web title" })),
            ok("clinical_trials", SourceKind::Registry, json!({ "title": "Registry title" })),
        ];
        let record = aggregate("NCT1", results, &default_source_weights());

        assert_eq!(record.fields["title"].value, "Registry title");
        assert_eq!(record.fields["title"].source, "clinical_trials");
        assert_eq!(record.conflicts.len(), 1);
        assert_eq!(record.conflicts[0].overridden, vec!["web_search"]);
    }

    #[test]
    fn test_tie_broken_by_kind_then_name() {
        let weights: SourceWeightTable = [("b".to_string(), 0.5), ("a".to_string(), 0.5), ("r".to_string(), 0.5)]
            .into_iter()
            .collect();

        let results = vec![
            ok("b", SourceKind::Literature, json!({ "x": "from b", "y": "from b" })),
            ok("a", SourceKind::Literature, json!({ "x": "from a" })),
            ok("r", SourceKind::WebSearch, json!({ "x": "from r", "y": "from r" })),
        ];
        let record = aggregate("NCT1", results, &weights);

        assert_eq!(record.fields["x"].source, "a");
        assert_eq!(record.fields["y"].source, "b");
    }

    #[test]
    fn test_order_independent() {
        let make = || {
            vec![
                ok("pubmed", SourceKind::Literature, json!({ "title": "P", "pubmed_ids": ["1"] })),
                ok("pmc", SourceKind::Literature, json!({ "title": "M" })),
                ok("clinical_trials", SourceKind::Registry, json!({ "overall_status": "COMPLETED" })),
            ]
        };
        let forward = aggregate("NCT1", make(), &default_source_weights());
        let reversed = aggregate("NCT1", make().into_iter().rev(), &default_source_weights());
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_failures_recorded_but_not_merged() {
        let mut failed = SourceResult::failed("pubmed", SourceKind::Literature, SourceStatus::Error, "503");
        failed.payload.insert("title".into(), json!("stale"));

        let results = vec![
            failed,
            SourceResult::failed("pmc", SourceKind::Literature, SourceStatus::Timeout, "slow"),
        ];
        let record = aggregate("NCT1", results, &default_source_weights());

        assert!(record.fields.is_empty());
        assert_eq!(record.raw_sources.len(), 2);
        assert!(!record.has_data());
    }

    #[test]
    fn test_empty_values_not_present() {
        let results = vec![ok(
            "clinical_trials",
            SourceKind::Registry,
            json!({ "why_stopped": null, "phases": [], "title": "  ", "has_results": false, "enrollment": 0 }),
        )];
        let record = aggregate("NCT1", results, &default_source_weights());

        assert!(!record.is_present("why_stopped"));
        assert!(!record.is_present("phases"));
        assert!(!record.is_present("title"));
        assert_eq!(record.bool("has_results"), Some(false));
        assert!(record.is_present("enrollment"));
    }

    #[test]
    fn test_text_and_strings_helpers() {
        let results = vec![ok(
            "pubmed",
            SourceKind::Literature,
            json!({
                "publications": [ { "pmid": "1", "title": "First paper" } ],
                "conditions": ["Sepsis", " "],
                "status": "COMPLETED"
            }),
        )];
        let record = aggregate("nct9", results, &default_source_weights());

        assert_eq!(record.trial_id(), "nct9");
        assert_eq!(record.strings("publications"), vec!["First paper"]);
        assert_eq!(record.text("conditions").as_deref(), Some("Sepsis"));
        assert_eq!(record.strings("status"), vec!["COMPLETED"]);
        assert!(record.strings("missing").is_empty());
    }
}
