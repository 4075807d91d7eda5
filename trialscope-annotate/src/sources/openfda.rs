//! openFDA Client (drug safety)
//!
//! Looks up drug labels for the trial's intervention names and reports the
//! administration routes and product names found.
//!
//! # API Reference
//! - Endpoint: https://api.fda.gov/drug/label.json
//! - Documentation: https://open.fda.gov/apis/drug/label/

use super::http::{RetryPolicy, SourceHttp};
use super::ClientSettings;
use crate::types::{SourceClient, SourceError, SourceKind, SourcePayload, TrialQuery};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};
use trialscope_common::config::SourceConfig;
use trialscope_common::Result;

pub const SOURCE_NAME: &str = "openfda";

const DEFAULT_BASE_URL: &str = "https://api.fda.gov";

/// Intervention names looked up per query at most
const MAX_INTERVENTIONS: usize = 3;

pub struct OpenFdaClient {
    http: SourceHttp,
    settings: ClientSettings,
}

impl OpenFdaClient {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let settings = ClientSettings::resolve(config, DEFAULT_BASE_URL, 5, 20);
        let http = SourceHttp::new(
            SOURCE_NAME,
            settings.request_timeout,
            RetryPolicy::from_config(config),
            None,
        )?;
        Ok(Self { http, settings })
    }

    async fn labels_for(&self, drug: &str) -> std::result::Result<LabelResponse, SourceError> {
        let url = format!("{}/drug/label.json", self.settings.base_url);
        let mut params = vec![
            ("search", search_expression(drug)),
            ("limit", self.settings.max_hits.to_string()),
        ];
        if let Some(key) = &self.settings.api_key {
            params.push(("api_key", key.clone()));
        }

        match self.http.get_json(&url, &params).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| SourceError::Parse(format!("drug label: {}", e))),
            // openFDA answers 404 when nothing matches
            Err(SourceError::Api { status: 404, .. }) => Ok(LabelResponse::default()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SourceClient for OpenFdaClient {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::DrugSafety
    }

    fn timeout(&self) -> Duration {
        self.settings.unit_timeout
    }

    async fn search(&self, query: &TrialQuery) -> std::result::Result<SourcePayload, SourceError> {
        let drugs: Vec<&str> = query
            .interventions
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .take(MAX_INTERVENTIONS)
            .collect();
        if drugs.is_empty() {
            return Err(SourceError::InsufficientQuery(
                "openFDA lookup needs at least one intervention name".into(),
            ));
        }

        let mut responses = Vec::with_capacity(drugs.len());
        let mut last_error = None;
        for drug in &drugs {
            match self.labels_for(drug).await {
                Ok(response) => {
                    debug!(drug = %drug, labels = response.results.len(), "openFDA label lookup");
                    responses.push(response);
                }
                Err(e) => {
                    warn!(drug = %drug, error = %e, "openFDA label lookup failed");
                    last_error = Some(e);
                }
            }
        }

        // The source fails only when no lookup succeeded
        match last_error {
            Some(e) if responses.is_empty() => Err(e),
            _ => Ok(labels_payload(&responses)),
        }
    }
}

/// Search expression matching generic or brand name
pub fn search_expression(drug: &str) -> String {
    let name = drug.replace('"', "");
    format!(
        "openfda.generic_name:\"{0}\" OR openfda.brand_name:\"{0}\"",
        name
    )
}

/// Merge label responses into the payload
pub fn labels_payload(responses: &[LabelResponse]) -> SourcePayload {
    let mut routes = BTreeSet::new();
    let mut products = BTreeSet::new();
    let mut boxed_warning = false;
    let mut hits = 0;

    for response in responses {
        hits += response.results.len();
        for label in &response.results {
            routes.extend(label.openfda.route.iter().map(|r| r.trim().to_uppercase()));
            products.extend(label.openfda.generic_name.iter().map(|n| n.trim().to_string()));
            products.extend(label.openfda.brand_name.iter().map(|n| n.trim().to_string()));
            boxed_warning |= !label.boxed_warning.is_empty();
        }
    }

    let mut data = Map::new();
    if hits > 0 {
        data.insert("routes".into(), json!(routes));
        data.insert("products".into(), json!(products));
        data.insert("has_boxed_warning".into(), json!(boxed_warning));
        data.insert("label_count".into(), json!(hits));
    }
    SourcePayload::new(data, hits)
}

// ============================================================================
// openFDA API Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct LabelResponse {
    #[serde(default)]
    results: Vec<DrugLabel>,
}

#[derive(Debug, Deserialize)]
struct DrugLabel {
    #[serde(default)]
    openfda: OpenFdaSection,
    #[serde(default)]
    boxed_warning: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenFdaSection {
    #[serde(default)]
    route: Vec<String>,
    #[serde(default)]
    generic_name: Vec<String>,
    #[serde(default)]
    brand_name: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value: serde_json::Value) -> LabelResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_search_expression() {
        assert_eq!(
            search_expression("Colistin \"IV\""),
            "openfda.generic_name:\"Colistin IV\" OR openfda.brand_name:\"Colistin IV\""
        );
    }

    #[test]
    fn test_labels_payload_merges_routes() {
        let responses = vec![
            response(json!({
                "meta": { "results": { "total": 2 } },
                "results": [
                    {
                        "openfda": { "route": ["intravenous"], "generic_name": ["COLISTIMETHATE"] },
                        "boxed_warning": ["Nephrotoxicity"]
                    },
                    { "openfda": { "route": ["INTRAMUSCULAR", "intravenous"], "brand_name": ["Coly-Mycin M"] } }
                ]
            })),
            response(json!({ "results": [ { "openfda": { "route": ["TOPICAL"] } } ] })),
        ];

        let payload = labels_payload(&responses);

        assert_eq!(payload.hit_count, 3);
        assert_eq!(
            payload.data["routes"],
            json!(["INTRAMUSCULAR", "INTRAVENOUS", "TOPICAL"])
        );
        assert_eq!(payload.data["products"], json!(["COLISTIMETHATE", "Coly-Mycin M"]));
        assert_eq!(payload.data["has_boxed_warning"], true);
    }

    #[test]
    fn test_no_labels_is_empty_payload() {
        let payload = labels_payload(&[LabelResponse::default()]);
        assert_eq!(payload.hit_count, 0);
        assert!(payload.data.is_empty());
    }

    #[tokio::test]
    async fn test_requires_interventions() {
        let client = OpenFdaClient::from_config(&SourceConfig::default()).unwrap();
        let result = client.fetch(&TrialQuery::new("NCT1")).await;
        assert_eq!(result.status, crate::types::SourceStatus::NotFound);
    }

    #[tokio::test]
    async fn test_failed_lookup_keeps_other_labels() {
        use axum::{extract::Query, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
        use std::collections::HashMap;

        let router = Router::new().route(
            "/drug/label.json",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let search = params.get("search").cloned().unwrap_or_default();
                if search.contains("Broken") {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                } else {
                    Json(json!({ "results": [ { "openfda": { "route": ["intravenous"] } } ] }))
                        .into_response()
                }
            }),
        );
        let base_url = crate::sources::testing::serve(router).await;
        let config = SourceConfig {
            base_url: Some(base_url),
            max_attempts: Some(1),
            ..Default::default()
        };
        let client = OpenFdaClient::from_config(&config).unwrap();

        let query = TrialQuery::new("NCT1")
            .with_intervention("Colistin")
            .with_intervention("Broken");
        let result = client.fetch(&query).await;
        assert_eq!(result.status, crate::types::SourceStatus::Ok);
        assert_eq!(result.payload["routes"], json!(["INTRAVENOUS"]));

        let only_broken = TrialQuery::new("NCT1").with_intervention("Broken");
        let result = client.fetch(&only_broken).await;
        assert_eq!(result.status, crate::types::SourceStatus::Error);
    }
}
