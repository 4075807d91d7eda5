//! PubMed Client (literature)
//!
//! Searches PubMed for publications about a trial, narrowing the query
//! through the ladder when the trial ID alone finds nothing or the title
//! search is too broad.

use super::http::SharedRateLimiter;
use super::ladder::{run_ladder, LadderOutcome, NCBI_SYNTAX};
use super::ncbi::{DocSummary, Eutils};
use crate::types::{SourceClient, SourceError, SourceKind, SourcePayload, TrialQuery};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use trialscope_common::config::SourceConfig;
use trialscope_common::Result;

pub const SOURCE_NAME: &str = "pubmed";

pub struct PubMedClient {
    eutils: Eutils,
}

impl PubMedClient {
    pub fn from_config(config: &SourceConfig, limiter: SharedRateLimiter) -> Result<Self> {
        Ok(Self {
            eutils: Eutils::new(SOURCE_NAME, "pubmed", config, limiter)?,
        })
    }
}

#[async_trait]
impl SourceClient for PubMedClient {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Literature
    }

    fn timeout(&self) -> Duration {
        self.eutils.settings.unit_timeout
    }

    async fn search(&self, query: &TrialQuery) -> std::result::Result<SourcePayload, SourceError> {
        let outcome = run_ladder(
            query,
            &NCBI_SYNTAX,
            self.eutils.settings.max_hits,
            |_stage, term| async move { self.eutils.esearch(&term).await },
        )
        .await?
        .ok_or_else(|| SourceError::NotFound(format!("no PubMed records for {}", query.trial_id)))?;

        let summaries = self.eutils.esummary(&outcome.page.items).await?;
        debug!(
            trial_id = %query.trial_id,
            stage = outcome.stage.as_str(),
            total = outcome.page.total,
            over_broad = outcome.over_broad,
            "PubMed search complete"
        );

        Ok(publications_payload(&outcome, &summaries))
    }
}

/// Build the payload from the ladder outcome and fetched summaries
pub fn publications_payload(outcome: &LadderOutcome<Vec<String>>, summaries: &[DocSummary]) -> SourcePayload {
    let mut data = Map::new();
    data.insert("pubmed_ids".into(), json!(outcome.page.items));
    data.insert("publication_count".into(), json!(outcome.page.total));
    data.insert(
        "publications".into(),
        Value::Array(
            summaries
                .iter()
                .map(|doc| {
                    json!({
                        "pmid": doc.uid,
                        "title": doc.title,
                        "journal": doc.journal,
                        "pub_date": doc.pub_date,
                        "authors": doc.authors,
                    })
                })
                .collect(),
        ),
    );
    data.insert("search_stage".into(), json!(outcome.stage.as_str()));

    SourcePayload::new(data, outcome.page.total).over_broad(outcome.over_broad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::http::rate_limiter;
    use crate::sources::ladder::{NarrowingStage, SearchPage};

    #[test]
    fn test_client_identity() {
        let client = PubMedClient::from_config(&SourceConfig::default(), rate_limiter(3)).unwrap();
        assert_eq!(client.name(), "pubmed");
        assert_eq!(client.kind(), SourceKind::Literature);
    }

    #[test]
    fn test_publications_payload() {
        let outcome = LadderOutcome {
            stage: NarrowingStage::ByTitleAuthor,
            page: SearchPage {
                total: 45,
                items: vec!["111".to_string(), "222".to_string()],
            },
            over_broad: true,
            visited: vec![NarrowingStage::ById, NarrowingStage::ByTitle, NarrowingStage::ByTitleAuthor],
        };
        let summaries = vec![DocSummary {
            uid: "111".into(),
            title: "Peptide therapy outcomes".into(),
            journal: Some("J Med".into()),
            pub_date: Some("2021".into()),
            authors: vec!["Smith J".into()],
        }];

        let payload = publications_payload(&outcome, &summaries);

        assert_eq!(payload.hit_count, 45);
        assert!(payload.over_broad);
        assert_eq!(payload.data["pubmed_ids"], json!(["111", "222"]));
        assert_eq!(payload.data["publications"][0]["pmid"], "111");
        assert_eq!(payload.data["publications"][0]["title"], "Peptide therapy outcomes");
        assert_eq!(payload.data["search_stage"], "by_title_author");
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_error_not_empty() {
        let router = axum::Router::new()
            .fallback(|| async { axum::http::StatusCode::NOT_FOUND });
        let base_url = crate::sources::testing::serve(router).await;
        let config = SourceConfig {
            base_url: Some(base_url),
            max_attempts: Some(1),
            ..Default::default()
        };
        let client = PubMedClient::from_config(&config, rate_limiter(100)).unwrap();

        let result = client.fetch(&TrialQuery::new("NCT04043065")).await;
        assert_eq!(result.status, crate::types::SourceStatus::Error);
        assert!(result.payload.is_empty());
    }
}
