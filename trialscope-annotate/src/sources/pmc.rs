//! PubMed Central Client (full-text literature)

use super::http::SharedRateLimiter;
use super::ladder::{run_ladder, LadderOutcome, NCBI_SYNTAX};
use super::ncbi::{DocSummary, Eutils};
use crate::types::{SourceClient, SourceError, SourceKind, SourcePayload, TrialQuery};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use trialscope_common::config::SourceConfig;
use trialscope_common::Result;

pub const SOURCE_NAME: &str = "pmc";

pub struct PmcClient {
    eutils: Eutils,
}

impl PmcClient {
    pub fn from_config(config: &SourceConfig, limiter: SharedRateLimiter) -> Result<Self> {
        Ok(Self {
            eutils: Eutils::new(SOURCE_NAME, "pmc", config, limiter)?,
        })
    }
}

#[async_trait]
impl SourceClient for PmcClient {
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
        .ok_or_else(|| SourceError::NotFound(format!("no PMC articles for {}", query.trial_id)))?;

        let summaries = self.eutils.esummary(&outcome.page.items).await?;
        Ok(articles_payload(&outcome, &summaries))
    }
}

/// PMC UIDs are bare numbers; the public identifier carries a "PMC" prefix
pub fn pmc_id(uid: &str) -> String {
    if uid.starts_with("PMC") {
        uid.to_string()
    } else {
        format!("PMC{}", uid)
    }
}

pub fn articles_payload(outcome: &LadderOutcome<Vec<String>>, summaries: &[DocSummary]) -> SourcePayload {
    let mut data = Map::new();
    data.insert(
        "pmc_ids".into(),
        json!(outcome.page.items.iter().map(|uid| pmc_id(uid)).collect::<Vec<_>>()),
    );
    data.insert("pmc_article_count".into(), json!(outcome.page.total));
    data.insert(
        "pmc_articles".into(),
        Value::Array(
            summaries
                .iter()
                .map(|doc| {
                    json!({
                        "pmcid": pmc_id(&doc.uid),
                        "title": doc.title,
                        "journal": doc.journal,
                        "pub_date": doc.pub_date,
                    })
                })
                .collect(),
        ),
    );
    data.insert("search_stage".into(), json!(outcome.stage.as_str()));

    SourcePayload::new(data, outcome.page.total).over_broad(outcome.over_broad)
}
