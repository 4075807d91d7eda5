//! NCBI E-utilities plumbing shared by the PubMed and PMC clients
//!
//! # API Reference
//! - esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//! - esummary: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi
//! - Rate limit: 3 requests/second without an API key, 10 with one

use super::http::{RetryPolicy, SharedRateLimiter, SourceHttp};
use super::ladder::SearchPage;
use super::ClientSettings;
use crate::types::SourceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trialscope_common::config::SourceConfig;
use trialscope_common::Result;

pub const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Requests per second allowed without an API key
pub const RATE_WITHOUT_KEY: u32 = 3;

/// Requests per second allowed with an API key
pub const RATE_WITH_KEY: u32 = 10;

/// Summaries fetched per search at most
const MAX_SUMMARIES: usize = 20;

/// E-utilities client bound to one database ("pubmed" or "pmc")
pub struct Eutils {
    db: &'static str,
    http: SourceHttp,
    pub settings: ClientSettings,
}

impl Eutils {
    pub fn new(
        source: &'static str,
        db: &'static str,
        config: &SourceConfig,
        limiter: SharedRateLimiter,
    ) -> Result<Self> {
        let settings = ClientSettings::resolve(config, DEFAULT_BASE_URL, 20, 30);
        let http = SourceHttp::new(
            source,
            settings.request_timeout,
            RetryPolicy::from_config(config),
            Some(limiter),
        )?;
        Ok(Self { db, http, settings })
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", self.db.to_string()),
            ("retmode", "json".to_string()),
            ("tool", "trialscope".to_string()),
        ];
        if let Some(key) = &self.settings.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Run esearch; returns the total count and the first page of UIDs
    pub async fn esearch(&self, term: &str) -> std::result::Result<SearchPage<Vec<String>>, SourceError> {
        let url = format!("{}/esearch.fcgi", self.settings.base_url);
        let mut params = self.common_params();
        params.push(("term", term.to_string()));
        params.push(("retmax", self.settings.max_hits.min(MAX_SUMMARIES).to_string()));

        let value = self.http.get_json(&url, &params).await?;
        parse_esearch(value)
    }

    /// Run esummary for up to `MAX_SUMMARIES` UIDs
    pub async fn esummary(&self, ids: &[String]) -> std::result::Result<Vec<DocSummary>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/esummary.fcgi", self.settings.base_url);
        let ids: Vec<&str> = ids.iter().take(MAX_SUMMARIES).map(String::as_str).collect();
        let mut params = self.common_params();
        params.push(("id", ids.join(",")));

        let value = self.http.get_json(&url, &params).await?;
        parse_esummary(value)
    }
}

/// One esummary document, reduced to the fields the record uses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocSummary {
    pub uid: String,
    pub title: String,
    pub journal: Option<String>,
    pub pub_date: Option<String>,
    pub authors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EsearchEnvelope {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

/// Parse an esearch JSON response
pub fn parse_esearch(value: Value) -> std::result::Result<SearchPage<Vec<String>>, SourceError> {
    let envelope: EsearchEnvelope =
        serde_json::from_value(value).map_err(|e| SourceError::Parse(format!("esearch: {}", e)))?;
    let result = envelope.esearchresult;

    if let Some(error) = result.error {
        return Err(SourceError::Api {
            status: 200,
            message: error,
        });
    }

    let total = match result.count.as_deref() {
        Some(count) => count
            .parse()
            .map_err(|_| SourceError::Parse(format!("esearch count {:?}", count)))?,
        None => result.idlist.len(),
    };
    Ok(SearchPage {
        total,
        items: result.idlist,
    })
}

/// Parse an esummary JSON response, keeping the `uids` order
pub fn parse_esummary(value: Value) -> std::result::Result<Vec<DocSummary>, SourceError> {
    let result = value
        .get("result")
        .and_then(Value::as_object)
        .ok_or_else(|| SourceError::Parse("esummary: missing result".into()))?;

    let uids: Vec<&str> = result
        .get("uids")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let text = |doc: &Value, key: &str| {
        doc.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    Ok(uids
        .into_iter()
        .filter_map(|uid| {
            let doc = result.get(uid)?;
            Some(DocSummary {
                uid: uid.to_string(),
                title: text(doc, "title").unwrap_or_default(),
                journal: text(doc, "fulljournalname").or_else(|| text(doc, "source")),
                pub_date: text(doc, "pubdate"),
                authors: doc
                    .get("authors")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(|author| author.get("name").and_then(Value::as_str))
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect())
}
