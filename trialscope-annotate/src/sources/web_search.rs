//! Web Search Client (DuckDuckGo Instant Answer)
//!
//! Lowest-priority source. Looks up the trial ID first and falls back to
//! the title; no further narrowing since instant answers are never broad.

use super::http::{RetryPolicy, SourceHttp};
use super::ladder::{run_ladder, SearchPage, PLAIN_SYNTAX};
use super::ClientSettings;
use crate::types::{SourceClient, SourceError, SourceKind, SourcePayload, TrialQuery};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map};
use std::time::Duration;
use trialscope_common::config::SourceConfig;
use trialscope_common::Result;

pub const SOURCE_NAME: &str = "web_search";

const DEFAULT_BASE_URL: &str = "https://api.duckduckgo.com";

pub struct WebSearchClient {
    http: SourceHttp,
    settings: ClientSettings,
}

impl WebSearchClient {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let settings = ClientSettings::resolve(config, DEFAULT_BASE_URL, 10, 15);
        let http = SourceHttp::new(
            SOURCE_NAME,
            settings.request_timeout,
            RetryPolicy::from_config(config),
            None,
        )?;
        Ok(Self { http, settings })
    }

    async fn instant_answer(&self, term: &str) -> std::result::Result<SearchPage<InstantAnswer>, SourceError> {
        let params = [
            ("q", term.to_string()),
            ("format", "json".to_string()),
            ("no_html", "1".to_string()),
            ("skip_disambig", "1".to_string()),
        ];
        let value = self.http.get_json(&format!("{}/", self.settings.base_url), &params).await?;
        let answer: InstantAnswer = serde_json::from_value(value)
            .map_err(|e| SourceError::Parse(format!("instant answer: {}", e)))?;
        Ok(SearchPage {
            total: answer.hit_count(),
            items: answer,
        })
    }
}

#[async_trait]
impl SourceClient for WebSearchClient {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::WebSearch
    }

    fn timeout(&self) -> Duration {
        self.settings.unit_timeout
    }

    async fn search(&self, query: &TrialQuery) -> std::result::Result<SourcePayload, SourceError> {
        // Accept anything non-empty at the title stage
        let outcome = run_ladder(query, &PLAIN_SYNTAX, usize::MAX, |_stage, term| async move {
            self.instant_answer(&term).await
        })
        .await?
        .ok_or_else(|| SourceError::NotFound(format!("no web results for {}", query.trial_id)))?;

        Ok(answer_payload(&outcome.page.items, self.settings.max_hits))
    }
}

pub fn answer_payload(answer: &InstantAnswer, max_snippets: usize) -> SourcePayload {
    let topics = answer.flat_topics();
    let mut data = Map::new();

    if let Some(text) = answer.abstract_text.as_deref().filter(|t| !t.trim().is_empty()) {
        data.insert("web_abstract".into(), json!(text.trim()));
    }
    if let Some(url) = answer.abstract_url.as_deref().filter(|u| !u.is_empty()) {
        data.insert("web_abstract_url".into(), json!(url));
    }
    let snippets: Vec<&str> = topics
        .iter()
        .filter_map(|t| t.text.as_deref())
        .take(max_snippets)
        .collect();
    data.insert("web_snippets".into(), json!(snippets));
    let urls: Vec<&str> = topics
        .iter()
        .filter_map(|t| t.first_url.as_deref())
        .take(max_snippets)
        .collect();
    data.insert("web_urls".into(), json!(urls));

    SourcePayload::new(data, answer.hit_count())
}

// ============================================================================
// DuckDuckGo API Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct InstantAnswer {
    #[serde(rename = "AbstractText", default)]
    abstract_text: Option<String>,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: Option<String>,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a topic or a named group of topics
#[derive(Debug, Default, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: Option<String>,
    #[serde(rename = "FirstURL", default)]
    first_url: Option<String>,
    #[serde(rename = "Topics", default)]
    topics: Vec<RelatedTopic>,
}

impl InstantAnswer {
    fn flat_topics(&self) -> Vec<&RelatedTopic> {
        fn walk<'a>(topics: &'a [RelatedTopic], out: &mut Vec<&'a RelatedTopic>) {
            for topic in topics {
                if topic.text.is_some() {
                    out.push(topic);
                }
                walk(&topic.topics, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.related_topics, &mut out);
        out
    }

    fn hit_count(&self) -> usize {
        let has_abstract = self
            .abstract_text
            .as_deref()
            .map_or(false, |t| !t.trim().is_empty());
        self.flat_topics().len() + usize::from(has_abstract)
    }
}
