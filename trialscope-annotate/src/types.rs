//! Core Types and Trait Definitions
//!
//! Defines the query, the per-source result and the uniform `SourceClient`
//! adapter contract used by the fan-out registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Query
// ============================================================================

/// Trial lookup query
///
/// Immutable per invocation; cloned into each concurrent source unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialQuery {
    /// Canonical trial identifier (NCT ID)
    pub trial_id: String,
    /// Official or brief title, when known
    #[serde(default)]
    pub title: Option<String>,
    /// Ordered author / investigator names
    #[serde(default)]
    pub authors: Vec<String>,
    /// Additional identifiers by kind (e.g. "pmid", "doi", "secondary_id")
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
    /// Conditions studied
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Drug / intervention names
    #[serde(default)]
    pub interventions: Vec<String>,
    /// Study start date (any textual form, year is enough)
    #[serde(default)]
    pub start_date: Option<String>,
}

impl TrialQuery {
    pub fn new(trial_id: impl Into<String>) -> Self {
        Self {
            trial_id: trial_id.into().trim().to_uppercase(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_intervention(mut self, intervention: impl Into<String>) -> Self {
        self.interventions.push(intervention.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// Title with surrounding whitespace removed, if non-empty
    pub fn title_text(&self) -> Option<&str> {
        self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// First author, if any
    pub fn first_author(&self) -> Option<&str> {
        self.authors.iter().map(|a| a.trim()).find(|a| !a.is_empty())
    }

    /// Four-digit year extracted from `start_date`
    pub fn start_year(&self) -> Option<&str> {
        let date = self.start_date.as_deref()?;
        date.as_bytes()
            .windows(4)
            .position(|w| w.iter().all(u8::is_ascii_digit))
            .map(|i| &date[i..i + 4])
    }

    /// Stable key for result caching
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.trial_id,
            self.title_text().unwrap_or_default().to_lowercase(),
            self.authors.join(";").to_lowercase(),
            self.interventions.join(";").to_lowercase(),
            self.start_date.as_deref().unwrap_or_default()
        )
    }
}

// ============================================================================
// Source results
// ============================================================================

/// Source category; also the fixed tie-break priority for merging
/// (lower sorts first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Primary trial registry
    Registry,
    /// Literature index
    Literature,
    /// Drug-safety database
    DrugSafety,
    /// General web search
    WebSearch,
}

/// Outcome status of one (query, source) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    NotFound,
    Error,
    Timeout,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::NotFound => "not_found",
            SourceStatus::Error => "error",
            SourceStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful response of one source, normalized to the common shape
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePayload {
    /// Canonical field name -> value
    pub data: Map<String, Value>,
    /// Number of provider hits behind `data`
    pub hit_count: usize,
    /// Narrowing ladder was exhausted while still above the hit limit
    pub over_broad: bool,
}

impl SourcePayload {
    pub fn new(data: Map<String, Value>, hit_count: usize) -> Self {
        Self {
            data,
            hit_count,
            over_broad: false,
        }
    }

    pub fn over_broad(mut self, over_broad: bool) -> Self {
        self.over_broad = over_broad;
        self
    }
}

/// Result of querying one source
///
/// Created once by a source client (or by the registry on deadline expiry)
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source_name: String,
    pub kind: SourceKind,
    pub status: SourceStatus,
    /// Normalized payload; empty unless status is `ok`
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub hit_count: usize,
    #[serde(default)]
    pub over_broad: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl SourceResult {
    pub fn ok(source_name: impl Into<String>, kind: SourceKind, payload: SourcePayload) -> Self {
        Self {
            source_name: source_name.into(),
            kind,
            status: SourceStatus::Ok,
            payload: payload.data,
            hit_count: payload.hit_count,
            over_broad: payload.over_broad,
            error_detail: None,
        }
    }

    pub fn failed(
        source_name: impl Into<String>,
        kind: SourceKind,
        status: SourceStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            kind,
            status,
            payload: Map::new(),
            hit_count: 0,
            over_broad: false,
            error_detail: Some(detail.into()),
        }
    }

    /// Convert a client outcome into a result; never fails
    pub fn from_outcome(
        source_name: &str,
        kind: SourceKind,
        outcome: Result<SourcePayload, SourceError>,
    ) -> Self {
        match outcome {
            Ok(payload) if payload.hit_count == 0 && payload.data.is_empty() => Self::failed(
                source_name,
                kind,
                SourceStatus::NotFound,
                "no matching records",
            ),
            Ok(payload) => Self::ok(source_name, kind, payload),
            Err(e) => Self::failed(source_name, kind, e.status(), e.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SourceStatus::Ok
    }
}

/// Source client error
///
/// Never escapes the client boundary: `SourceClient::fetch` folds it into
/// a `SourceResult` via `status()`.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure (DNS, TLS, connection refused)
    #[error("Network error: {0}")]
    Network(String),

    /// Request or unit deadline elapsed
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx response from provider
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Provider rate limit signalled and retries exhausted
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Failed to parse provider response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Provider answered but had no matching records
    #[error("Not found: {0}")]
    NotFound(String),

    /// Query lacks inputs this source needs
    #[error("Insufficient query: {0}")]
    InsufficientQuery(String),

    /// Internal processing error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SourceError {
    /// Status recorded for this failure
    pub fn status(&self) -> SourceStatus {
        match self {
            SourceError::NotFound(_) | SourceError::InsufficientQuery(_) => SourceStatus::NotFound,
            SourceError::Timeout(_) => SourceStatus::Timeout,
            _ => SourceStatus::Error,
        }
    }

    /// Whether a transport-level retry may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Network(_) | SourceError::Timeout(_) | SourceError::RateLimited(_) => {
                true
            }
            SourceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Network(format!("request timed out: {}", e))
        } else if e.is_decode() {
            SourceError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

// ============================================================================
// Source Client trait
// ============================================================================

/// Uniform adapter around one external data provider
///
/// Implementations own provider-specific query construction, response
/// parsing into the common payload shape, and the mapping of provider
/// error signals to `SourceError`.
///
/// # Example
/// ```rust,ignore
/// use trialscope_annotate::types::{SourceClient, TrialQuery};
///
/// let client = PubMedClient::from_config(&config.source("pubmed"), limiter);
/// let result = client.fetch(&TrialQuery::new("NCT04043065")).await;
/// println!("{} -> {}", result.source_name, result.status);
/// ```
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Registered source name (e.g. "pubmed")
    fn name(&self) -> &'static str;

    /// Source category
    fn kind(&self) -> SourceKind;

    /// Deadline for one complete `search` (all attempts and ladder stages)
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Query the provider
    async fn search(&self, query: &TrialQuery) -> Result<SourcePayload, SourceError>;

    /// Query the provider and fold every failure into a `SourceResult`
    async fn fetch(&self, query: &TrialQuery) -> SourceResult {
        let outcome = self.search(query).await;
        if let Err(ref e) = outcome {
            debug!(source = self.name(), error = %e, "Source search failed");
        }
        SourceResult::from_outcome(self.name(), self.kind(), outcome)
    }
}
