//! Source clients and the fan-out registry
//!
//! # Sources
//! 1. **clinical_trials** - ClinicalTrials.gov registry record (Registry)
//! 2. **pubmed** - PubMed publications (Literature)
//! 3. **pmc** - PubMed Central full-text articles (Literature)
//! 4. **openfda** - openFDA drug labels (DrugSafety)
//! 5. **web_search** - DuckDuckGo Instant Answer (WebSearch)
//!
//! # Parallel Execution
//! `SourceRegistry` queries every selected source concurrently. A failure in
//! one source never affects another: each (query, source) pair yields exactly
//! one `SourceResult`, whatever happened.

pub mod cache;
pub mod clinical_trials;
pub mod http;
pub mod ladder;
pub mod ncbi;
pub mod openfda;
pub mod pmc;
pub mod pubmed;
pub mod web_search;

use crate::types::{SourceClient, SourceResult, SourceStatus, TrialQuery};
use cache::SourceCache;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trialscope_common::config::{SourceConfig, TomlConfig};
use trialscope_common::events::{EventBus, SearchEvent};
use trialscope_common::{Error, Result};
use uuid::Uuid;

/// Upper bound for a single HTTP request; a unit may span several
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-client settings resolved from `[sources.<name>]` and client defaults
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Timeout for one HTTP request
    pub request_timeout: Duration,
    /// Deadline for one complete search unit
    pub unit_timeout: Duration,
    /// Narrowing threshold ("too many hits")
    pub max_hits: usize,
}

impl ClientSettings {
    pub fn resolve(
        config: &SourceConfig,
        default_base_url: &str,
        default_max_hits: usize,
        default_timeout_secs: u64,
    ) -> Self {
        let unit_timeout =
            Duration::from_secs(config.timeout_secs.unwrap_or(default_timeout_secs).max(1));
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(default_base_url)
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            request_timeout: unit_timeout.min(MAX_REQUEST_TIMEOUT),
            unit_timeout,
            max_hits: config.max_hits.unwrap_or(default_max_hits).max(1),
        }
    }
}

/// Fan-out registry over all configured source clients
///
/// # Example
/// ```rust,ignore
/// let registry = SourceRegistry::from_config(&config, events)?;
/// let results = registry.search_all(&TrialQuery::new("NCT04043065"), None).await?;
/// for (name, result) in &results {
///     println!("{} -> {}", name, result.status);
/// }
/// ```
pub struct SourceRegistry {
    clients: Vec<Arc<dyn SourceClient>>,
    events: EventBus,
    overall_timeout: Duration,
    cache: Option<Arc<SourceCache>>,
}

impl SourceRegistry {
    pub fn new(clients: Vec<Arc<dyn SourceClient>>, events: EventBus) -> Self {
        Self {
            clients,
            events,
            overall_timeout: Duration::from_secs(60),
            cache: None,
        }
    }

    pub fn with_overall_timeout(mut self, overall_timeout: Duration) -> Self {
        self.overall_timeout = overall_timeout;
        self
    }

    pub fn with_cache(mut self, cache: Arc<SourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the five built-in clients from configuration
    ///
    /// Sources with `enabled = false` are not registered. The NCBI clients
    /// share one rate limiter.
    pub fn from_config(config: &TomlConfig, events: EventBus) -> Result<Self> {
        let pubmed_config = config.source(pubmed::SOURCE_NAME);
        let ncbi_rate = pubmed_config
            .requests_per_second
            .unwrap_or(if pubmed_config.api_key.is_some() {
                ncbi::RATE_WITH_KEY
            } else {
                ncbi::RATE_WITHOUT_KEY
            });
        let ncbi_limiter = http::rate_limiter(ncbi_rate);

        let mut clients: Vec<Arc<dyn SourceClient>> = Vec::new();

        let cfg = config.source(clinical_trials::SOURCE_NAME);
        if cfg.is_enabled() {
            clients.push(Arc::new(clinical_trials::ClinicalTrialsClient::from_config(&cfg)?));
        }
        if pubmed_config.is_enabled() {
            clients.push(Arc::new(pubmed::PubMedClient::from_config(
                &pubmed_config,
                Arc::clone(&ncbi_limiter),
            )?));
        }
        let cfg = config.source(pmc::SOURCE_NAME);
        if cfg.is_enabled() {
            clients.push(Arc::new(pmc::PmcClient::from_config(
                &cfg,
                Arc::clone(&ncbi_limiter),
            )?));
        }
        let cfg = config.source(openfda::SOURCE_NAME);
        if cfg.is_enabled() {
            clients.push(Arc::new(openfda::OpenFdaClient::from_config(&cfg)?));
        }
        let cfg = config.source(web_search::SOURCE_NAME);
        if cfg.is_enabled() {
            clients.push(Arc::new(web_search::WebSearchClient::from_config(&cfg)?));
        }

        info!(
            sources = ?clients.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "Source registry initialized"
        );

        let mut registry = Self::new(clients, events)
            .with_overall_timeout(config.search.overall_timeout());
        if let Some(ttl) = config.search.cache_ttl() {
            registry = registry.with_cache(Arc::new(SourceCache::new(ttl)));
        }
        Ok(registry)
    }

    /// Registered source names in registration order
    pub fn source_names(&self) -> Vec<&'static str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    /// Resolve the requested subset of clients
    ///
    /// Unknown names are ignored with a warning. An explicit non-empty
    /// selection that names no registered source is a configuration error.
    fn select(&self, enabled: Option<&[String]>) -> Result<Vec<Arc<dyn SourceClient>>> {
        let Some(names) = enabled.filter(|n| !n.is_empty()) else {
            return Ok(self.clients.clone());
        };

        for name in names {
            if !self.clients.iter().any(|c| c.name() == name.as_str()) {
                warn!(source = %name, "Ignoring unknown source");
            }
        }

        let selected: Vec<_> = self
            .clients
            .iter()
            .filter(|c| names.iter().any(|n| n.as_str() == c.name()))
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(Error::Config(format!(
                "none of the requested sources are registered: {} (known: {})",
                names.join(", "),
                self.source_names().join(", ")
            )));
        }
        Ok(selected)
    }

    /// Query all selected sources concurrently
    ///
    /// Returns exactly one result per selected source.
    pub async fn search_all(
        &self,
        query: &TrialQuery,
        enabled: Option<&[String]>,
    ) -> Result<BTreeMap<String, SourceResult>> {
        self.search_all_with_cancel(query, enabled, CancellationToken::new())
            .await
    }

    /// Query all selected sources, stopping early on cancellation or when
    /// the overall deadline expires
    ///
    /// Results already collected are kept; sources still in flight are
    /// recorded with status `timeout`.
    pub async fn search_all_with_cancel(
        &self,
        query: &TrialQuery,
        enabled: Option<&[String]>,
        cancel: CancellationToken,
    ) -> Result<BTreeMap<String, SourceResult>> {
        let selected = self.select(enabled)?;
        let search_id = Uuid::new_v4();
        let started = Instant::now();

        info!(
            search_id = %search_id,
            trial_id = %query.trial_id,
            sources = selected.len(),
            "Starting source search"
        );
        self.events.emit_lossy(SearchEvent::SearchStarted {
            search_id,
            trial_id: query.trial_id.clone(),
            sources: selected.iter().map(|c| c.name().to_string()).collect(),
            timestamp: Utc::now(),
        });

        let mut results: BTreeMap<String, SourceResult> = BTreeMap::new();
        let mut pending = FuturesUnordered::new();

        for client in &selected {
            if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(query, client.name())) {
                debug!(source = client.name(), trial_id = %query.trial_id, "Cache hit");
                self.emit_completed(search_id, query, &cached, Duration::ZERO, true);
                results.insert(client.name().to_string(), cached);
                continue;
            }

            self.events.emit_lossy(SearchEvent::SourceDispatched {
                search_id,
                trial_id: query.trial_id.clone(),
                source: client.name().to_string(),
                timestamp: Utc::now(),
            });
            debug!(source = client.name(), trial_id = %query.trial_id, "Source dispatched");

            let client = Arc::clone(client);
            let query = query.clone();
            pending.push(async move {
                let unit_started = Instant::now();
                let limit = client.timeout();
                let result = match tokio::time::timeout(limit, client.fetch(&query)).await {
                    Ok(result) => result,
                    Err(_) => SourceResult::failed(
                        client.name(),
                        client.kind(),
                        SourceStatus::Timeout,
                        format!("no response within {:?}", limit),
                    ),
                };
                (result, unit_started.elapsed())
            });
        }

        let deadline = tokio::time::sleep(self.overall_timeout);
        tokio::pin!(deadline);
        let mut interrupted = false;

        while !pending.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(search_id = %search_id, "Source search cancelled");
                    interrupted = true;
                    break;
                }
                _ = &mut deadline => {
                    warn!(
                        search_id = %search_id,
                        timeout_secs = self.overall_timeout.as_secs(),
                        "Overall search deadline expired"
                    );
                    interrupted = true;
                    break;
                }
                Some((result, elapsed)) = pending.next() => {
                    if let Some(cache) = &self.cache {
                        cache.put(query, &result);
                    }
                    self.emit_completed(search_id, query, &result, elapsed, false);
                    results.insert(result.source_name.clone(), result);
                }
            }
        }
        drop(pending);

        // Units abandoned by cancellation or the deadline
        for client in &selected {
            if !results.contains_key(client.name()) {
                let result = SourceResult::failed(
                    client.name(),
                    client.kind(),
                    SourceStatus::Timeout,
                    "search interrupted before the source responded",
                );
                self.emit_completed(search_id, query, &result, started.elapsed(), false);
                results.insert(client.name().to_string(), result);
            }
        }

        let ok_count = results.values().filter(|r| r.is_ok()).count();
        info!(
            search_id = %search_id,
            trial_id = %query.trial_id,
            ok = ok_count,
            total = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Source search complete"
        );
        self.events.emit_lossy(SearchEvent::SearchCompleted {
            search_id,
            trial_id: query.trial_id.clone(),
            ok_count,
            total: results.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            interrupted,
            timestamp: Utc::now(),
        });

        Ok(results)
    }

    fn emit_completed(
        &self,
        search_id: Uuid,
        query: &TrialQuery,
        result: &SourceResult,
        elapsed: Duration,
        cached: bool,
    ) {
        match result.status {
            SourceStatus::Ok | SourceStatus::NotFound => debug!(
                source = %result.source_name,
                status = %result.status,
                hits = result.hit_count,
                "Source completed"
            ),
            SourceStatus::Error | SourceStatus::Timeout => warn!(
                source = %result.source_name,
                status = %result.status,
                error = result.error_detail.as_deref().unwrap_or(""),
                "Source failed (isolated)"
            ),
        }

        self.events.emit_lossy(SearchEvent::SourceCompleted {
            search_id,
            trial_id: query.trial_id.clone(),
            source: result.source_name.clone(),
            status: result.status.to_string(),
            hit_count: result.hit_count,
            elapsed_ms: elapsed.as_millis() as u64,
            cached,
            error: result.error_detail.clone(),
            timestamp: Utc::now(),
        });
    }
}

// ============================================================================
// Local HTTP Server for Testing
// ============================================================================


// ============================================================================
// Mock Source Client for Testing
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
