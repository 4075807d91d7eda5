//! Shared HTTP plumbing for source clients
//!
//! Wraps `reqwest::Client` with a bounded retry policy (exponential
//! backoff plus jitter) and an optional shared `governor` rate limiter.

use crate::types::SourceError;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rand::Rng;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use trialscope_common::config::SourceConfig;
use trialscope_common::{Error, Result};

/// User-Agent header sent to every provider
pub const USER_AGENT: &str = concat!("TrialScope/", env!("CARGO_PKG_VERSION"));

/// Rate limiter shared between clients hitting the same provider
pub type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Build a shared rate limiter allowing `per_second` requests per second
pub fn rate_limiter(per_second: u32) -> SharedRateLimiter {
    let rate = NonZeroU32::new(per_second.max(1)).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}

/// Bounded transport retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SourceConfig) -> Self {
        let default = Self::default();
        Self {
            max_attempts: config.max_attempts.unwrap_or(default.max_attempts).max(1),
            backoff_base: config
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(default.backoff_base),
        }
    }

    /// Backoff before attempt `attempt + 1`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }

    /// Backoff plus up to 50% random jitter
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms = (base.as_millis() as u64) / 2;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// HTTP helper owned by one source client
pub struct SourceHttp {
    source: &'static str,
    client: Client,
    retry: RetryPolicy,
    limiter: Option<SharedRateLimiter>,
}

impl SourceHttp {
    /// Create the helper with a per-request timeout
    pub fn new(
        source: &'static str,
        request_timeout: Duration,
        retry: RetryPolicy,
        limiter: Option<SharedRateLimiter>,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(USER_AGENT),
        );

        let client = Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client for {}: {}", source, e)))?;

        Ok(Self {
            source,
            client,
            retry,
            limiter,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// GET `url` with query parameters and decode the JSON body
    ///
    /// Retries network errors, 429 and 5xx responses up to the policy's
    /// attempt limit. Other non-2xx replies, 404 included, come back as
    /// `SourceError::Api`; clients that treat 404 as "no records" match it.
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<Value, SourceError> {
        let mut attempt = 1;
        loop {
            match self.get_once(url, params).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        source = self.source,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<Value, SourceError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        debug!(source = self.source, url = %url, "Sending request");

        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited(format!("{} returned 429", self.source)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: truncate(&body, 200),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::Parse(format!("{} response: {}", self.source, e)))
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
