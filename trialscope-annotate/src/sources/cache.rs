//! Per-process source result cache
//!
//! Keyed by (query cache key, source name). Only `ok` and `not_found`
//! results are stored; transient failures are always retried. Expired
//! entries are dropped on read and swept on every write.

use crate::types::{SourceResult, SourceStatus, TrialQuery};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    result: SourceResult,
    stored_at: Instant,
}

/// TTL-bounded cache of source results
pub struct SourceCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl SourceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached result, if any; expired entries are evicted
    pub fn get(&self, query: &TrialQuery, source: &str) -> Option<SourceResult> {
        let key = (query.cache_key(), source.to_string());
        let mut entries = self.entries.lock().ok()?;
        match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store `result` if its status is cacheable, sweeping expired entries
    pub fn put(&self, query: &TrialQuery, result: &SourceResult) {
        if !matches!(result.status, SourceStatus::Ok | SourceStatus::NotFound) {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
            entries.insert(
                (query.cache_key(), result.source_name.clone()),
                CacheEntry {
                    result: result.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SourceKind, SourcePayload};
    use serde_json::{json, Map};

    fn ok_result(source: &str) -> SourceResult {
        let mut data = Map::new();
        data.insert("title".into(), json!("Cached"));
        SourceResult::ok(source, SourceKind::Literature, SourcePayload::new(data, 1))
    }

    #[test]
    fn test_ok_and_not_found_are_cached() {
        let cache = SourceCache::new(Duration::from_secs(60));
        let query = TrialQuery::new("NCT1");

        cache.put(&query, &ok_result("pubmed"));
        cache.put(
            &query,
            &SourceResult::failed("pmc", SourceKind::Literature, SourceStatus::NotFound, "none"),
        );

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&query, "pubmed").unwrap().is_ok());
        assert_eq!(cache.get(&query, "pmc").unwrap().status, SourceStatus::NotFound);
    }

    #[test]
    fn test_transient_failures_not_cached() {
        let cache = SourceCache::new(Duration::from_secs(60));
        let query = TrialQuery::new("NCT1");

        cache.put(
            &query,
            &SourceResult::failed("pubmed", SourceKind::Literature, SourceStatus::Error, "500"),
        );
        cache.put(
            &query,
            &SourceResult::failed("pmc", SourceKind::Literature, SourceStatus::Timeout, "slow"),
        );

        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entry_evicted() {
        let cache = SourceCache::new(Duration::ZERO);
        let query = TrialQuery::new("NCT1");
        cache.put(&query, &ok_result("pubmed"));

        assert!(cache.get(&query, "pubmed").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_includes_query_fields() {
        let cache = SourceCache::new(Duration::from_secs(60));
        let query = TrialQuery::new("NCT1");
        cache.put(&query, &ok_result("pubmed"));

        let titled = TrialQuery::new("NCT1").with_title("Other");
        assert!(cache.get(&titled, "pubmed").is_none());
    }

    #[test]
    fn test_write_sweeps_expired_entries() {
        let cache = SourceCache::new(Duration::from_millis(1));
        for n in 0..50 {
            cache.put(&TrialQuery::new(format!("NCT{}", n)), &ok_result("pubmed"));
        }
        std::thread::sleep(Duration::from_millis(20));

        cache.put(&TrialQuery::new("NCT-LAST"), &ok_result("pubmed"));
        assert_eq!(cache.len(), 1);
    }
}
