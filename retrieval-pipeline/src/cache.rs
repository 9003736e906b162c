use std::time::Duration;

use common::utils::cache::{CacheStats, TtlLruCache};
use query_understanding::StructuredQuery;
use sha2::{Digest, Sha256};

use crate::{pipeline::config::RetrieverConfig, IntegratedRetrievalResult};

const RETRIEVAL_CACHE_CAPACITY: usize = 256;

/// Five-minute cache over full retrieval results, including their stage
/// metrics. Stale-while-revalidate is deliberately absent: a miss always
/// recomputes.
pub struct RetrievalCache {
    inner: TtlLruCache<String, IntegratedRetrievalResult>,
}

impl RetrievalCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            inner: TtlLruCache::new(RETRIEVAL_CACHE_CAPACITY, Duration::from_secs(ttl_seconds)),
        }
    }

    /// Deterministic key over patient, normalized query text, filters and
    /// the full retriever configuration.
    pub fn key(query: &StructuredQuery, config: &RetrieverConfig) -> String {
        let normalized_query = query
            .original_query
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let filters = serde_json::to_string(&query.filters).unwrap_or_default();
        let config_json = serde_json::to_string(config).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(query.patient_id.as_bytes());
        hasher.update([0]);
        hasher.update(normalized_query.as_bytes());
        hasher.update([0]);
        hasher.update(filters.as_bytes());
        hasher.update([0]);
        hasher.update(config_json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<IntegratedRetrievalResult> {
        self.inner.get(&key.to_owned())
    }

    pub fn insert(&self, key: String, result: IntegratedRetrievalResult) {
        self.inner.insert(key, result);
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Default for RetrievalCache {
    fn default() -> Self {
        Self::new(300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use query_understanding::QueryUnderstanding;

    fn structured(query: &str) -> StructuredQuery {
        let now = chrono::Utc
            .with_ymd_and_hms(2024, 10, 15, 9, 0, 0)
            .single()
            .expect("clock");
        QueryUnderstanding::new()
            .understand(query, "patient_1", now)
            .expect("structured query")
    }

    #[test]
    fn key_is_stable_under_whitespace_and_case() {
        let a = RetrievalCache::key(&structured("What  Medications?"), &RetrieverConfig::default());
        let b = RetrievalCache::key(&structured("what medications?"), &RetrieverConfig::default());
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_by_config_and_query() {
        let base = RetrievalCache::key(&structured("medications"), &RetrieverConfig::default());
        let different_query =
            RetrievalCache::key(&structured("care plan"), &RetrieverConfig::default());
        let different_config = RetrievalCache::key(
            &structured("medications"),
            &RetrieverConfig::default().with_k(3),
        );

        assert_ne!(base, different_query);
        assert_ne!(base, different_config);
    }

    #[test]
    fn round_trip_returns_stored_result() {
        let cache = RetrievalCache::new(300);
        let result = IntegratedRetrievalResult {
            total_searched: 7,
            ..Default::default()
        };

        cache.insert("key1".into(), result.clone());
        let hit = cache.get("key1").expect("cached result");
        assert_eq!(hit.total_searched, 7);
        assert!(cache.get("missing").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
