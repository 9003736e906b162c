use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Hit/miss accounting surfaced for diagnostics.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    tick: u64,
}

struct CacheInner<K, V> {
    map: HashMap<K, Entry<V>>,
    // Recency index: tick -> key. Evicting the least recently used entry is
    // a pop of the smallest tick.
    recency: BTreeMap<u64, K>,
    next_tick: u64,
}

/// Bounded TTL + LRU cache. Reads and writes are atomic per key; the LRU
/// bookkeeping sits behind the same lock so it cannot tear under
/// concurrent access.
pub struct TtlLruCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
            }),
            ttl,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let tick = inner.next_tick;
        inner.next_tick += 1;

        let expired = match inner.map.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            if let Some(entry) = inner.map.remove(key) {
                inner.recency.remove(&entry.tick);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let key_clone = key.clone();
        let entry = inner.map.get_mut(key).map(|entry| {
            let old_tick = entry.tick;
            entry.tick = tick;
            (old_tick, entry.value.clone())
        });

        if let Some((old_tick, value)) = entry {
            inner.recency.remove(&old_tick);
            inner.recency.insert(tick, key_clone);
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(value)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let tick = inner.next_tick;
        inner.next_tick += 1;

        if let Some(previous) = inner.map.remove(&key) {
            inner.recency.remove(&previous.tick);
        }

        inner.recency.insert(tick, key.clone());
        inner.map.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                tick,
            },
        );

        while inner.map.len() > self.capacity {
            let Some((&oldest_tick, _)) = inner.recency.iter().next() else {
                break;
            };
            if let Some(evicted_key) = inner.recency.remove(&oldest_tick) {
                inner.map.remove(&evicted_key);
            }
        }
    }

    /// Drops every expired entry. Idempotent; safe to call periodically.
    pub fn purge_expired(&self) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let ttl = self.ttl;
        let expired: Vec<(K, u64)> = inner
            .map
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > ttl)
            .map(|(key, entry)| (key.clone(), entry.tick))
            .collect();

        for (key, tick) in expired {
            inner.map.remove(&key);
            inner.recency.remove(&tick);
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.map.len(),
            Err(poisoned) => poisoned.into_inner().map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Process-wide cache handles, constructed once at startup and threaded
/// through the pipelines (no hidden globals).
pub struct CacheManager {
    pub embeddings: TtlLruCache<String, Vec<f32>>,
}

impl CacheManager {
    pub fn new(embedding_capacity: usize, embedding_ttl: Duration) -> Self {
        Self {
            embeddings: TtlLruCache::new(embedding_capacity, embedding_ttl),
        }
    }

    /// Embedding cache key: SHA-256 of the exact input text.
    pub fn embedding_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(86_400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_inserted_value_and_counts_hits() {
        let cache: TtlLruCache<String, u32> = TtlLruCache::new(10, Duration::from_secs(60));
        cache.insert("a".into(), 1);

        assert_eq!(cache.get(&"a".into()), Some(1));
        assert_eq!(cache.get(&"b".into()), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache: TtlLruCache<String, u32> = TtlLruCache::new(2, Duration::from_secs(60));
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&"a".into()), Some(1));
        cache.insert("c".into(), 3);

        assert_eq!(cache.get(&"a".into()), Some(1));
        assert_eq!(cache.get(&"b".into()), None);
        assert_eq!(cache.get(&"c".into()), Some(3));
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache: TtlLruCache<String, u32> = TtlLruCache::new(10, Duration::from_millis(0));
        cache.insert("a".into(), 1);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.get(&"a".into()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_expired_is_idempotent() {
        let cache: TtlLruCache<String, u32> = TtlLruCache::new(10, Duration::from_millis(0));
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        std::thread::sleep(Duration::from_millis(5));

        cache.purge_expired();
        assert!(cache.is_empty());
        cache.purge_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn reinserting_a_key_replaces_the_value() {
        let cache: TtlLruCache<String, u32> = TtlLruCache::new(10, Duration::from_secs(60));
        cache.insert("a".into(), 1);
        cache.insert("a".into(), 2);

        assert_eq!(cache.get(&"a".into()), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn embedding_key_is_deterministic() {
        let a = CacheManager::embedding_key("metformin 500mg");
        let b = CacheManager::embedding_key("metformin 500mg");
        let c = CacheManager::embedding_key("metformin 500 mg");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
