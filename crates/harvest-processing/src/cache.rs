//! Content-hash keyed TTL cache for statistics results.
//!
//! Keys are `"{content_hash}_{operation}"`. Expiry is checked lazily on
//! read: an entry is valid while `now - created_at < ttl`. There is no
//! background eviction; stale entries stay until they are overwritten or
//! the store is cleared.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    created_at: Instant,
}

/// Age and validity of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryStats {
    pub key: String,
    /// Seconds since the entry was stored, rounded to two decimals.
    pub age_seconds: f64,
    pub is_valid: bool,
}

/// Snapshot of the whole cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub ttl_secs: u64,
    pub entries: Vec<CacheEntryStats>,
}

/// Process-wide memoization store.
///
/// Concurrent `get`/`set` are safe; the last write to a key wins.
#[derive(Debug)]
pub struct CacheStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

static_assertions::assert_impl_all!(CacheStore: Send, Sync);

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(content_hash: &str, operation: &str) -> String {
        format!("{}_{}", content_hash, operation)
    }

    /// Stored value for `(content_hash, operation)` if it has not expired.
    pub fn get(&self, content_hash: &str, operation: &str) -> Option<serde_json::Value> {
        let key = Self::key(content_hash, operation);
        let entries = self.entries.read();
        match entries.get(&key) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => {
                debug!("Cache hit for {}", key);
                Some(entry.value.clone())
            }
            Some(_) => {
                debug!("Cache entry {} expired", key);
                None
            }
            None => {
                debug!("Cache miss for {}", key);
                None
            }
        }
    }

    pub fn set(&self, content_hash: &str, operation: &str, value: serde_json::Value) {
        let key = Self::key(content_hash, operation);
        self.entries.write().insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            debug!("Clearing {} cache entries", entries.len());
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every key with its age and validity, sorted by key.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let mut listed: Vec<CacheEntryStats> = entries
            .iter()
            .map(|(key, entry)| {
                let age = entry.created_at.elapsed();
                CacheEntryStats {
                    key: key.clone(),
                    age_seconds: (age.as_secs_f64() * 100.0).round() / 100.0,
                    is_valid: age < self.ttl,
                }
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            total_entries: listed.len(),
            ttl_secs: self.ttl.as_secs(),
            entries: listed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_get_after_set_returns_value() {
        let cache = CacheStore::new(Duration::from_secs(300));
        let value = json!({"trends": {"a": {"slope": 1.5}}});

        cache.set("abc", "trends", value.clone());

        assert_eq!(cache.get("abc", "trends"), Some(value));
        assert_eq!(cache.get("abc", "anomalies"), None);
        assert_eq!(cache.get("def", "trends"), None);
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let cache = CacheStore::new(Duration::from_millis(20));
        cache.set("abc", "trends", json!(1));

        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("abc", "trends"), None);
        // Expiry is lazy: the entry is still listed, but invalid.
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert!(!stats.entries[0].is_valid);
    }

    #[test]
    fn test_zero_ttl_is_always_stale() {
        let cache = CacheStore::new(Duration::ZERO);
        cache.set("abc", "trends", json!(1));
        assert_eq!(cache.get("abc", "trends"), None);
    }

    #[test]
    fn test_clear_empties_store() {
        let cache = CacheStore::new(Duration::from_secs(300));
        cache.set("a", "x", json!(1));
        cache.set("b", "y", json!(2));
        assert_eq!(cache.len(), 2);

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.get("a", "x"), None);
    }

    #[test]
    fn test_last_write_wins() {
        let cache = CacheStore::new(Duration::from_secs(300));
        cache.set("a", "x", json!(1));
        cache.set("a", "x", json!(2));
        assert_eq!(cache.get("a", "x"), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stats_lists_keys() {
        let cache = CacheStore::new(Duration::from_secs(300));
        cache.set("h", "trends", json!(1));
        cache.set("h", "anomalies", json!(2));

        let stats = cache.stats();

        assert_eq!(stats.ttl_secs, 300);
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.entries[0].key, "h_anomalies");
        assert_eq!(stats.entries[1].key, "h_trends");
        assert!(stats.entries.iter().all(|e| e.is_valid && e.age_seconds >= 0.0));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(CacheStore::new(Duration::from_secs(300)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..50 {
                        cache.set("shared", "op", json!(i * 100 + j));
                        let _ = cache.get("shared", "op");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
        assert!(cache.get("shared", "op").is_some());
    }
}
