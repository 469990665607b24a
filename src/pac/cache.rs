use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;

/// Default capacity: keep directives for the million most recently visited hosts.
pub const DEFAULT_CAPACITY: u64 = 1_000_000;

/// Concurrent host -> raw-directive store with LRU eviction and per-entry TTL.
///
/// An entry is gone once either its LRU slot is reclaimed or its TTL elapses,
/// whichever comes first. Keys are normalized hosts with the port already
/// stripped; the empty string is a reserved sentinel and never stored (the
/// engine short-circuits it before reaching the cache).
pub struct ResolutionCache {
    entries: Cache<String, String>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    /// Create a cache bounded by `capacity` entries and a uniform `ttl`.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up the raw directive for a host, recording a hit or a miss.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite the directive for a host.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Monotonic hit counter.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Monotonic miss counter.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of live entries.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key-sorted dump of the current contents, for the diagnostic surface.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries.run_pending_tasks();
        let mut dump: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|(key, value)| ((*key).clone(), value))
            .collect();
        dump.sort_by(|a, b| a.0.cmp(&b.0));
        dump
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_cache() -> ResolutionCache {
        ResolutionCache::new(1000, Duration::from_secs(60))
    }

    #[test]
    fn test_get_put_and_counters() {
        let cache = test_cache();

        assert!(cache.get("example.com").is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);

        cache.put("example.com", "DIRECT");
        assert_eq!(cache.get("example.com").as_deref(), Some("DIRECT"));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = test_cache();
        cache.put("example.com", "DIRECT");
        cache.put("example.com", "PROXY squid.example:3128");
        assert_eq!(
            cache.get("example.com").as_deref(),
            Some("PROXY squid.example:3128")
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_miss_pattern() {
        // 3 unique resolutions and 2 repeats of one of them: 2 hits, 3 misses.
        let cache = test_cache();
        for host in ["a.example", "b.example", "c.example"] {
            assert!(cache.get(host).is_none());
            cache.put(host, "DIRECT");
        }
        assert!(cache.get("a.example").is_some());
        assert!(cache.get("a.example").is_some());

        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 3);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = ResolutionCache::new(1000, Duration::from_millis(50));
        cache.put("example.com", "DIRECT");
        assert!(cache.get("example.com").is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("example.com").is_none());
    }

    #[test]
    fn test_capacity_eviction() {
        let cache = ResolutionCache::new(8, Duration::from_secs(60));
        for i in 0..64 {
            cache.put(format!("host{i}.example"), "DIRECT");
        }
        assert!(cache.len() <= 8);
    }

    #[test]
    fn test_snapshot_sorted() {
        let cache = test_cache();
        cache.put("zeta.example", "DIRECT");
        cache.put("alpha.example", "PROXY p.example:8080");
        cache.put("mid.example", "DIRECT");

        let dump = cache.snapshot();
        let keys: Vec<&str> = dump.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["alpha.example", "mid.example", "zeta.example"]);
        assert_eq!(dump[0].1, "PROXY p.example:8080");
    }
}
