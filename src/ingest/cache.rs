// src/ingest/cache.rs
//! Absolute-TTL in-memory cache (no sliding refresh on read).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Owned by a single fetcher; never shared across components.
pub struct CacheWithTTL<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> CacheWithTTL<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`; expired entries are evicted on the way.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match map.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        let mut map = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        map.retain(|_, e| e.expires_at > Instant::now());
        map.insert(key, Entry { value, expires_at });
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = CacheWithTTL::new(Duration::from_secs(3600));
        cache.insert("https://feed.test/rss".to_string(), 7u32);
        assert_eq!(cache.get(&"https://feed.test/rss".to_string()), Some(7));

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(cache.get(&"https://feed.test/rss".to_string()), Some(7));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"https://feed.test/rss".to_string()), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reads_do_not_extend_lifetime() {
        let cache = CacheWithTTL::new(Duration::from_secs(10));
        cache.insert(1, "a");
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&1), Some("a"));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&1), None);
    }
}
