//! # TTL Cache
//!
//! Small owned cache for provider session tokens.
//!
//! Constructed once at startup and handed to the client that needs it.
//! Entries expire after a fixed TTL; when full, expired entries are purged
//! first and then the oldest insertion is evicted.
//!
//! ```text
//! get(k) ──► present and fresh ──► Some(v)
//!        └─► expired           ──► removed, None
//!
//! insert(k, v) ──► at capacity? ──► purge expired ──► still full? evict oldest
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `max_entries` of zero is treated as one.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        TtlCache {
            ttl,
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it under the write lock.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(key);
            }
        }
        None
    }

    pub async fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl).await;
    }

    /// Inserts with a caller-supplied TTL, e.g. the `expires_in` a token
    /// endpoint returned. Never longer than the cache TTL.
    pub async fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let ttl = ttl.min(self.ttl);
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| e.expires_at > now);

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    /// Removes expired entries and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
