use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared TTL cache handed to providers that need it. Cloning shares the entries.
#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, (V, Instant)>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached value, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        let (value, stored_at) = entry.value();
        if stored_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now()));
    }

    /// Return the cached value or run `fetch` and cache its success.
    /// Errors are never cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop expired entries (call periodically)
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
    }

    /// `(fresh, total)` entry counts
    pub fn stats(&self) -> (usize, usize) {
        let fresh = self
            .entries
            .iter()
            .filter(|entry| entry.value().1.elapsed() < self.ttl)
            .count();
        (fresh, self.entries.len())
    }
}
