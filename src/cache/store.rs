//! Cache Store
//!
//! Fail-soft JSON wrapper over a [`KvBackend`]. Every backend error is
//! caught here, logged, counted and turned into an "absent" or "not ok"
//! result; nothing in this file returns an error to its caller except
//! [`CacheStore::memory_used`], which feeds monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::key::CacheKey;
use crate::adapters::InMemoryKvBackend;
use crate::domain::KvBackend;
use crate::error::{Error, Result};

/// Value as stored in the backend. Expiry lives in the backend, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Wrap a value stamped with the current time.
    pub fn now(value: T) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
        }
    }
}

/// Outcome of a read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// Live, decodable value
    Hit(T),
    /// Missing, expired or undecodable
    Miss,
    /// Backend error; treated as a miss by callers
    Failed,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Failed => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Fail-soft typed access to the key-value backend
pub struct CacheStore {
    backend: Arc<dyn KvBackend>,
    errors: AtomicU64,
    corrupt: AtomicU64,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            errors: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
        }
    }

    /// Store over a fresh in-memory backend (for testing)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryKvBackend::new()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Backend operations that failed since start.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Values that failed to decode since start.
    pub fn corrupt_count(&self) -> u64 {
        self.corrupt.load(Ordering::Relaxed)
    }

    fn record_error(&self, op: &str, key: &str, err: &Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend = self.backend.name(),
            op,
            key,
            error = %err,
            "Cache backend operation failed"
        );
    }

    /// Read and decode an entry.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Lookup<CacheEntry<T>> {
        let raw = match self.backend.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                self.record_error("get", key.as_str(), &e);
                return Lookup::Failed;
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => Lookup::Hit(entry),
            Err(e) => {
                self.corrupt.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                // Best effort; the caller reloads either way
                if let Err(e) = self.backend.delete(&[key.as_str().to_string()]).await {
                    self.record_error("delete", key.as_str(), &e);
                }
                Lookup::Miss
            }
        }
    }

    /// Read a value, `None` on miss or error.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.lookup::<T>(key).await.into_option().map(|e| e.value)
    }

    /// Write a pre-stamped entry. Returns false if the write failed.
    #[instrument(skip(self, entry), fields(key = %key))]
    pub async fn set_entry<T: Serialize>(
        &self,
        key: &CacheKey,
        entry: &CacheEntry<T>,
        ttl: Duration,
    ) -> bool {
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                self.record_error("encode", key.as_str(), &Error::Serialization(e));
                return false;
            }
        };

        match self.backend.set(key.as_str(), raw, Some(ttl)).await {
            Ok(()) => {
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached value");
                true
            }
            Err(e) => {
                self.record_error("set", key.as_str(), &e);
                false
            }
        }
    }

    /// Write a value stamped now. Returns false if the write failed.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: T, ttl: Duration) -> bool {
        self.set_entry(key, &CacheEntry::now(value), ttl).await
    }

    /// Delete keys, returning how many existed. Errors count as zero.
    pub async fn delete(&self, keys: &[CacheKey]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        let raw: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        match self.backend.delete(&raw).await {
            Ok(n) => n,
            Err(e) => {
                self.record_error("delete", &raw.join(","), &e);
                0
            }
        }
    }

    /// Delete every key under a prefix.
    pub async fn delete_prefix(&self, prefix: &str) -> u64 {
        match self.backend.delete_prefix(prefix).await {
            Ok(n) => n,
            Err(e) => {
                self.record_error("delete_prefix", prefix, &e);
                0
            }
        }
    }

    pub async fn exists(&self, key: &CacheKey) -> bool {
        match self.backend.exists(key.as_str()).await {
            Ok(exists) => exists,
            Err(e) => {
                self.record_error("exists", key.as_str(), &e);
                false
            }
        }
    }

    /// Remaining TTL, `None` if missing, persistent or on error.
    pub async fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        match self.backend.ttl(key.as_str()).await {
            Ok(ttl) => ttl,
            Err(e) => {
                self.record_error("ttl", key.as_str(), &e);
                None
            }
        }
    }

    /// Increment an integer key, `None` on error.
    pub async fn increment(&self, key: &CacheKey, amount: i64) -> Option<i64> {
        match self.backend.increment(key.as_str(), amount).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_error("increment", key.as_str(), &e);
                None
            }
        }
    }

    /// Bytes used by the backend. Errors propagate so monitoring can skip
    /// the sample for this tick.
    pub async fn memory_used(&self) -> Result<Option<u64>> {
        self.backend.memory_used().await
    }

    pub async fn ping(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                self.record_error("ping", "", &e);
                false
            }
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("errors", &self.error_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::KeyCodec;
    use crate::domain::EntityKind;
    use async_trait::async_trait;
    use serde_json::json;

    fn key(id: &str) -> CacheKey {
        KeyCodec::new("t").entity_key(EntityKind::Video, id)
    }

    struct BrokenBackend;

    #[async_trait]
    impl KvBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        async fn delete(&self, _keys: &[String]) -> Result<u64> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        async fn exists(&self, _key: &str) -> Result<bool> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        async fn increment(&self, _key: &str, _amount: i64) -> Result<i64> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        async fn memory_used(&self) -> Result<Option<u64>> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = CacheStore::in_memory();
        let k = key("v1");

        assert!(store.set(&k, json!({"title": "hello"}), Duration::from_secs(60)).await);
        let value: Option<serde_json::Value> = store.get(&k).await;
        assert_eq!(value, Some(json!({"title": "hello"})));
        assert!(store.exists(&k).await);

        let ttl = store.ttl(&k).await.unwrap();
        assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(55));
    }

    #[tokio::test]
    async fn test_delete_counts_existing() {
        let store = CacheStore::in_memory();
        store.set(&key("a"), 1u32, Duration::from_secs(60)).await;
        store.set(&key("b"), 2u32, Duration::from_secs(60)).await;

        let deleted = store.delete(&[key("a"), key("b"), key("c")]).await;
        assert_eq!(deleted, 2);
        assert_eq!(store.lookup::<u32>(&key("a")).await, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_a_miss() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let store = CacheStore::new(backend.clone());
        let k = key("bad");

        backend.set(k.as_str(), "{not json".into(), None).await.unwrap();

        assert_eq!(store.lookup::<serde_json::Value>(&k).await, Lookup::Miss);
        assert_eq!(store.corrupt_count(), 1);
        // Corrupt entry was evicted
        assert!(!backend.exists(k.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment() {
        let store = CacheStore::in_memory();
        let k = key("views");
        assert_eq!(store.increment(&k, 5).await, Some(5));
        assert_eq!(store.increment(&k, 2).await, Some(7));
    }

    #[tokio::test]
    async fn test_backend_errors_are_absorbed() {
        let store = CacheStore::new(Arc::new(BrokenBackend));
        let k = key("v1");

        assert_eq!(store.lookup::<u32>(&k).await, Lookup::Failed);
        assert!(!store.set(&k, 1u32, Duration::from_secs(1)).await);
        assert_eq!(store.delete(&[k.clone()]).await, 0);
        assert_eq!(store.delete_prefix("t:").await, 0);
        assert!(!store.exists(&k).await);
        assert_eq!(store.ttl(&k).await, None);
        assert_eq!(store.increment(&k, 1).await, None);
        assert!(!store.ping().await);
        assert!(store.memory_used().await.is_err());
        assert_eq!(store.error_count(), 8);
    }
}
