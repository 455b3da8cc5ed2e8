//! In-Memory Key-Value Backend
//!
//! Process-local [`KvBackend`] for tests and single-node deployments.
//! Expiry uses tokio's clock, so paused-time tests can advance past TTLs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::KvBackend;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// DashMap-backed key-value store with TTL support
#[derive(Debug, Default)]
pub struct InMemoryKvBackend {
    entries: DashMap<String, StoredValue>,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    offline: AtomicBool,
}

impl InMemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails until set back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Live entry count (expired entries not yet swept are excluded).
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|key, stored| {
            if stored.is_expired(now) {
                self.total_bytes
                    .fetch_sub(entry_size(key, &stored.value), Ordering::Relaxed);
                purged += 1;
                false
            } else {
                true
            }
        });
        purged
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(Error::BackendUnavailable("in-memory backend is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn remove_entry(&self, key: &str) -> Option<StoredValue> {
        let (key, stored) = self.entries.remove(key)?;
        self.total_bytes
            .fetch_sub(entry_size(&key, &stored.value), Ordering::Relaxed);
        Some(stored)
    }

    /// Read a live entry, dropping it if it has expired.
    fn live(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        let stored = self.entries.get(key).map(|e| e.value().clone())?;
        if stored.is_expired(now) {
            if let Some((k, v)) = self.entries.remove_if(key, |_, v| v.is_expired(now)) {
                self.total_bytes
                    .fetch_sub(entry_size(&k, &v.value), Ordering::Relaxed);
            }
            return None;
        }
        Some(stored)
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.live(key).map(|s| s.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        let size = entry_size(key, &value);
        let stored = StoredValue {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };

        match self.entries.insert(key.to_string(), stored) {
            Some(old) => {
                let old_size = entry_size(key, &old.value);
                if size > old_size {
                    self.total_bytes.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.total_bytes.fetch_sub(old_size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.total_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.check_online()?;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            if let Some(stored) = self.remove_entry(key) {
                if !stored.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.check_online()?;
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        self.delete(&matching).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self
            .live(key)
            .and_then(|s| s.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let stored = slot.get_mut();
                let current = if stored.is_expired(now) {
                    stored.expires_at = None;
                    0
                } else {
                    stored.value.parse::<i64>().map_err(|_| {
                        Error::Internal(format!("value at {} is not an integer", key))
                    })?
                };
                let next = current + amount;
                let old_size = entry_size(key, &stored.value);
                stored.value = next.to_string();
                let new_size = entry_size(key, &stored.value);
                if new_size > old_size {
                    self.total_bytes.fetch_add(new_size - old_size, Ordering::Relaxed);
                } else {
                    self.total_bytes.fetch_sub(old_size - new_size, Ordering::Relaxed);
                }
                Ok(next)
            }
            Entry::Vacant(slot) => {
                let value = amount.to_string();
                self.total_bytes
                    .fetch_add(entry_size(key, &value), Ordering::Relaxed);
                slot.insert(StoredValue {
                    value,
                    expires_at: None,
                });
                Ok(amount)
            }
        }
    }

    async fn memory_used(&self) -> Result<Option<u64>> {
        self.check_online()?;
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "Swept expired entries");
        }
        Ok(Some(self.total_bytes.load(Ordering::Relaxed)))
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let backend = InMemoryKvBackend::new();
        backend
            .set("k", "v".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(!backend.exists("k").await.unwrap());
        assert_eq!(backend.memory_used().await.unwrap(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_expired_entries_leave_memory_usage() {
        let backend = InMemoryKvBackend::new();
        for i in 0..100 {
            backend
                .set(&format!("vid:{:03}", i), "x".repeat(100), Some(Duration::from_secs(1)))
                .await
                .unwrap();
        }
        backend.set("keep", "v".into(), None).await.unwrap();
        assert_eq!(backend.memory_used().await.unwrap(), Some(100 * 107 + 5));

        tokio::time::advance(Duration::from_secs(5)).await;

        // No key is read again; the memory report alone has to reclaim them
        assert_eq!(backend.memory_used().await.unwrap(), Some(5));
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_byte_accounting() {
        let backend = InMemoryKvBackend::new();
        backend.set("ab", "cde".into(), None).await.unwrap();
        assert_eq!(backend.memory_used().await.unwrap(), Some(5));

        backend.set("ab", "c".into(), None).await.unwrap();
        assert_eq!(backend.memory_used().await.unwrap(), Some(3));

        backend.delete(&["ab".to_string()]).await.unwrap();
        assert_eq!(backend.memory_used().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let backend = InMemoryKvBackend::new();
        for key in ["a:1", "a:2", "b:1"] {
            backend.set(key, "x".into(), None).await.unwrap();
        }
        assert_eq!(backend.delete_prefix("a:").await.unwrap(), 2);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_increment() {
        let backend = InMemoryKvBackend::new();
        assert_eq!(backend.increment("n", 3).await.unwrap(), 3);
        assert_eq!(backend.increment("n", -1).await.unwrap(), 2);

        backend.set("s", "text".into(), None).await.unwrap();
        assert!(backend.increment("s", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_offline() {
        let backend = InMemoryKvBackend::new();
        backend.set_offline(true);
        assert_matches!(backend.get("k").await, Err(Error::BackendUnavailable(_)));
        assert_matches!(backend.ping().await, Err(Error::BackendUnavailable(_)));

        backend.set_offline(false);
        backend.ping().await.unwrap();
    }
}
