//! Domain Ports (Port/Adapter Pattern)
//!
//! The two collaborators the engine consumes but does not own: the
//! source-of-truth [`Loader`] and the remote [`KvBackend`]. Adapters in
//! [`crate::adapters`] implement them; tests substitute in-memory fakes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │            Loader        │        KvBackend          │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  HttpLoader │ RedisKvBackend │ InMemoryKvBackend     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

/// A raw record as returned by the source of truth.
pub type Record = serde_json::Value;

/// Kind of entity whose metadata is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Video,
    User,
    Channel,
    Tag,
}

impl EntityKind {
    /// All entity kinds.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Video,
        EntityKind::User,
        EntityKind::Channel,
        EntityKind::Tag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Video => "video",
            EntityKind::User => "user",
            EntityKind::Channel => "channel",
            EntityKind::Tag => "tag",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" | "videos" => Ok(EntityKind::Video),
            "user" | "users" => Ok(EntityKind::User),
            "channel" | "channels" => Ok(EntityKind::Channel),
            "tag" | "tags" => Ok(EntityKind::Tag),
            other => Err(Error::ConfigValidation(format!(
                "unsupported entity kind: {}",
                other
            ))),
        }
    }
}

/// Candidate-selection criteria understood by the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryCriteria {
    /// Highest view count over a trailing window
    MostViewed { window_hours: u32 },
    /// Highest recent engagement score (views, likes, comments)
    HighestEngagement { window_hours: u32 },
    /// Most recently created
    MostRecent { window_hours: u32 },
    /// Best like-to-view ratio among items with at least `min_views`
    BestLikeRatio { min_views: u64 },
    /// Items carrying every tag in the set
    ByTags { tags: Vec<String>, page: u32 },
    /// Items owned by a channel
    ByChannel { channel_id: String, page: u32 },
    /// Most used tags
    MostUsedTags,
}

impl QueryCriteria {
    /// Short name used in logs and query strings.
    pub fn name(&self) -> &'static str {
        match self {
            QueryCriteria::MostViewed { .. } => "most_viewed",
            QueryCriteria::HighestEngagement { .. } => "highest_engagement",
            QueryCriteria::MostRecent { .. } => "most_recent",
            QueryCriteria::BestLikeRatio { .. } => "best_like_ratio",
            QueryCriteria::ByTags { .. } => "by_tags",
            QueryCriteria::ByChannel { .. } => "by_channel",
            QueryCriteria::MostUsedTags => "most_used_tags",
        }
    }
}

// =============================================================================
// Loader Port
// =============================================================================

/// Port for the slow system of record.
///
/// Implementations must be idempotent and free of side effects from the
/// cache's point of view.
///
/// # Example
///
/// ```ignore
/// struct SqlLoader { /* ... */ }
///
/// #[async_trait]
/// impl Loader for SqlLoader {
///     async fn fetch(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
///         // SELECT ... WHERE id = $1
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait Loader: Send + Sync {
    /// Fetch one record by id. `Ok(None)` means the record does not exist.
    async fn fetch(&self, kind: EntityKind, id: &str) -> Result<Option<Record>>;

    /// Select up to `limit` ids matching the criteria, best first.
    async fn query(
        &self,
        kind: EntityKind,
        criteria: &QueryCriteria,
        limit: usize,
    ) -> Result<Vec<String>>;
}

// =============================================================================
// Key-Value Backend Port
// =============================================================================

/// Port for the remote key-value store behind the cache.
///
/// Values are opaque strings; encoding is the job of
/// [`crate::cache::CacheStore`]. Every method may fail, and every failure is
/// expected to be absorbed by the caller.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Get a value. Expired keys are reported as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, optionally with an expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Delete every key starting with `prefix`, returning how many existed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Check whether a live key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining time to live. `None` if the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Atomically add `amount` to an integer key, creating it at zero.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;

    /// Bytes currently used by the backend, if it reports them.
    async fn memory_used(&self) -> Result<Option<u64>>;

    /// Round-trip check.
    async fn ping(&self) -> Result<()>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Tests
// =============================================================================
