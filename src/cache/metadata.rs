//! Metadata Cache
//!
//! Get-or-populate cache for entity metadata and the aggregate id lists
//! derived from it. Owns the counter set, the per-kind TTL table and the
//! warming in-progress guard.
//!
//! ```text
//!   get(kind, id) ──► KeyCodec ──► CacheStore ── hit ──► Metadata
//!                                      │
//!                                     miss
//!                                      ▼
//!                               Loader.fetch ──► normalize ──► CacheStore.set
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, trace, warn};

use super::key::{CacheKey, Dimensions, KeyCodec, KeyKind, Timeframe};
use super::metrics::{CacheCounters, CacheStats, LatencyTracker};
use super::policy::TtlPolicy;
use super::store::{CacheEntry, CacheStore, Lookup};
use crate::domain::{EntityKind, Loader, QueryCriteria, Record};
use crate::error::{Error, Result};

/// Id used for aggregates that are not owned by a single entity.
pub const GLOBAL_SCOPE: &str = "all";

/// List length used when a reference carries no limit dimension.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Normalized entity metadata as cached and returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub kind: EntityKind,
    pub id: String,
    /// Record fields, minus nulls and the id
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub cached_at: DateTime<Utc>,
}

impl Metadata {
    /// Normalize a raw record. Only JSON objects are accepted.
    pub fn from_record(
        kind: EntityKind,
        id: &str,
        record: Record,
        cached_at: DateTime<Utc>,
    ) -> Result<Self> {
        let object = match record {
            Record::Object(object) => object,
            other => {
                return Err(Error::loader(
                    kind,
                    id,
                    format!("expected an object record, got {}", json_type(&other)),
                ))
            }
        };

        let attributes = object
            .into_iter()
            .filter(|(name, value)| name != "id" && !value.is_null())
            .collect();

        Ok(Self {
            kind,
            id: id.to_string(),
            attributes,
            cached_at,
        })
    }

    /// String attribute, if present.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }
}

fn json_type(value: &Record) -> &'static str {
    match value {
        Record::Null => "null",
        Record::Bool(_) => "bool",
        Record::Number(_) => "number",
        Record::String(_) => "string",
        Record::Array(_) => "array",
        Record::Object(_) => "object",
    }
}

/// A key or key prefix removed by an invalidation cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CascadeTarget {
    Key(CacheKey),
    Prefix(String),
}

/// Removes the in-progress marker on every exit path of `warm`.
struct InProgressGuard<'a> {
    map: &'a DashMap<(EntityKind, String), ()>,
    key: (EntityKind, String),
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

// =============================================================================
// Metadata Cache
// =============================================================================

/// Get-or-populate metadata cache
pub struct MetadataCache {
    codec: KeyCodec,
    store: Arc<CacheStore>,
    loader: Arc<dyn Loader>,
    ttl: TtlPolicy,
    counters: CacheCounters,
    in_progress: DashMap<(EntityKind, String), ()>,
}

impl MetadataCache {
    pub fn new(
        codec: KeyCodec,
        store: Arc<CacheStore>,
        loader: Arc<dyn Loader>,
        ttl: TtlPolicy,
    ) -> Self {
        Self {
            codec,
            store,
            loader,
            ttl,
            counters: CacheCounters::new(),
            in_progress: DashMap::new(),
        }
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.loader
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Get metadata, loading and caching it on a miss.
    ///
    /// Never fails: backend and loader errors are counted and reported as
    /// `None`. A loader that finds nothing is not cached.
    #[instrument(skip(self))]
    pub async fn get(&self, kind: EntityKind, id: &str) -> Option<Metadata> {
        let timer = LatencyTracker::start();
        let result = self.get_inner(kind, id).await;
        self.counters.record_get_latency(timer.elapsed());
        result
    }

    async fn get_inner(&self, kind: EntityKind, id: &str) -> Option<Metadata> {
        let key = self.codec.entity_key(kind, id);

        match self.store.lookup::<Metadata>(&key).await {
            Lookup::Hit(entry) => {
                self.counters.record_hit();
                trace!(key = %key, "Cache hit");
                return Some(entry.value);
            }
            Lookup::Miss => {
                self.counters.record_miss();
                debug!(key = %key, "Cache miss");
            }
            Lookup::Failed => {
                self.counters.record_miss();
                self.counters.record_error();
            }
        }

        self.counters.record_load();
        let record = match self.loader.fetch(kind, id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(kind = %kind, id, "Record not found in source");
                return None;
            }
            Err(e) => {
                self.counters.record_error();
                error!(kind = %kind, id, error = %e, "Loader fetch failed");
                return None;
            }
        };

        let now = Utc::now();
        let metadata = match Metadata::from_record(kind, id, record, now) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.counters.record_error();
                error!(kind = %kind, id, error = %e, "Discarding malformed record");
                return None;
            }
        };

        let entry = CacheEntry {
            value: &metadata,
            cached_at: now,
        };
        if self
            .store
            .set_entry(&key, &entry, self.ttl.ttl_for(kind.into()))
            .await
        {
            self.counters.record_set();
        } else {
            self.counters.record_error();
        }

        Some(metadata)
    }

    /// Get an aggregate id list, populating it through `Loader::query`.
    ///
    /// `kind` must be an aggregate kind. For trending lists `id` is a scope
    /// such as [`GLOBAL_SCOPE`]; for channel lists it is the channel id.
    #[instrument(skip(self))]
    pub async fn get_list(&self, kind: KeyKind, id: &str, dims: &Dimensions) -> Option<Vec<String>> {
        let Some((entity, criteria)) = list_criteria(kind, id, dims) else {
            warn!(kind = %kind, "get_list called with a non-aggregate kind");
            return None;
        };
        let key = self.codec.key_for(kind, id, dims);

        match self.store.lookup::<Vec<String>>(&key).await {
            Lookup::Hit(entry) => {
                self.counters.record_hit();
                return Some(entry.value);
            }
            Lookup::Miss => self.counters.record_miss(),
            Lookup::Failed => {
                self.counters.record_miss();
                self.counters.record_error();
            }
        }

        self.counters.record_load();
        let limit = dims.get_limit().unwrap_or(DEFAULT_LIST_LIMIT);
        let ids = match self.loader.query(entity, &criteria, limit).await {
            Ok(ids) => ids,
            Err(e) => {
                self.counters.record_error();
                error!(kind = %kind, id, criteria = criteria.name(), error = %e, "Loader query failed");
                return None;
            }
        };

        if self.store.set(&key, &ids, self.ttl.ttl_for(kind)).await {
            self.counters.record_set();
        } else {
            self.counters.record_error();
        }
        Some(ids)
    }

    /// Delete an entity's key and every aggregate that may list it.
    ///
    /// Returns the number of keys removed. Cascade failures are logged and
    /// never affect the primary deletion.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, kind: EntityKind, id: &str) -> u64 {
        let key = self.codec.entity_key(kind, id);

        // Owner links are only known from the cached copy
        let cached = match self.store.lookup::<Metadata>(&key).await {
            Lookup::Hit(entry) => Some(entry.value),
            _ => None,
        };

        let before = self.store.error_count();
        let mut removed = self.store.delete(std::slice::from_ref(&key)).await;
        self.counters.record_invalidation();
        if self.store.error_count() > before {
            self.counters.record_error();
        }

        for target in self.cascade_targets(kind, id, cached.as_ref()) {
            let before = self.store.error_count();
            let n = match &target {
                CascadeTarget::Key(k) => self.store.delete(std::slice::from_ref(k)).await,
                CascadeTarget::Prefix(p) => self.store.delete_prefix(p).await,
            };
            if self.store.error_count() > before {
                warn!(kind = %kind, id, target = ?target, "Invalidation cascade step failed");
            }
            removed += n;
        }

        info!(kind = %kind, id, removed, "Invalidated cache entries");
        removed
    }

    fn cascade_targets(
        &self,
        kind: EntityKind,
        id: &str,
        cached: Option<&Metadata>,
    ) -> Vec<CascadeTarget> {
        let codec = &self.codec;
        let mut targets = Vec::new();

        match kind {
            EntityKind::Video => {
                for tf in Timeframe::ALL {
                    targets.push(CascadeTarget::Key(codec.key_for(
                        KeyKind::Trending,
                        GLOBAL_SCOPE,
                        &Dimensions::new().timeframe(tf),
                    )));
                }
                targets.push(CascadeTarget::Prefix(codec.kind_prefix(KeyKind::Trending)));
                targets.push(CascadeTarget::Prefix(codec.kind_prefix(KeyKind::PopularTags)));
                targets.push(CascadeTarget::Prefix(codec.kind_prefix(KeyKind::TagVideos)));
                if let Some(channel_id) = cached.and_then(|m| m.attr_str("channel_id")) {
                    targets.extend(channel_targets(codec, channel_id));
                }
            }
            EntityKind::Tag => {
                targets.push(CascadeTarget::Prefix(codec.kind_prefix(KeyKind::PopularTags)));
                targets.push(CascadeTarget::Prefix(codec.kind_prefix(KeyKind::TagVideos)));
            }
            EntityKind::Channel | EntityKind::User => {
                targets.extend(channel_targets(codec, id));
            }
        }
        targets
    }

    /// Populate one entity unless a warm for it is already in flight.
    ///
    /// Returns true only if the entity is now cached.
    #[instrument(skip(self))]
    pub async fn warm(&self, kind: EntityKind, id: &str) -> bool {
        let marker = (kind, id.to_string());
        match self.in_progress.entry(marker.clone()) {
            Entry::Occupied(_) => {
                trace!(kind = %kind, id, "Warm already in progress");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        let _guard = InProgressGuard {
            map: &self.in_progress,
            key: marker,
        };

        self.get(kind, id).await.is_some()
    }

    /// Number of warms currently holding the in-progress guard.
    pub fn warms_in_progress(&self) -> usize {
        self.in_progress.len()
    }

    /// Whether a live entry exists for the entity.
    pub async fn is_cached(&self, kind: EntityKind, id: &str) -> bool {
        self.store.exists(&self.codec.entity_key(kind, id)).await
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    /// Zero all counters. Admin action.
    pub fn reset_stats(&self) {
        self.counters.reset();
        info!("Cache statistics reset");
    }

    /// Delete every key in the namespace. Admin action.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> u64 {
        let removed = self.store.delete_prefix(&self.codec.namespace_prefix()).await;
        info!(namespace = self.codec.namespace(), removed, "Cache cleared");
        removed
    }
}

fn channel_targets(codec: &KeyCodec, channel_id: &str) -> [CascadeTarget; 2] {
    [
        CascadeTarget::Key(codec.key_for(KeyKind::ChannelVideos, channel_id, &Dimensions::new())),
        CascadeTarget::Prefix(codec.owner_prefix(KeyKind::ChannelVideos, channel_id)),
    ]
}

/// Map an aggregate reference to the query that populates it.
fn list_criteria(kind: KeyKind, id: &str, dims: &Dimensions) -> Option<(EntityKind, QueryCriteria)> {
    let page = dims.get_page().unwrap_or(0);
    let criteria = match kind {
        KeyKind::Trending => (
            EntityKind::Video,
            QueryCriteria::HighestEngagement {
                window_hours: dims.get_timeframe().unwrap_or(Timeframe::Day).hours(),
            },
        ),
        KeyKind::PopularTags => (EntityKind::Tag, QueryCriteria::MostUsedTags),
        KeyKind::TagVideos => (
            EntityKind::Video,
            QueryCriteria::ByTags {
                tags: dims.get_tags().map(str::to_string).collect(),
                page,
            },
        ),
        KeyKind::ChannelVideos => (
            EntityKind::Video,
            QueryCriteria::ByChannel {
                channel_id: id.to_string(),
                page,
            },
        ),
        KeyKind::Video | KeyKind::User | KeyKind::Channel | KeyKind::Tag => return None,
    };
    Some(criteria)
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("namespace", &self.codec.namespace())
            .field("store", &self.store)
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
