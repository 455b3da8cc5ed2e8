//! Metadata Cache Layer
//!
//! Typed access to the remote key-value store:
//!
//! - **key**: deterministic key codec
//! - **store**: fail-soft JSON wrapper over a [`crate::domain::KvBackend`]
//! - **policy**: per-kind TTL table
//! - **metrics**: atomic counters and response-time tracking
//! - **metadata**: get-or-populate cache with invalidation cascades

pub mod key;
pub mod metadata;
pub mod metrics;
pub mod policy;
pub mod store;

pub use key::{CacheKey, Dimensions, KeyCodec, KeyKind, Timeframe};
pub use metadata::{Metadata, MetadataCache, DEFAULT_LIST_LIMIT, GLOBAL_SCOPE};
pub use metrics::{percentage, CacheCounters, CacheStats, LatencyTracker};
pub use policy::TtlPolicy;
pub use store::{CacheEntry, CacheStore, Lookup};
