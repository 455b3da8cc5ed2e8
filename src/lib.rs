//! Metadata Cache Engine
//!
//! A read-through cache for video-platform metadata (videos, users,
//! channels, tags) in front of a slower source of truth, with scheduled
//! cache warming and threshold-based performance monitoring.
//!
//! # Architecture
//!
//! ```text
//! Warming Scheduler ──► MetadataCache ◄── Monitoring Loop
//!                           │
//!                  ┌────────┴────────┐
//!                  ▼                 ▼
//!             KvBackend           Loader
//! ```
//!
//! Every cache operation is fail-soft: backend failures become counted
//! misses and the loader's answer is still returned.
//!
//! # Modules
//!
//! - [`adapters`] - Redis, in-memory and HTTP implementations of the ports
//! - [`admin`] - `CacheEngine` facade for the administrative surface
//! - [`cache`] - Key codec, fail-soft store, counters and the metadata cache
//! - [`config`] - YAML configuration and duration parsing
//! - [`domain`] - `Loader` and `KvBackend` ports
//! - [`error`] - Error types
//! - [`monitoring`] - Thresholds, history, the monitoring loop and health
//! - [`warming`] - Strategies and the warming scheduler

pub mod adapters;
pub mod admin;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitoring;
pub mod warming;

// Re-export commonly used types
pub use admin::CacheEngine;
pub use cache::{CacheKey, CacheStats, KeyCodec, KeyKind, Metadata, MetadataCache};
pub use config::EngineConfig;
pub use domain::{EntityKind, KvBackend, Loader, QueryCriteria};
pub use error::{Error, Result};
pub use monitoring::{Alert, AlertLevel, MonitoringLoop, ThresholdConfig};
pub use warming::{StrategyRegistry, WarmingScheduler, WarmingStrategy};
