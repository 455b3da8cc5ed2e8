//! Infrastructure Adapters
//!
//! Concrete implementations of the domain ports, plus the metrics exporter.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Ports (Traits)                        │
//! │               Loader      │     KvBackend                │
//! └──────────────────────────────────────────────────────────┘
//!                 │                       │
//!                 ▼                       ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  HttpLoader           │  RedisKvBackend │ InMemoryKvBackend│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use metacache::adapters::{HttpLoader, HttpLoaderConfig, RedisConfig, RedisKvBackend};
//!
//! let backend = RedisKvBackend::connect(RedisConfig::with_url("redis://127.0.0.1:6379"))?;
//! let loader = HttpLoader::new(HttpLoaderConfig::default())?;
//! ```

mod http_loader;
mod memory;
mod prometheus;
mod redis;

pub use self::http_loader::{HttpLoader, HttpLoaderConfig};
pub use self::memory::InMemoryKvBackend;
pub use self::prometheus::PrometheusExporter;
pub use self::redis::{RedisConfig, RedisKvBackend};
