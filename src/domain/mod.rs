//! Domain Layer
//!
//! Trait abstractions for the collaborators the engine depends on.
//!
//! - **Ports** (`ports.rs`) - `Loader` (source of truth) and `KvBackend` (remote store)
//!
//! # Usage
//!
//! ```ignore
//! use metacache::domain::{EntityKind, Loader};
//!
//! async fn preload<L: Loader>(loader: &L) -> metacache::Result<()> {
//!     let record = loader.fetch(EntityKind::Video, "v-42").await?;
//!     // ...
//!     Ok(())
//! }
//! ```

pub mod ports;

pub use ports::{EntityKind, KvBackend, Loader, QueryCriteria, Record};
