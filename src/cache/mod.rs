//! Query cache for server responses.
//!
//! This module provides a service-agnostic caching mechanism that:
//! - Keys responses by a segmented query key (entity kind + parameters)
//! - Serves fresh entries without touching the network
//! - Coalesces concurrent fetches of the same key into one
//! - Invalidates by key prefix after mutations
//! - Evicts entries nobody has read for a while

mod key;
mod layer;
mod storage;
mod traits;

pub use key::QueryKey;
pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Cacheable};

/// Cache layer over a backend chosen at runtime.
pub type Cache = CacheLayer<Box<dyn CacheStorage>>;
