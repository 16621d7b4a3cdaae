//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::key::QueryKey;

/// Trait for server entities that have their own detail cache slot.
pub trait Cacheable {
  /// Entity type name, used as the root key segment (e.g., "todo")
  fn entity_type() -> &'static str;

  /// Key of the detail slot for the entity with `id`.
  fn detail_key(id: &str) -> QueryKey {
    QueryKey::new(Self::entity_type()).with(id)
  }
}

/// A stored server response with its freshness window.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub value: Value,
  /// When the fetch that produced this value started
  pub fetched_at: DateTime<Utc>,
  /// Past this instant the value must be refetched
  pub stale_after: DateTime<Utc>,
  /// Last time a reader was served this entry
  pub last_used_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(value: Value, fetched_at: DateTime<Utc>, stale_time: Duration) -> Self {
    Self {
      value,
      fetched_at,
      stale_after: fetched_at + stale_time,
      last_used_at: Utc::now(),
    }
  }

  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    now < self.stale_after
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Transform the payload, keeping the source metadata.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched (or joined an in-flight fetch) from the network
  Network,
  /// Served from an unexpired cache entry
  Cache,
}
