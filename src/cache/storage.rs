//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};

use super::key::encoded_matches;
use super::traits::CacheEntry;

/// Persisted entries older than this are dropped when the cache is opened.
const PERSIST_MAX_AGE_HOURS: i64 = 24;

/// Trait for cache storage backends.
///
/// Keys are the encoded form of a `QueryKey`.
pub trait CacheStorage: Send + Sync {
  /// Get the entry stored under `key`.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Store `entry` unless the existing entry was fetched later.
  ///
  /// Returns `false` when the write lost to a newer entry.
  fn put(&self, key: &str, entry: &CacheEntry) -> Result<bool>;

  /// Record a read of `key`.
  fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<()>;

  /// Remove every entry whose key starts with `prefix` (segment-wise).
  fn remove_prefix(&self, prefix: &str) -> Result<usize>;

  /// Remove entries last used before `cutoff`.
  fn evict_unused(&self, cutoff: DateTime<Utc>) -> Result<usize>;

  /// Remove everything.
  fn clear(&self) -> Result<usize>;
}

impl CacheStorage for Box<dyn CacheStorage> {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    (**self).get(key)
  }

  fn put(&self, key: &str, entry: &CacheEntry) -> Result<bool> {
    (**self).put(key, entry)
  }

  fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
    (**self).touch(key, at)
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    (**self).remove_prefix(prefix)
  }

  fn evict_unused(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    (**self).evict_unused(cutoff)
  }

  fn clear(&self) -> Result<usize> {
    (**self).clear()
  }
}

/// Process-local storage.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    Ok(self.entries()?.get(key).cloned())
  }

  fn put(&self, key: &str, entry: &CacheEntry) -> Result<bool> {
    let mut entries = self.entries()?;
    if let Some(existing) = entries.get(key) {
      if existing.fetched_at > entry.fetched_at {
        return Ok(false);
      }
    }
    entries.insert(key.to_string(), entry.clone());
    Ok(true)
  }

  fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
    if let Some(entry) = self.entries()?.get_mut(key) {
      entry.last_used_at = at;
    }
    Ok(())
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    let mut entries = self.entries()?;
    let before = entries.len();
    entries.retain(|key, _| !encoded_matches(key, prefix));
    Ok(before - entries.len())
  }

  fn evict_unused(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    let mut entries = self.entries()?;
    let before = entries.len();
    entries.retain(|_, entry| entry.last_used_at >= cutoff);
    Ok(before - entries.len())
  }

  fn clear(&self) -> Result<usize> {
    let mut entries = self.entries()?;
    let count = entries.len();
    entries.clear();
    Ok(count)
  }
}

/// SQLite-based cache storage, so query results survive between runs.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  /// Wrap the state database, dropping entries too old to be worth keeping.
  pub fn new(db: Database) -> Result<Self> {
    let storage = Self { db };
    let cutoff = Utc::now() - Duration::hours(PERSIST_MAX_AGE_HOURS);
    let purged = storage
      .db
      .conn()?
      .execute(
        "DELETE FROM query_cache WHERE fetched_at < ?",
        params![cutoff.timestamp_millis()],
      )
      .map_err(|e| Error::Storage(format!("Failed to purge old cache entries: {}", e)))?;
    if purged > 0 {
      debug!(purged, "purged expired persisted cache entries");
    }
    Ok(storage)
  }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms)
    .ok_or_else(|| Error::Storage(format!("Timestamp out of range: {}", ms)))
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.db.conn()?;

    let row: Option<(Vec<u8>, i64, i64, i64)> = conn
      .query_row(
        "SELECT data, fetched_at, stale_after, last_used_at FROM query_cache WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| Error::Storage(format!("Failed to read cache entry: {}", e)))?;

    let Some((data, fetched_at, stale_after, last_used_at)) = row else {
      return Ok(None);
    };

    let value = serde_json::from_slice(&data)
      .map_err(|e| Error::Storage(format!("Failed to deserialize cache entry: {}", e)))?;

    Ok(Some(CacheEntry {
      value,
      fetched_at: from_millis(fetched_at)?,
      stale_after: from_millis(stale_after)?,
      last_used_at: from_millis(last_used_at)?,
    }))
  }

  fn put(&self, key: &str, entry: &CacheEntry) -> Result<bool> {
    let conn = self.db.conn()?;
    let data = serde_json::to_vec(&entry.value)
      .map_err(|e| Error::Storage(format!("Failed to serialize cache entry: {}", e)))?;

    let changed = conn
      .execute(
        "INSERT INTO query_cache (cache_key, data, fetched_at, stale_after, last_used_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(cache_key) DO UPDATE SET
           data = excluded.data,
           fetched_at = excluded.fetched_at,
           stale_after = excluded.stale_after,
           last_used_at = excluded.last_used_at
         WHERE excluded.fetched_at >= query_cache.fetched_at",
        params![
          key,
          data,
          entry.fetched_at.timestamp_millis(),
          entry.stale_after.timestamp_millis(),
          entry.last_used_at.timestamp_millis(),
        ],
      )
      .map_err(|e| Error::Storage(format!("Failed to store cache entry: {}", e)))?;

    Ok(changed > 0)
  }

  fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "UPDATE query_cache SET last_used_at = ? WHERE cache_key = ?",
        params![at.timestamp_millis(), key],
      )
      .map_err(|e| Error::Storage(format!("Failed to touch cache entry: {}", e)))?;
    Ok(())
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    // Encoded keys contain '%' and '_', which LIKE would treat as wildcards.
    conn
      .execute(
        "DELETE FROM query_cache
         WHERE cache_key = ?1
            OR substr(cache_key, 1, length(?1) + 1) = ?1 || ':'",
        params![prefix],
      )
      .map_err(|e| Error::Storage(format!("Failed to invalidate cache entries: {}", e)))
  }

  fn evict_unused(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM query_cache WHERE last_used_at < ?",
        params![cutoff.timestamp_millis()],
      )
      .map_err(|e| Error::Storage(format!("Failed to evict cache entries: {}", e)))
  }

  fn clear(&self) -> Result<usize> {
    self
      .db
      .conn()?
      .execute("DELETE FROM query_cache", [])
      .map_err(|e| Error::Storage(format!("Failed to clear cache: {}", e)))
  }
}
