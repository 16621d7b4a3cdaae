//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::key::{encoded_matches, QueryKey};
use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheResult};

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

struct InFlight {
  id: u64,
  fetch: SharedFetch,
}

/// Cache layer that manages caching logic and network fetching.
///
/// Reads are served from storage while the entry is fresh. Otherwise one
/// fetch is started per key; concurrent readers of the same key join it
/// instead of issuing their own. Fetches run on their own task, so a reader
/// that goes away does not stop the cache from being populated.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  inflight: Arc<Mutex<HashMap<String, InFlight>>>,
  next_fetch_id: Arc<AtomicU64>,
  /// How long before cached data is considered stale
  stale_time: Duration,
  /// How long an unused entry survives garbage collection
  gc_time: Duration,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      inflight: Arc::new(Mutex::new(HashMap::new())),
      next_fetch_id: Arc::new(AtomicU64::new(1)),
      stale_time: Duration::minutes(5),
      gc_time: Duration::minutes(10),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Set how long unused entries are kept.
  pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
    self.gc_time = gc_time;
    self
  }

  fn lock_inflight(&self) -> Result<MutexGuard<'_, HashMap<String, InFlight>>> {
    lock(&self.inflight)
  }

  /// Read `key` with a cache-first strategy.
  ///
  /// 1. Fresh entry: return it without calling `loader`
  /// 2. Fetch already running for this key: wait for its result
  /// 3. Otherwise: run `loader`, store the result, return it
  ///
  /// Loader errors are returned unchanged and nothing is stored.
  pub async fn read<T, F, Fut>(&self, key: &QueryKey, loader: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let encoded = key.encode();
    let now = Utc::now();

    if let Some(entry) = self.storage.get(&encoded)? {
      if entry.is_fresh(now) {
        match serde_json::from_value::<T>(entry.value) {
          Ok(data) => {
            self.storage.touch(&encoded, now)?;
            debug!(key = %key, "cache hit");
            return Ok(CacheResult::from_cache(data, entry.fetched_at));
          }
          Err(e) => warn!(key = %key, error = %e, "unreadable cache entry, refetching"),
        }
      }
    }

    let fetch = {
      let mut inflight = self.lock_inflight()?;
      match inflight.get(&encoded) {
        Some(running) => {
          debug!(key = %key, "joining in-flight fetch");
          running.fetch.clone()
        }
        None => {
          debug!(key = %key, "cache miss, fetching");
          let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
          let fetch = self.spawn_fetch(id, encoded.clone(), loader());
          inflight.insert(
            encoded,
            InFlight {
              id,
              fetch: fetch.clone(),
            },
          );
          fetch
        }
      }
    };

    let value = fetch.await?;
    let data = serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(CacheResult::from_network(data))
  }

  fn spawn_fetch<T, Fut>(&self, id: u64, encoded: String, fut: Fut) -> SharedFetch
  where
    T: Serialize + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let inflight = Arc::clone(&self.inflight);
    let stale_time = self.stale_time;
    let started_at = Utc::now();

    let handle: JoinHandle<Result<Value>> = tokio::spawn(async move {
      let result = fut
        .await
        .and_then(|data| serde_json::to_value(data).map_err(|e| Error::Decode(e.to_string())));

      // Only the fetch still registered for the key may write; an
      // invalidation since it started means its result is already stale.
      let mut inflight = lock(&inflight)?;
      let current = inflight.get(&encoded).map(|f| f.id) == Some(id);
      if current {
        inflight.remove(&encoded);
        if let Ok(value) = &result {
          let entry = CacheEntry::new(value.clone(), started_at, stale_time);
          if !storage.put(&encoded, &entry)? {
            debug!(key = %encoded, "newer entry already stored, dropping result");
          }
        }
      } else {
        debug!(key = %encoded, "key invalidated during fetch, not storing");
      }

      result
    });

    async move {
      handle
        .await
        .unwrap_or_else(|e| Err(Error::Internal(format!("fetch task failed: {}", e))))
    }
    .boxed()
    .shared()
  }

  /// Store `data` under `key` as if it had just been fetched.
  pub fn set<T: Serialize>(&self, key: &QueryKey, data: &T) -> Result<()> {
    let encoded = key.encode();
    let value = serde_json::to_value(data).map_err(|e| Error::Decode(e.to_string()))?;

    let mut inflight = self.lock_inflight()?;
    inflight.remove(&encoded);
    self
      .storage
      .put(&encoded, &CacheEntry::new(value, Utc::now(), self.stale_time))?;
    debug!(key = %key, "cache entry set");
    Ok(())
  }

  /// Remove every entry under `prefix` and detach running fetches for it.
  ///
  /// Idempotent; returns the number of stored entries removed.
  pub fn invalidate(&self, prefix: &QueryKey) -> Result<usize> {
    let encoded = prefix.encode();

    let mut inflight = self.lock_inflight()?;
    inflight.retain(|key, _| !encoded_matches(key, &encoded));
    let removed = self.storage.remove_prefix(&encoded)?;
    debug!(prefix = %prefix, removed, "cache invalidated");
    Ok(removed)
  }

  /// Drop everything, including running fetches.
  pub fn clear(&self) -> Result<usize> {
    let mut inflight = self.lock_inflight()?;
    inflight.clear();
    self.storage.clear()
  }

  /// Evict entries nobody has read within the gc time.
  pub fn collect_garbage(&self) -> Result<usize> {
    let evicted = self.storage.evict_unused(Utc::now() - self.gc_time)?;
    if evicted > 0 {
      debug!(evicted, "evicted unused cache entries");
    }
    Ok(evicted)
  }

  /// Run garbage collection every `every` until the handle is aborted.
  pub fn spawn_gc(&self, every: std::time::Duration) -> JoinHandle<()> {
    let cache = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      loop {
        ticker.tick().await;
        if let Err(e) = cache.collect_garbage() {
          warn!(error = %e, "cache garbage collection failed");
        }
      }
    })
  }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
  mutex
    .lock()
    .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      inflight: Arc::clone(&self.inflight),
      next_fetch_id: Arc::clone(&self.next_fetch_id),
      stale_time: self.stale_time,
      gc_time: self.gc_time,
    }
  }
}
