//! Cache store: namespaced, expiring JSON entries on top of a storage backend.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::key::CACHE_PREFIX;
use super::storage::CacheStorage;
use super::traits::{CacheEntry, Clock, SystemClock};

/// Read-through cache shared by every API client in the process.
///
/// Storage failures never leave this type: reads degrade to a miss and
/// writes or clears become no-ops, with a warning in the log.
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
  /// How long an entry is served before it counts as absent
  ttl: Duration,
}

impl CacheStore {
  /// Create a new cache store with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self::from_shared(Arc::new(storage))
  }

  /// Create a cache store over a backend that is also used elsewhere.
  pub fn from_shared(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      storage,
      clock: Arc::new(SystemClock),
      ttl: Duration::minutes(5),
    }
  }

  /// Replace the clock used for expiry.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Set the time-to-live of cache entries.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// The underlying storage backend.
  pub fn storage(&self) -> Arc<dyn CacheStorage> {
    Arc::clone(&self.storage)
  }

  /// The clock entries are timestamped with.
  pub fn clock(&self) -> Arc<dyn Clock> {
    Arc::clone(&self.clock)
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Get a cached value, evicting it if it has expired.
  pub fn get(&self, key: &str) -> Option<Value> {
    let raw = match self.storage.get_item(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "Cache read error");
        return None;
      }
    };

    let entry: CacheEntry = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "Cache read error");
        return None;
      }
    };

    if entry.age_millis(self.clock.now()) > self.ttl.num_milliseconds() {
      debug!(key, "Cache entry expired");
      if let Err(e) = self.storage.remove_item(key) {
        warn!(key, error = %e, "Cache eviction error");
      }
      return None;
    }

    Some(entry.data)
  }

  /// Store a value stamped with the current time.
  pub fn set(&self, key: &str, data: &Value) {
    let entry = CacheEntry::new(data.clone(), self.clock.now());
    let raw = match serde_json::to_string(&entry) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "Cache write error");
        return;
      }
    };

    if let Err(e) = self.storage.set_item(key, &raw) {
      warn!(key, error = %e, "Cache write error");
    }
  }

  /// Remove cache entries whose key contains `pattern`, or all of them.
  ///
  /// Only keys under the cache namespace are considered; other records in
  /// the same storage are left alone.
  pub fn clear(&self, pattern: Option<&str>) {
    let keys = match self.storage.keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "Cache clear error");
        return;
      }
    };

    let mut removed = 0usize;
    for key in keys {
      if !key.starts_with(CACHE_PREFIX) {
        continue;
      }
      if let Some(pattern) = pattern {
        if !pattern.is_empty() && !key.contains(pattern) {
          continue;
        }
      }
      match self.storage.remove_item(&key) {
        Ok(()) => removed += 1,
        Err(e) => warn!(key, error = %e, "Cache clear error"),
      }
    }

    debug!(pattern = pattern.unwrap_or(""), removed, "Cache cleared");
  }
}

impl Clone for CacheStore {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      ttl: self.ttl,
    }
  }
}
