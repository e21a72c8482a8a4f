//! Core types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

/// Source of the current time for TTL and staleness checks.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
///
/// Lets TTL and staleness windows be exercised without sleeping.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  /// Move the clock forward.
  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Persisted shape of one cache entry: `{"data": ..., "timestamp": <epoch ms>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
  pub data: Value,
  pub timestamp: i64,
}

impl CacheEntry {
  pub fn new(data: Value, stored_at: DateTime<Utc>) -> Self {
    Self {
      data,
      timestamp: stored_at.timestamp_millis(),
    }
  }

  /// Age of the entry relative to `now`, in milliseconds.
  pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
    now.timestamp_millis() - self.timestamp
  }
}
