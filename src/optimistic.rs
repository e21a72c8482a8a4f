//! Pending-value overlay for optimistic updates.
//!
//! Keys name a logical entity (`house_3`, `house_temp_..`, `house_delete_3`).
//! A `None` value marks a pending deletion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Tracks values written locally but not yet confirmed by the server.
///
/// Clones share the same overlay.
#[derive(Debug)]
pub struct OptimisticTracker<T> {
  updates: Arc<Mutex<HashMap<String, Option<T>>>>,
}

impl<T: Clone> OptimisticTracker<T> {
  pub fn new() -> Self {
    Self {
      updates: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Insert or overwrite the pending value for `key`.
  pub fn add_optimistic_update(&self, key: &str, value: Option<T>) {
    self.lock().insert(key.to_string(), value);
  }

  pub fn remove_optimistic_update(&self, key: &str) {
    self.lock().remove(key);
  }

  /// The pending value for `key`, or `fallback` when there is none.
  ///
  /// A pending deletion also yields `fallback`.
  pub fn get_optimistic_data(&self, key: &str, fallback: T) -> T {
    match self.lock().get(key) {
      Some(Some(value)) => value.clone(),
      _ => fallback,
    }
  }

  pub fn clear_optimistic_updates(&self) {
    self.lock().clear();
  }

  pub fn contains(&self, key: &str) -> bool {
    self.lock().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<T>>> {
    self.updates.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl<T: Clone> Default for OptimisticTracker<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for OptimisticTracker<T> {
  fn clone(&self) -> Self {
    Self {
      updates: Arc::clone(&self.updates),
    }
  }
}
