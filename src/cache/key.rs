//! Request parameters and cache key derivation.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Namespace prefix shared by every cache entry.
pub const CACHE_PREFIX: &str = "rent_app_cache_";

/// Query parameters of a GET request.
///
/// Backed by an ordered map so that two logically identical parameter sets
/// always serialize the same way, whatever order they were built in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(key, value);
    self
  }

  /// Insert `value` when present, `null` otherwise.
  pub fn with_optional(self, key: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
    match value {
      Some(v) => self.with(key, v),
      None => self.with(key, Value::Null),
    }
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Pairs for the query string. Null values are left out.
  pub fn query_pairs(&self) -> Vec<(String, String)> {
    self
      .0
      .iter()
      .filter_map(|(key, value)| {
        let rendered = match value {
          Value::Null => return None,
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        Some((key.clone(), rendered))
      })
      .collect()
  }
}

/// Cache key for a request: namespace prefix, full url, canonical params JSON.
///
/// Kept readable on purpose so that invalidation by substring (for example
/// the collection name) can find it.
pub fn cache_key(url: &str, params: &Params) -> String {
  let params_json = serde_json::to_string(&params.0).unwrap_or_default();
  format!("{}{}{}", CACHE_PREFIX, url, params_json)
}
