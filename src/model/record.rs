//! Identity and merge rules shared by every REST-backed entity.

use chrono::Utc;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier of a record.
///
/// Server ids are integers. Temporary ids only exist on the client while a
/// create is in flight. A record built locally has no id at all until it is
/// created. Server ids sort first, unassigned ones last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
  Server(u64),
  Temp(String),
  /// Not created yet; `null` on the wire
  Unassigned,
}

impl RecordId {
  /// A fresh time-based temporary id (`temp_<millis>_<seq>`).
  pub fn temporary() -> Self {
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RecordId::Temp(format!("temp_{}_{}", Utc::now().timestamp_millis(), seq))
  }

  /// Id of a record the server has not created yet.
  ///
  /// Never sent: create requests omit the id so the server assigns one.
  pub fn unassigned() -> Self {
    RecordId::Unassigned
  }

  pub fn is_temporary(&self) -> bool {
    matches!(self, RecordId::Temp(_))
  }

  pub fn as_server(&self) -> Option<u64> {
    match self {
      RecordId::Server(id) => Some(*id),
      RecordId::Temp(_) | RecordId::Unassigned => None,
    }
  }
}

impl From<u64> for RecordId {
  fn from(id: u64) -> Self {
    RecordId::Server(id)
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecordId::Server(id) => write!(f, "{}", id),
      RecordId::Temp(id) => f.write_str(id),
      RecordId::Unassigned => f.write_str("-"),
    }
  }
}

/// An entity stored in one REST collection.
pub trait Record:
  Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
  /// Collection path on the server (e.g. "houses"). Also the cache
  /// invalidation pattern for writes to this collection.
  fn collection() -> &'static str;

  /// Singular name used in optimistic update keys (e.g. "house").
  fn kind() -> &'static str;

  fn id(&self) -> &RecordId;

  fn set_id(&mut self, id: RecordId);
}

/// Endpoint of one record of `R`.
pub fn item_endpoint<R: Record>(id: &RecordId) -> String {
  format!("{}/{}", R::collection(), id)
}

/// JSON body for creating `record`: its fields without the id.
pub fn create_body<R: Record>(record: &R) -> Result<Value, serde_json::Error> {
  let mut body = serde_json::to_value(record)?;
  if let Value::Object(fields) = &mut body {
    fields.remove("id");
  }
  Ok(body)
}

/// Shallow-merge a JSON object `patch` over `record`.
pub fn merge_patch<R: Record>(record: &R, patch: &Value) -> Result<R, serde_json::Error> {
  let patch_fields = patch
    .as_object()
    .ok_or_else(|| serde_json::Error::custom("patch must be a JSON object"))?;

  let mut merged = serde_json::to_value(record)?;
  if let Value::Object(fields) = &mut merged {
    for (key, value) in patch_fields {
      fields.insert(key.clone(), value.clone());
    }
  }

  serde_json::from_value(merged)
}
