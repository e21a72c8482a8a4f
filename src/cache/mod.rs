//! Client-side response cache.
//!
//! This module provides the read-through cache used by the API client:
//! - Entries are namespaced under a fixed key prefix
//! - Keys are derived from the request url and its sorted parameters
//! - Entries expire five minutes after they were stored
//! - Invalidation removes every entry whose key contains a pattern
//! - Storage failures degrade to cache misses and are never propagated

mod key;
mod layer;
mod storage;
mod traits;

pub use key::{cache_key, Params, CACHE_PREFIX};
pub use layer::CacheStore;
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, Clock, ManualClock, SystemClock};
