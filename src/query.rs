//! Stale-while-revalidate queries.
//!
//! A `Query<T>` owns a fetcher closure and the last result it produced.
//! Cached data can be served immediately while a fresh copy is fetched in the
//! background; data that stays stale is refreshed again once `stale_time`
//! has passed.
//!
//! # Example
//!
//! ```ignore
//! let mut query = Query::<Vec<House>>::swr(api.clone(), "houses", Params::new())?;
//!
//! // Cached houses (if any) are available right away
//! render(query.data());
//!
//! // In a loop tick
//! if query.poll() {
//!     render(query.data());
//! }
//! ```

use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{ApiClient, ApiError, GetOptions};
use crate::cache::{CacheStore, Params};

/// Default stale time, same as the cache TTL
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Where a query is in its fetch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing fetched yet
  Idle,
  /// A fetch is in flight; previous data is still available
  Loading,
  /// The last fetch succeeded
  Success,
  /// The last fetch failed; previous data is still available
  Error,
}

/// A boxed future that returns a Result<T, String>
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

pub struct Query<T> {
  status: QueryStatus,
  data: Option<T>,
  error: Option<String>,
  /// Data came from the cache and has not been confirmed by a fetch
  seeded: bool,
  enabled: bool,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  fetched_at: Option<Instant>,
  attempted_at: Option<Instant>,
  stale_time: Duration,
}

impl<T: Send + 'static> Query<T> {
  /// Create a query around `fetcher`, called on every fetch.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      seeded: false,
      enabled: true,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      fetched_at: None,
      attempted_at: None,
      stale_time: DEFAULT_STALE_TIME,
    }
  }

  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// A disabled query ignores fetch, refetch, poll and seeding.
  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn set_enabled(&mut self, enabled: bool) {
    self.enabled = enabled;
  }

  pub fn status(&self) -> QueryStatus {
    self.status
  }

  /// Latest data, fresh or stale.
  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// True when the data came from the cache and no fetch confirmed it yet,
  /// or when it is older than the stale time.
  pub fn is_stale(&self) -> bool {
    if self.data.is_none() {
      return false;
    }
    self.seeded || self.fetched_at.is_some_and(|t| t.elapsed() > self.stale_time)
  }

  /// Start fetching unless a fetch is already in flight.
  pub fn fetch(&mut self) {
    if !self.enabled || self.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Start a new fetch, dropping the result of any pending one.
  pub fn refetch(&mut self) {
    if !self.enabled {
      return;
    }
    self.receiver = None;
    self.start_fetch();
  }

  /// Pick up a finished fetch without blocking, then start a background
  /// refresh if the data is stale and the last attempt is older than the
  /// stale time.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    if !self.enabled {
      return false;
    }

    let changed = self.receive();
    if changed || self.is_loading() || !self.is_stale() {
      return changed;
    }

    let due = self
      .attempted_at
      .map_or(true, |t| t.elapsed() >= self.stale_time);
    if due {
      debug!("Refreshing stale query");
      self.start_fetch();
      return true;
    }
    false
  }

  fn receive(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.data = Some(data);
        self.error = None;
        self.seeded = false;
        self.status = QueryStatus::Success;
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.error = Some(error);
        self.status = QueryStatus::Error;
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.error = Some("Query was cancelled".to_string());
        self.status = QueryStatus::Error;
        self.receiver = None;
        true
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.status = QueryStatus::Loading;
    self.error = None;
    self.attempted_at = Some(Instant::now());

    let future = (self.fetcher)();
    tokio::spawn(async move {
      // Receiver may have been dropped by a refetch
      let _ = tx.send(future.await);
    });
  }
}

impl<T: DeserializeOwned + Send + 'static> Query<T> {
  /// Serve the value cached under `key`, if any, and mark it stale.
  ///
  /// Returns whether anything was found.
  pub fn seed_from_cache(&mut self, cache: &CacheStore, key: &str) -> bool {
    if !self.enabled {
      return false;
    }

    let Some(data) = cache
      .get(key)
      .and_then(|value| serde_json::from_value::<T>(value).ok())
    else {
      return false;
    };

    self.data = Some(data);
    self.seeded = true;
    if self.status == QueryStatus::Idle {
      self.status = QueryStatus::Success;
    }
    true
  }

  /// A query over a GET endpoint: seeded from the response cache and
  /// already fetching a fresh copy.
  pub fn swr(api: ApiClient, endpoint: &str, params: Params) -> Result<Self, ApiError> {
    let key = api.cache_key_for(endpoint, &params)?;
    let cache = api.cache().clone();
    let endpoint = endpoint.to_string();

    let mut query = Query::new(move || {
      let api = api.clone();
      let endpoint = endpoint.clone();
      let params = params.clone();
      async move {
        api
          .get::<T>(&endpoint, &params, GetOptions::forced(true))
          .await
          .map_err(|e| e.to_string())
      }
    });

    query.seed_from_cache(&cache, &key);
    query.fetch();
    Ok(query)
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("status", &self.status)
      .field("data", &self.data)
      .field("error", &self.error)
      .field("seeded", &self.seeded)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}
