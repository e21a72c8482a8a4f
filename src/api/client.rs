use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{cache_key, CacheStore, Params};

use super::error::ApiError;

/// Options for a GET request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
  /// Skip the cache read (the response is still stored when `cache` is set)
  pub force_refresh: bool,
  /// Read from and write to the cache
  pub cache: bool,
}

impl Default for GetOptions {
  fn default() -> Self {
    Self {
      force_refresh: false,
      cache: true,
    }
  }
}

impl GetOptions {
  pub fn forced(force_refresh: bool) -> Self {
    Self {
      force_refresh,
      ..Self::default()
    }
  }

  pub fn uncached() -> Self {
    Self {
      force_refresh: true,
      cache: false,
    }
  }
}

/// Options for a POST, PUT or DELETE request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutateOptions {
  /// Cache entries whose key contains this are dropped after success
  pub invalidate_pattern: Option<String>,
}

impl MutateOptions {
  pub fn invalidating(pattern: impl Into<String>) -> Self {
    Self {
      invalidate_pattern: Some(pattern.into()),
    }
  }
}

/// Loading/error pair of a client instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallState {
  pub loading: bool,
  pub error: Option<String>,
}

/// REST client with a read-through cache.
///
/// Clones share the transport, the cache, and the call state. Use
/// [`ApiClient::instance`] for a client with its own call state.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  cache: CacheStore,
  /// Reflects the most recently started call only
  state: Arc<Mutex<CallState>>,
}

impl ApiClient {
  pub fn new(base_url: &str, cache: CacheStore) -> Result<Self, ApiError> {
    Ok(Self {
      http: reqwest::Client::new(),
      base_url: normalize_base_url(base_url)?,
      cache,
      state: Arc::new(Mutex::new(CallState::default())),
    })
  }

  /// A client sharing transport and cache but with its own loading/error pair.
  pub fn instance(&self) -> Self {
    Self {
      http: self.http.clone(),
      base_url: self.base_url.clone(),
      cache: self.cache.clone(),
      state: Arc::new(Mutex::new(CallState::default())),
    }
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  /// Whether the most recently started call is still running.
  ///
  /// Concurrent calls on the same instance overwrite each other here; rely
  /// on each call's own result when that matters.
  pub fn loading(&self) -> bool {
    self.call_state().loading
  }

  /// Error of the most recently finished call, if it failed.
  pub fn error(&self) -> Option<String> {
    self.call_state().error
  }

  pub fn call_state(&self) -> CallState {
    self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// GET `endpoint`, serving from the cache when allowed.
  pub async fn get<T: DeserializeOwned>(
    &self,
    endpoint: &str,
    params: &Params,
    options: GetOptions,
  ) -> Result<T, ApiError> {
    let url = self.url(endpoint)?;
    let key = cache_key(url.as_str(), params);

    if options.cache && !options.force_refresh {
      if let Some(cached) = self.cache.get(&key) {
        match serde_json::from_value(cached) {
          Ok(data) => {
            debug!(%url, "Cache hit");
            return Ok(data);
          }
          Err(e) => warn!(%url, error = %e, "Cached value has unexpected shape"),
        }
      }
    }

    self
      .track(async {
        debug!(%url, "GET");
        let mut request = self.http.get(url.clone());
        let pairs = params.query_pairs();
        if !pairs.is_empty() {
          request = request.query(&pairs);
        }

        let data = read_json(request.send().await?).await?;
        let parsed: T = serde_json::from_value(data.clone())?;

        if options.cache {
          self.cache.set(&key, &data);
        }

        Ok::<_, ApiError>(parsed)
      })
      .await
  }

  /// POST `data` as JSON, invalidating the cache on success.
  pub async fn post<B, T>(
    &self,
    endpoint: &str,
    data: &B,
    options: &MutateOptions,
  ) -> Result<T, ApiError>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    self.send_json(Method::POST, endpoint, data, options).await
  }

  /// PUT `data` as JSON, invalidating the cache on success.
  pub async fn put<B, T>(&self, endpoint: &str, data: &B, options: &MutateOptions) -> Result<T, ApiError>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    self.send_json(Method::PUT, endpoint, data, options).await
  }

  /// DELETE `endpoint`, invalidating the cache on success.
  pub async fn delete(&self, endpoint: &str, options: &MutateOptions) -> Result<bool, ApiError> {
    let url = self.url(endpoint)?;

    self
      .track(async {
        debug!(%url, "DELETE");
        let response = self.http.delete(url.clone()).send().await?;
        check_status(&response)?;
        self.invalidate(options);
        Ok::<_, ApiError>(true)
      })
      .await
  }

  /// The cache key a GET of `endpoint` with `params` is stored under.
  pub fn cache_key_for(&self, endpoint: &str, params: &Params) -> Result<String, ApiError> {
    Ok(cache_key(self.url(endpoint)?.as_str(), params))
  }

  /// Drop every cache entry.
  pub fn clear_all_cache(&self) {
    self.cache.clear(None);
  }

  /// Drop cache entries whose key contains `pattern`.
  pub fn clear_cache_by_pattern(&self, pattern: &str) {
    self.cache.clear(Some(pattern));
  }

  async fn send_json<B, T>(
    &self,
    method: Method,
    endpoint: &str,
    data: &B,
    options: &MutateOptions,
  ) -> Result<T, ApiError>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let url = self.url(endpoint)?;

    self
      .track(async {
        debug!(%url, %method, "Sending");
        let response = self
          .http
          .request(method.clone(), url.clone())
          .json(data)
          .send()
          .await?;

        let body = read_json(response).await?;
        self.invalidate(options);
        let parsed: T = serde_json::from_value(body)?;
        Ok::<_, ApiError>(parsed)
      })
      .await
  }

  fn invalidate(&self, options: &MutateOptions) {
    if let Some(pattern) = options.invalidate_pattern.as_deref() {
      if !pattern.is_empty() {
        self.cache.clear(Some(pattern));
      }
    }
  }

  /// Run a network call, mirroring its progress into the shared call state.
  async fn track<T, F>(&self, call: F) -> Result<T, ApiError>
  where
    F: Future<Output = Result<T, ApiError>>,
  {
    self.set_state(CallState {
      loading: true,
      error: None,
    });

    let result = call.await;

    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.loading = false;
    if let Err(e) = &result {
      state.error = Some(e.to_string());
    }

    result
  }

  fn set_state(&self, next: CallState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
  }

  fn url(&self, endpoint: &str) -> Result<Url, ApiError> {
    self
      .base_url
      .join(endpoint.trim_start_matches('/'))
      .map_err(|source| ApiError::Url {
        endpoint: endpoint.to_string(),
        source,
      })
  }
}

/// Parse the base url, making sure relative endpoints append to its path.
fn normalize_base_url(base_url: &str) -> Result<Url, ApiError> {
  let mut url = Url::parse(base_url).map_err(|source| ApiError::Url {
    endpoint: base_url.to_string(),
    source,
  })?;

  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }

  Ok(url)
}

fn check_status(response: &Response) -> Result<(), ApiError> {
  let status = response.status();
  if status.is_success() {
    Ok(())
  } else {
    Err(ApiError::Http {
      status: status.as_u16(),
    })
  }
}

async fn read_json(response: Response) -> Result<Value, ApiError> {
  check_status(&response)?;
  let bytes = response.bytes().await?;
  Ok(serde_json::from_slice(&bytes)?)
}
