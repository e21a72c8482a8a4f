//! Stateful collections bound to one REST resource.
//!
//! A [`Resource`] keeps a local replica of a server collection. Reads go
//! through the cached API client; writes are applied to the local replica
//! first and reconciled with the server response afterwards:
//!
//! - success replaces the optimistic record with the server's version
//! - failure restores exactly what was there before and returns the error
//!
//! Handles are cheap to clone and clones share state, so a view can read
//! [`Resource::items`] while a mutation is still in flight.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

use crate::api::{ApiClient, ApiError, GetOptions, MutateOptions};
use crate::cache::Params;
use crate::model::{create_body, item_endpoint, merge_patch, Expense, House, Payment, Record, RecordId, Tenant};
use crate::optimistic::OptimisticTracker;

pub type Houses = Resource<House>;
pub type Tenants = Resource<Tenant>;
pub type Payments = Resource<Payment>;
pub type Expenses = Resource<Expense>;

#[derive(Debug)]
struct ResourceState<R> {
  items: Vec<R>,
  loading: bool,
  error: Option<String>,
  /// Set by the first successful fetch, cleared only by a forced one
  has_loaded: bool,
  /// Month filter the collection was (or is to be) loaded with
  month: Option<String>,
}

/// Local replica of one REST collection with optimistic writes.
pub struct Resource<R: Record> {
  api: ApiClient,
  optimistic: OptimisticTracker<R>,
  /// Whole-list overlay, keyed by the collection name
  listing: OptimisticTracker<Vec<R>>,
  state: Arc<Mutex<ResourceState<R>>>,
}

impl<R: Record> Clone for Resource<R> {
  fn clone(&self) -> Self {
    Self {
      api: self.api.clone(),
      optimistic: self.optimistic.clone(),
      listing: self.listing.clone(),
      state: Arc::clone(&self.state),
    }
  }
}

impl<R: Record> Resource<R> {
  /// Unfiltered collection.
  pub fn new(api: ApiClient) -> Self {
    Self::with_month(api, None)
  }

  /// Collection filtered by `?month=` when `month` is set.
  pub fn with_month(api: ApiClient, month: Option<String>) -> Self {
    Self {
      api,
      optimistic: OptimisticTracker::new(),
      listing: OptimisticTracker::new(),
      state: Arc::new(Mutex::new(ResourceState {
        items: Vec::new(),
        loading: true,
        error: None,
        has_loaded: false,
        month,
      })),
    }
  }

  /// The visible collection: a pending list staged in [`Resource::listing`]
  /// under the collection name, else the local replica.
  ///
  /// The handle's own writes never stage a list, they edit the replica.
  pub fn items(&self) -> Vec<R> {
    let items = self.lock().items.clone();
    self.listing.get_optimistic_data(R::collection(), items)
  }

  pub fn find(&self, id: &RecordId) -> Option<R> {
    self.lock().items.iter().find(|item| item.id() == id).cloned()
  }

  /// True only for the first load.
  pub fn is_loading(&self) -> bool {
    let state = self.lock();
    state.loading && !state.has_loaded
  }

  pub fn has_loaded(&self) -> bool {
    self.lock().has_loaded
  }

  pub fn error(&self) -> Option<String> {
    self.lock().error.clone()
  }

  pub fn month(&self) -> Option<String> {
    self.lock().month.clone()
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  /// Entity-level optimistic overlay.
  pub fn optimistic(&self) -> &OptimisticTracker<R> {
    &self.optimistic
  }

  /// Collection-level overlay read by [`Resource::items`].
  pub fn listing(&self) -> &OptimisticTracker<Vec<R>> {
    &self.listing
  }

  /// Load once. Later calls return the local collection.
  pub async fn ensure_loaded(&self) -> Result<Vec<R>, ApiError> {
    let month = self.month();
    self.set_month(month).await
  }

  /// Point the collection at `month`, fetching when it is not loaded yet
  /// or was loaded for another month.
  pub async fn set_month(&self, month: Option<String>) -> Result<Vec<R>, ApiError> {
    let needs_fetch = {
      let state = self.lock();
      !state.has_loaded || state.month != month
    };

    if needs_fetch {
      self.fetch_scoped(month, false).await
    } else {
      Ok(self.items())
    }
  }

  /// Fetch the collection for the current month.
  pub async fn fetch(&self, force_refresh: bool) -> Result<Vec<R>, ApiError> {
    let month = self.month();
    self.fetch_scoped(month, force_refresh).await
  }

  /// Force a refetch of the current month, bypassing the cache.
  pub async fn refetch(&self) -> Result<Vec<R>, ApiError> {
    self.fetch(true).await
  }

  /// Force a refetch for `month`, bypassing the cache.
  pub async fn refetch_month(&self, month: Option<String>) -> Result<Vec<R>, ApiError> {
    self.fetch_scoped(month, true).await
  }

  async fn fetch_scoped(&self, month: Option<String>, force_refresh: bool) -> Result<Vec<R>, ApiError> {
    {
      let mut state = self.lock();
      if state.loading && state.has_loaded && !force_refresh && state.month == month {
        return Ok(state.items.clone());
      }
      state.loading = true;
      state.error = None;
      if force_refresh {
        state.has_loaded = false;
      }
    }

    let params = match &month {
      Some(m) => Params::new().with("month", m.as_str()),
      None => Params::new(),
    };

    let result = self
      .api
      .get::<Vec<R>>(R::collection(), &params, GetOptions::forced(force_refresh))
      .await;

    let mut state = self.lock();
    state.loading = false;
    match result {
      Ok(items) => {
        state.items = items.clone();
        state.month = month;
        state.has_loaded = true;
        Ok(items)
      }
      Err(err) => {
        error!(collection = R::collection(), error = %err, "Error fetching collection");
        state.error = Some(err.to_string());
        Err(err)
      }
    }
  }

  /// Create `record`, showing it under a temporary id until the server
  /// answers.
  pub async fn add(&self, record: R) -> Result<R, ApiError> {
    let body = create_body(&record)?;
    let temp_id = RecordId::temporary();
    let key = format!("{}_{}", R::kind(), temp_id);

    let mut optimistic = record;
    optimistic.set_id(temp_id.clone());
    self.optimistic.add_optimistic_update(&key, Some(optimistic.clone()));
    self.lock().items.push(optimistic);

    let result = self
      .api
      .post::<_, R>(R::collection(), &body, &MutateOptions::invalidating(R::collection()))
      .await;

    {
      let mut state = self.lock();
      match &result {
        Ok(created) => {
          for item in state.items.iter_mut().filter(|item| item.id() == &temp_id) {
            *item = created.clone();
          }
        }
        Err(_) => state.items.retain(|item| item.id() != &temp_id),
      }
    }
    self.optimistic.remove_optimistic_update(&key);

    match &result {
      Ok(created) => info!(collection = R::collection(), id = %created.id(), "Created"),
      Err(err) => error!(collection = R::collection(), error = %err, "Create failed, reverted"),
    }
    result
  }

  /// Merge `patch` into the record with `id`.
  ///
  /// Returns `Ok(None)` without any request when the record is not in the
  /// local collection.
  pub async fn update(&self, id: &RecordId, patch: Value) -> Result<Option<R>, ApiError> {
    let Some(original) = self.find(id) else {
      return Ok(None);
    };

    let merged = merge_patch(&original, &patch)?;
    let key = format!("{}_{}", R::kind(), id);

    self.optimistic.add_optimistic_update(&key, Some(merged.clone()));
    self.replace(id, merged);

    let result = self
      .api
      .put::<_, R>(&item_endpoint::<R>(id), &patch, &MutateOptions::invalidating(R::collection()))
      .await;

    match &result {
      Ok(updated) => self.replace(id, updated.clone()),
      Err(_) => self.replace(id, original),
    }
    self.optimistic.remove_optimistic_update(&key);

    match result {
      Ok(updated) => {
        info!(collection = R::collection(), %id, "Updated");
        Ok(Some(updated))
      }
      Err(err) => {
        error!(collection = R::collection(), %id, error = %err, "Update failed, reverted");
        Err(err)
      }
    }
  }

  /// Delete the record with `id`.
  ///
  /// Returns `Ok(false)` without any request when the record is not in the
  /// local collection.
  pub async fn delete(&self, id: &RecordId) -> Result<bool, ApiError> {
    let Some(removed) = self.find(id) else {
      return Ok(false);
    };

    let key = format!("{}_delete_{}", R::kind(), id);
    self.optimistic.add_optimistic_update(&key, None);
    self.lock().items.retain(|item| item.id() != id);

    let result = self
      .api
      .delete(&item_endpoint::<R>(id), &MutateOptions::invalidating(R::collection()))
      .await;

    if result.is_err() {
      let mut state = self.lock();
      state.items.push(removed);
      state.items.sort_by(|a, b| a.id().cmp(b.id()));
    }
    self.optimistic.remove_optimistic_update(&key);

    match result {
      Ok(deleted) => {
        info!(collection = R::collection(), %id, "Deleted");
        Ok(deleted)
      }
      Err(err) => {
        error!(collection = R::collection(), %id, error = %err, "Delete failed, reverted");
        Err(err)
      }
    }
  }

  fn replace(&self, id: &RecordId, record: R) {
    let mut state = self.lock();
    for item in state.items.iter_mut().filter(|item| item.id() == id) {
      *item = record.clone();
    }
  }

  fn lock(&self) -> MutexGuard<'_, ResourceState<R>> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheStore, MemoryStorage};
  use serde_json::json;
  use std::time::Duration;
  use wiremock::matchers::{body_json, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn api_for(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri(), CacheStore::new(MemoryStorage::new())).unwrap()
  }

  fn house_json(id: u64, reference: &str) -> Value {
    json!({
      "id": id,
      "reference": reference,
      "address": "Dakar",
      "type": "Villa",
      "total_units": 2,
      "occupied_units": 0,
      "rent": 100000
    })
  }

  async fn loaded_houses(server: &MockServer) -> Houses {
    Mock::given(method("GET"))
      .and(path("/houses"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!([house_json(1, "A"), house_json(2, "B"), house_json(3, "C")])),
      )
      .mount(server)
      .await;

    let houses = Houses::new(api_for(server));
    houses.ensure_loaded().await.unwrap();
    houses
  }

  fn ids(houses: &Houses) -> Vec<RecordId> {
    houses.items().iter().map(|h| h.id.clone()).collect()
  }

  #[tokio::test]
  async fn test_initial_state_then_loaded() {
    let server = MockServer::start().await;
    let houses = Houses::new(api_for(&server));
    assert!(houses.is_loading());
    assert!(!houses.has_loaded());

    Mock::given(method("GET"))
      .and(path("/houses"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([house_json(1, "A")])))
      .expect(1)
      .mount(&server)
      .await;

    houses.ensure_loaded().await.unwrap();
    houses.ensure_loaded().await.unwrap();

    assert!(!houses.is_loading());
    assert!(houses.has_loaded());
    assert_eq!(houses.items().len(), 1);
  }

  #[tokio::test]
  async fn test_items_read_through_collection_overlay() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;
    assert_eq!(ids(&houses).len(), 3);

    let staged = vec![houses.find(&RecordId::Server(2)).unwrap()];
    houses.listing().add_optimistic_update("houses", Some(staged.clone()));
    assert_eq!(houses.items(), staged);
    assert_eq!(houses.clone().items(), staged);

    houses.listing().add_optimistic_update("houses", None);
    assert_eq!(ids(&houses).len(), 3);

    houses.listing().remove_optimistic_update("houses");
    assert_eq!(
      ids(&houses),
      vec![RecordId::Server(1), RecordId::Server(2), RecordId::Server(3)]
    );
  }

  #[tokio::test]
  async fn test_fetch_failure_sets_error_and_returns_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let tenants = Tenants::new(api_for(&server));
    let err = tenants.fetch(false).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(tenants.error().as_deref(), Some("HTTP error! status: 500"));
    assert!(!tenants.has_loaded());
  }

  #[tokio::test]
  async fn test_add_is_visible_before_server_answers() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;

    Mock::given(method("POST"))
      .and(path("/houses"))
      .and(body_json(json!({
        "reference": "NEW",
        "address": "Thiès",
        "type": "Studio",
        "total_units": 1,
        "occupied_units": 0,
        "rent": 50000.0
      })))
      .respond_with(
        ResponseTemplate::new(201)
          .set_body_json(json!({
            "id": 42,
            "reference": "NEW",
            "address": "Thiès",
            "type": "Studio",
            "total_units": 1,
            "occupied_units": 0,
            "rent": 50000
          }))
          .set_delay(Duration::from_millis(300)),
      )
      .expect(1)
      .mount(&server)
      .await;

    let pending = tokio::spawn({
      let houses = houses.clone();
      async move {
        houses
          .add(House::new("NEW", "Thiès", "Studio", 1, 50000.0))
          .await
      }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let during = houses.items();
    assert_eq!(during.len(), 4);
    assert!(during[3].id.is_temporary());
    assert_eq!(during[3].reference, "NEW");
    assert_eq!(houses.optimistic().len(), 1);

    let created = pending.await.unwrap().unwrap();
    assert_eq!(created.id, RecordId::Server(42));

    let after = houses.items();
    assert_eq!(after.len(), 4);
    assert_eq!(after[3].id, RecordId::Server(42));
    assert!(after.iter().all(|h| !h.id.is_temporary()));
    assert!(houses.optimistic().is_empty());
  }

  #[tokio::test]
  async fn test_failed_add_restores_collection() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;
    let before = houses.items();

    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "Invalid JSON"})))
      .mount(&server)
      .await;

    let err = houses
      .add(House::new("X", "", "Villa", 1, 1.0))
      .await
      .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(houses.items(), before);
    assert!(houses.optimistic().is_empty());
  }

  #[tokio::test]
  async fn test_update_replaces_with_server_record() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;

    let mut server_house = house_json(2, "B");
    server_house["rent"] = json!(120000);
    server_house["updated_by"] = json!("server");
    Mock::given(method("PUT"))
      .and(path("/houses/2"))
      .and(body_json(json!({"rent": 120000})))
      .respond_with(ResponseTemplate::new(200).set_body_json(server_house))
      .expect(1)
      .mount(&server)
      .await;

    let updated = houses
      .update(&RecordId::Server(2), json!({"rent": 120000}))
      .await
      .unwrap()
      .unwrap();

    assert_eq!(updated.rent, 120000.0);
    let stored = houses.find(&RecordId::Server(2)).unwrap();
    assert_eq!(stored, updated);
    assert_eq!(stored.extra.get("updated_by"), Some(&json!("server")));
  }

  #[tokio::test]
  async fn test_failed_update_restores_original_exactly() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;
    let original = houses.find(&RecordId::Server(2)).unwrap();

    Mock::given(method("PUT"))
      .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(200)))
      .mount(&server)
      .await;

    let pending = tokio::spawn({
      let houses = houses.clone();
      async move { houses.update(&RecordId::Server(2), json!({"reference": "B2"})).await }
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(houses.find(&RecordId::Server(2)).unwrap().reference, "B2");

    assert!(pending.await.unwrap().is_err());
    assert_eq!(houses.find(&RecordId::Server(2)).unwrap(), original);
  }

  #[tokio::test]
  async fn test_update_of_unknown_record_is_noop() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;

    Mock::given(method("PUT"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let result = houses
      .update(&RecordId::Server(99), json!({"rent": 1}))
      .await
      .unwrap();
    assert!(result.is_none());
  }

  #[tokio::test]
  async fn test_delete_removes_immediately() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;

    Mock::given(method("DELETE"))
      .and(path("/houses/1"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"success": true}))
          .set_delay(Duration::from_millis(200)),
      )
      .expect(1)
      .mount(&server)
      .await;

    let pending = tokio::spawn({
      let houses = houses.clone();
      async move { houses.delete(&RecordId::Server(1)).await }
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(ids(&houses), vec![RecordId::Server(2), RecordId::Server(3)]);
    assert!(houses.optimistic().contains("house_delete_1"));

    assert!(pending.await.unwrap().unwrap());
    assert_eq!(ids(&houses), vec![RecordId::Server(2), RecordId::Server(3)]);
    assert!(houses.optimistic().is_empty());
  }

  #[tokio::test]
  async fn test_failed_delete_reinserts_in_id_order() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;
    let before = houses.items();

    Mock::given(method("DELETE"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let err = houses.delete(&RecordId::Server(2)).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(houses.items(), before);
  }

  #[tokio::test]
  async fn test_delete_of_unknown_record_is_noop() {
    let server = MockServer::start().await;
    let houses = loaded_houses(&server).await;

    assert!(!houses.delete(&RecordId::Server(99)).await.unwrap());
    assert_eq!(houses.items().len(), 3);
  }

  #[tokio::test]
  async fn test_month_change_refetches_once_for_new_month() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/payments"))
      .and(query_param("month", "2024-03"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": 1, "tenant_id": 7, "month": "2024-03", "amount": 100, "paid": true}
      ])))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/payments"))
      .and(query_param("month", "2024-04"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
      .expect(1)
      .mount(&server)
      .await;

    let payments = Payments::with_month(api_for(&server), Some("2024-03".to_string()));
    payments.ensure_loaded().await.unwrap();
    assert_eq!(payments.items().len(), 1);
    assert!(payments.has_loaded());

    // Same month again: nothing to do
    payments.set_month(Some("2024-03".to_string())).await.unwrap();

    payments.set_month(Some("2024-04".to_string())).await.unwrap();
    payments.set_month(Some("2024-04".to_string())).await.unwrap();

    assert!(payments.items().is_empty());
    assert_eq!(payments.month().as_deref(), Some("2024-04"));
  }

  #[tokio::test]
  async fn test_refetch_bypasses_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/expenses"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
      .expect(2)
      .mount(&server)
      .await;

    let expenses = Expenses::new(api_for(&server));
    expenses.ensure_loaded().await.unwrap();
    expenses.fetch(false).await.unwrap();
    expenses.refetch().await.unwrap();
    assert!(expenses.has_loaded());
  }
}
