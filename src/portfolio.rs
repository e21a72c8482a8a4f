//! Cross-collection operations: validation, occupancy and payment upserts.
//!
//! Occupancy (`occupied_units` on a house) is a denormalized counter. It is
//! never incremented or decremented here: after a tenant write the affected
//! houses are recounted from the tenant list and rewritten when they drift.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::model::{Expense, House, Payment, RecordId, Tenant};
use crate::resource::{Expenses, Houses, Payments, Tenants};
use crate::validation::{validate_expense, validate_house, validate_payment, validate_tenant, ValidationErrors};

#[derive(Debug, Error)]
pub enum PortfolioError {
  #[error("{0}")]
  Validation(#[from] ValidationErrors),

  #[error(transparent)]
  Api(#[from] ApiError),

  #[error("record {0} not found")]
  NotFound(RecordId),
}

/// The four collections of the application, each on its own client instance.
#[derive(Clone)]
pub struct Portfolio {
  houses: Houses,
  tenants: Tenants,
  payments: Payments,
  expenses: Expenses,
}

impl Portfolio {
  /// Handles for every collection; payments and expenses filtered by `month`.
  pub fn new(api: &ApiClient, month: Option<String>) -> Self {
    Self {
      houses: Houses::new(api.instance()),
      tenants: Tenants::new(api.instance()),
      payments: Payments::with_month(api.instance(), month.clone()),
      expenses: Expenses::with_month(api.instance(), month),
    }
  }

  pub fn houses(&self) -> &Houses {
    &self.houses
  }

  pub fn tenants(&self) -> &Tenants {
    &self.tenants
  }

  pub fn payments(&self) -> &Payments {
    &self.payments
  }

  pub fn expenses(&self) -> &Expenses {
    &self.expenses
  }

  /// Load every collection not loaded yet.
  pub async fn load(&self) -> Result<(), ApiError> {
    futures::try_join!(
      self.houses.ensure_loaded(),
      self.tenants.ensure_loaded(),
      self.payments.ensure_loaded(),
      self.expenses.ensure_loaded(),
    )?;
    Ok(())
  }

  /// Move the month-filtered collections to `month`.
  pub async fn set_month(&self, month: Option<String>) -> Result<(), ApiError> {
    futures::try_join!(
      self.payments.set_month(month.clone()),
      self.expenses.set_month(month),
    )?;
    Ok(())
  }

  pub async fn add_house(&self, house: House) -> Result<House, PortfolioError> {
    validate_house(&house)?;
    Ok(self.houses.add(house).await?)
  }

  pub async fn update_house(&self, id: &RecordId, patch: Value) -> Result<House, PortfolioError> {
    let current = self
      .houses
      .find(id)
      .ok_or_else(|| PortfolioError::NotFound(id.clone()))?;
    let merged = crate::model::merge_patch(&current, &patch).map_err(ApiError::from)?;
    validate_house(&merged)?;

    self
      .houses
      .update(id, patch)
      .await?
      .ok_or_else(|| PortfolioError::NotFound(id.clone()))
  }

  pub async fn delete_house(&self, id: &RecordId) -> Result<bool, PortfolioError> {
    Ok(self.houses.delete(id).await?)
  }

  /// Create a tenant in a house with a free unit, then recount that house.
  ///
  /// The tenant's rent defaults to the house rent.
  pub async fn add_tenant(&self, mut tenant: Tenant) -> Result<Tenant, PortfolioError> {
    self.load_occupancy_sources().await?;
    let houses = self.houses.items();
    validate_tenant(&tenant, None, &houses)?;

    if tenant.rent.is_none() {
      tenant.rent = houses
        .iter()
        .find(|h| h.id.as_server() == Some(tenant.house_id))
        .map(|h| h.rent);
    }

    let created = self.tenants.add(tenant).await?;
    self.reconcile_after_tenant_write(&[created.house_id]).await;
    Ok(created)
  }

  /// Edit a tenant; moving to another house recounts both houses.
  pub async fn update_tenant(&self, id: &RecordId, patch: Value) -> Result<Tenant, PortfolioError> {
    self.load_occupancy_sources().await?;
    let previous = self
      .tenants
      .find(id)
      .ok_or_else(|| PortfolioError::NotFound(id.clone()))?;
    let edited = crate::model::merge_patch(&previous, &patch).map_err(ApiError::from)?;
    validate_tenant(&edited, Some(&previous), &self.houses.items())?;

    let updated = self
      .tenants
      .update(id, patch)
      .await?
      .ok_or_else(|| PortfolioError::NotFound(id.clone()))?;

    if previous.house_id != updated.house_id {
      self
        .reconcile_after_tenant_write(&[previous.house_id, updated.house_id])
        .await;
    }
    Ok(updated)
  }

  pub async fn delete_tenant(&self, id: &RecordId) -> Result<bool, PortfolioError> {
    self.load_occupancy_sources().await?;
    let Some(tenant) = self.tenants.find(id) else {
      return Ok(false);
    };

    let deleted = self.tenants.delete(id).await?;
    if deleted {
      self.reconcile_after_tenant_write(&[tenant.house_id]).await;
    }
    Ok(deleted)
  }

  /// Houses and tenants must both be loaded before occupancy can be counted.
  async fn load_occupancy_sources(&self) -> Result<(), ApiError> {
    futures::try_join!(self.houses.ensure_loaded(), self.tenants.ensure_loaded())?;
    Ok(())
  }

  /// Rewrite `occupied_units` of each listed house that disagrees with the
  /// number of tenants assigned to it. Returns the houses that were changed.
  ///
  /// Nothing is written while the tenant list has not been loaded.
  pub async fn reconcile_occupancy(&self, house_ids: &[u64]) -> Result<Vec<House>, ApiError> {
    if !self.tenants.has_loaded() {
      warn!(?house_ids, "Tenants not loaded, skipping occupancy reconciliation");
      return Ok(Vec::new());
    }

    let tenants = self.tenants.items();
    let mut changed = Vec::new();

    for house in self.houses.items() {
      let Some(house_id) = house.id.as_server() else {
        continue;
      };
      if !house_ids.contains(&house_id) {
        continue;
      }

      let occupied = tenants
        .iter()
        .filter(|t| t.house_id == house_id && !t.id.is_temporary())
        .count() as u32;
      if occupied == house.occupied_units {
        continue;
      }

      info!(house_id, from = house.occupied_units, to = occupied, "Reconciling occupancy");
      if let Some(updated) = self
        .houses
        .update(&house.id, json!({ "occupied_units": occupied }))
        .await?
      {
        changed.push(updated);
      }
    }

    Ok(changed)
  }

  async fn reconcile_after_tenant_write(&self, house_ids: &[u64]) {
    if let Err(e) = self.reconcile_occupancy(house_ids).await {
      warn!(?house_ids, error = %e, "Occupancy reconciliation failed, will retry on next tenant write");
    }
  }

  /// Record a payment, updating the existing one for the same tenant and
  /// month instead of creating a duplicate.
  ///
  /// The payments handle is moved to the payment's month first, so the
  /// lookup always sees that month's server records.
  pub async fn record_payment(&self, payment: Payment) -> Result<Payment, PortfolioError> {
    validate_payment(&payment)?;
    self.payments.set_month(Some(payment.month.clone())).await?;

    let existing = self
      .payments
      .items()
      .into_iter()
      .find(|p| p.tenant_id == payment.tenant_id && p.month == payment.month);

    match existing {
      Some(existing) => {
        let patch = crate::model::create_body(&payment).map_err(ApiError::from)?;
        self
          .payments
          .update(&existing.id, patch)
          .await?
          .ok_or(PortfolioError::NotFound(existing.id))
      }
      None => Ok(self.payments.add(payment).await?),
    }
  }

  pub async fn delete_payment(&self, id: &RecordId) -> Result<bool, PortfolioError> {
    Ok(self.payments.delete(id).await?)
  }

  /// Book an expense; its month is taken from its date.
  pub async fn add_expense(&self, mut expense: Expense) -> Result<Expense, PortfolioError> {
    expense.sync_month();
    validate_expense(&expense)?;
    Ok(self.expenses.add(expense).await?)
  }

  pub async fn delete_expense(&self, id: &RecordId) -> Result<bool, PortfolioError> {
    Ok(self.expenses.delete(id).await?)
  }
}
