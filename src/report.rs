//! Monthly aggregate over all four collections.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

use crate::api::{ApiClient, ApiError, GetOptions};
use crate::cache::{Clock, Params};
use crate::model::{Expense, House, Payment, Tenant};

/// How long a loaded aggregate stays fresh
pub const STALE_AFTER_MINUTES: i64 = 5;

/// Everything a monthly report is computed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportData {
  pub houses: Vec<House>,
  pub tenants: Vec<Tenant>,
  pub payments: Vec<Payment>,
  pub expenses: Vec<Expense>,
}

#[derive(Debug, Default)]
struct ReportState {
  data: ReportData,
  loading: bool,
  error: Option<String>,
  month: Option<String>,
  has_loaded: bool,
  loaded_at: Option<DateTime<Utc>>,
}

/// Aggregate fetcher for one month at a time.
///
/// The four collections are fetched concurrently and only applied when all
/// of them succeed. Staleness is reported, never acted upon.
#[derive(Clone)]
pub struct Reports {
  api: ApiClient,
  clock: Arc<dyn Clock>,
  stale_after: Duration,
  state: Arc<Mutex<ReportState>>,
}

impl Reports {
  pub fn new(api: &ApiClient) -> Self {
    Self {
      clock: api.cache().clock(),
      api: api.instance(),
      stale_after: Duration::minutes(STALE_AFTER_MINUTES),
      state: Arc::new(Mutex::new(ReportState::default())),
    }
  }

  pub fn data(&self) -> ReportData {
    self.lock().data.clone()
  }

  pub fn error(&self) -> Option<String> {
    self.lock().error.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.lock().loading
  }

  pub fn has_loaded(&self) -> bool {
    self.lock().has_loaded
  }

  pub fn month(&self) -> Option<String> {
    self.lock().month.clone()
  }

  /// True once the last successful load is older than the stale window.
  pub fn is_stale(&self) -> bool {
    match self.lock().loaded_at {
      Some(at) => self.clock.now() - at > self.stale_after,
      None => false,
    }
  }

  /// Load `month` unless it is already the loaded month.
  pub async fn ensure_month(&self, month: &str) -> Result<ReportData, ApiError> {
    let loaded = {
      let state = self.lock();
      state.has_loaded && state.month.as_deref() == Some(month)
    };

    if loaded {
      Ok(self.data())
    } else {
      self.fetch(month, false).await
    }
  }

  /// Reload the current month, bypassing the cache.
  pub async fn refetch(&self) -> Result<ReportData, ApiError> {
    match self.month() {
      Some(month) => self.fetch(&month, true).await,
      None => Ok(self.data()),
    }
  }

  pub async fn fetch(&self, month: &str, force_refresh: bool) -> Result<ReportData, ApiError> {
    {
      let mut state = self.lock();
      state.loading = true;
      state.error = None;
    }

    let all = Params::new();
    let monthly = Params::new().with("month", month);
    let options = GetOptions::forced(force_refresh);

    let result = futures::try_join!(
      self.api.get::<Vec<House>>("houses", &all, options),
      self.api.get::<Vec<Tenant>>("tenants", &all, options),
      self.api.get::<Vec<Payment>>("payments", &monthly, options),
      self.api.get::<Vec<Expense>>("expenses", &monthly, options),
    );

    let mut state = self.lock();
    state.loading = false;
    match result {
      Ok((houses, tenants, payments, expenses)) => {
        state.data = ReportData {
          houses,
          tenants,
          payments,
          expenses,
        };
        state.month = Some(month.to_string());
        state.has_loaded = true;
        state.loaded_at = Some(self.clock.now());
        info!(month, "Report data loaded");
        Ok(state.data.clone())
      }
      Err(err) => {
        error!(month, error = %err, "Error fetching report data");
        state.error = Some(err.to_string());
        Err(err)
      }
    }
  }

  fn lock(&self) -> MutexGuard<'_, ReportState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFilter {
  #[default]
  All,
  Paid,
  Unpaid,
}

/// One tenant's line in the monthly report.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantReport {
  pub tenant: Tenant,
  pub house: Option<House>,
  /// The recorded payment, or an unpaid placeholder at the tenant's rent
  pub payment: Payment,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTotals {
  pub expected: f64,
  pub paid: f64,
  pub unpaid: f64,
  pub expenses: f64,
  pub net_income: f64,
  pub paid_count: usize,
  pub unpaid_count: usize,
  pub total_tenants: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthlySummary {
  pub month: String,
  pub rows: Vec<TenantReport>,
  pub totals: ReportTotals,
}

/// Build the report for `month`.
///
/// `filter` only narrows the rows; totals always cover every tenant.
pub fn summarize(month: &str, data: &ReportData, filter: ReportFilter) -> MonthlySummary {
  let reports: Vec<TenantReport> = data
    .tenants
    .iter()
    .map(|tenant| {
      let tenant_id = tenant.id.as_server();
      let house = data
        .houses
        .iter()
        .find(|h| h.id.as_server() == Some(tenant.house_id))
        .cloned();
      let payment = data
        .payments
        .iter()
        .find(|p| Some(p.tenant_id) == tenant_id && p.month == month)
        .cloned()
        .unwrap_or_else(|| Payment::new(tenant_id.unwrap_or(0), month, tenant.rent.unwrap_or(0.0), false));

      TenantReport {
        tenant: tenant.clone(),
        house,
        payment,
      }
    })
    .collect();

  let expected: f64 = reports.iter().map(|r| r.payment.amount).sum();
  let paid: f64 = reports
    .iter()
    .filter(|r| r.payment.paid)
    .map(|r| r.payment.amount)
    .sum();
  let expenses: f64 = data.expenses.iter().map(|e| e.amount).sum();
  let paid_count = reports.iter().filter(|r| r.payment.paid).count();

  let totals = ReportTotals {
    expected,
    paid,
    unpaid: expected - paid,
    expenses,
    net_income: paid - expenses,
    paid_count,
    unpaid_count: reports.len() - paid_count,
    total_tenants: reports.len(),
  };

  let rows = reports
    .into_iter()
    .filter(|r| match filter {
      ReportFilter::All => true,
      ReportFilter::Paid => r.payment.paid,
      ReportFilter::Unpaid => !r.payment.paid,
    })
    .collect();

  MonthlySummary {
    month: month.to_string(),
    rows,
    totals,
  }
}

/// Format an amount in West African CFA francs, French style: `150 000 F CFA`.
pub fn format_currency(amount: f64) -> String {
  let rounded = amount.round() as i64;
  let digits = rounded.unsigned_abs().to_string();

  let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
  for (i, c) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      grouped.push(' ');
    }
    grouped.push(c);
  }

  let sign = if rounded < 0 { "-" } else { "" };
  format!("{}{} F CFA", sign, grouped)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheStore, ManualClock, MemoryStorage};
  use serde_json::{json, Value};
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn mount(server: &MockServer, endpoint: &str, body: Value) {
    Mock::given(method("GET"))
      .and(path(endpoint))
      .respond_with(ResponseTemplate::new(200).set_body_json(body))
      .mount(server)
      .await;
  }

  fn sample() -> ReportData {
    ReportData {
      houses: serde_json::from_value(json!([
        {"id": 1, "reference": "V1", "type": "Villa", "total_units": 2, "occupied_units": 2, "rent": 100000}
      ]))
      .unwrap(),
      tenants: serde_json::from_value(json!([
        {"id": 1, "full_name": "Awa", "phone": "77", "house_id": 1, "rent": 100000},
        {"id": 2, "full_name": "Modou", "phone": "78", "house_id": 1, "rent": 80000},
        {"id": 3, "full_name": "Ibou", "phone": "76", "house_id": 9}
      ]))
      .unwrap(),
      payments: serde_json::from_value(json!([
        {"id": 10, "tenant_id": 1, "month": "2024-03", "amount": 100000, "paid": true},
        {"id": 11, "tenant_id": 2, "month": "2024-03", "amount": 80000, "paid": false}
      ]))
      .unwrap(),
      expenses: serde_json::from_value(json!([
        {"id": 1, "house_id": 1, "description": "Peinture", "category": "Entretien",
         "amount": 30000, "date": "2024-03-04", "month": "2024-03"}
      ]))
      .unwrap(),
    }
  }

  #[test]
  fn test_summary_totals() {
    let summary = summarize("2024-03", &sample(), ReportFilter::All);
    let totals = &summary.totals;

    assert_eq!(summary.rows.len(), 3);
    assert_eq!(totals.expected, 180000.0);
    assert_eq!(totals.paid, 100000.0);
    assert_eq!(totals.unpaid, 80000.0);
    assert_eq!(totals.expenses, 30000.0);
    assert_eq!(totals.net_income, 70000.0);
    assert_eq!((totals.paid_count, totals.unpaid_count, totals.total_tenants), (1, 2, 3));
  }

  #[test]
  fn test_missing_payment_becomes_unpaid_placeholder() {
    let summary = summarize("2024-03", &sample(), ReportFilter::All);
    let ibou = &summary.rows[2];

    assert!(ibou.house.is_none());
    assert!(!ibou.payment.paid);
    assert_eq!(ibou.payment.amount, 0.0);
    assert_eq!(ibou.payment.tenant_id, 3);
  }

  #[test]
  fn test_filter_narrows_rows_only() {
    let paid = summarize("2024-03", &sample(), ReportFilter::Paid);
    assert_eq!(paid.rows.len(), 1);
    assert_eq!(paid.rows[0].tenant.full_name, "Awa");
    assert_eq!(paid.totals.total_tenants, 3);

    let unpaid = summarize("2024-03", &sample(), ReportFilter::Unpaid);
    assert_eq!(unpaid.rows.len(), 2);
    assert_eq!(unpaid.totals, paid.totals);
  }

  #[test]
  fn test_format_currency() {
    assert_eq!(format_currency(0.0), "0 F CFA");
    assert_eq!(format_currency(950.0), "950 F CFA");
    assert_eq!(format_currency(150000.0), "150 000 F CFA");
    assert_eq!(format_currency(1234567.4), "1 234 567 F CFA");
    assert_eq!(format_currency(-5000.0), "-5 000 F CFA");
  }

  #[tokio::test]
  async fn test_failed_part_keeps_previous_data() {
    let server = MockServer::start().await;
    mount(&server, "/houses", json!([])).await;
    mount(&server, "/tenants", json!([])).await;
    mount(&server, "/payments", json!([])).await;
    Mock::given(method("GET"))
      .and(path("/expenses"))
      .and(query_param("month", "2024-01"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": 1, "house_id": 1, "description": "Eau", "category": "Charges",
         "amount": 1000, "date": "2024-01-10", "month": "2024-01"}
      ])))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/expenses"))
      .and(query_param("month", "2024-02"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let api = ApiClient::new(&server.uri(), CacheStore::new(MemoryStorage::new())).unwrap();
    let reports = Reports::new(&api);

    let january = reports.ensure_month("2024-01").await.unwrap();
    assert_eq!(january.expenses.len(), 1);

    let err = reports.ensure_month("2024-02").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(reports.error().as_deref(), Some("HTTP error! status: 500"));
    assert_eq!(reports.data(), january);
    assert_eq!(reports.month().as_deref(), Some("2024-01"));
    assert!(!reports.is_loading());
  }

  #[tokio::test]
  async fn test_staleness_and_refetch() {
    let server = MockServer::start().await;
    for endpoint in ["/houses", "/tenants", "/payments", "/expenses"] {
      mount(&server, endpoint, json!([])).await;
    }

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = CacheStore::new(MemoryStorage::new()).with_clock(clock.clone());
    let api = ApiClient::new(&server.uri(), cache).unwrap();
    let reports = Reports::new(&api);

    assert!(!reports.is_stale());
    reports.ensure_month("2024-03").await.unwrap();
    assert!(!reports.is_stale());

    clock.advance(Duration::minutes(4));
    assert!(!reports.is_stale());
    clock.advance(Duration::minutes(2));
    assert!(reports.is_stale());

    // Same month again is served locally, still stale.
    reports.ensure_month("2024-03").await.unwrap();
    assert!(reports.is_stale());
    assert_eq!(server.received_requests().await.unwrap().len(), 4);

    reports.refetch().await.unwrap();
    assert!(!reports.is_stale());
    assert_eq!(server.received_requests().await.unwrap().len(), 8);
  }

  #[tokio::test]
  async fn test_expenses_with_string_house_ids_load() {
    let server = MockServer::start().await;
    mount(&server, "/houses", json!([])).await;
    mount(&server, "/tenants", json!([])).await;
    mount(&server, "/payments", json!([])).await;
    mount(
      &server,
      "/expenses",
      json!([
        {"id": 1, "house_id": "1", "description": "Peinture", "category": "Entretien",
         "amount": 5000, "date": "2024-03-09", "month": "2024-03"}
      ]),
    )
    .await;

    let api = ApiClient::new(&server.uri(), CacheStore::new(MemoryStorage::new())).unwrap();
    let data = Reports::new(&api).fetch("2024-03", false).await.unwrap();
    assert_eq!(data.expenses[0].house_id, 1);
  }
}
