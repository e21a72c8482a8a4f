//! Form-level checks run before anything reaches the network.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Expense, House, Payment, Tenant};

/// Field name to message, for every field that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<&'static str, String>);

impl ValidationErrors {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, field: &'static str, message: &str) {
    self.0.insert(field, message.to_string());
  }

  pub fn get(&self, field: &str) -> Option<&str> {
    self.0.get(field).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
    self.0.iter().map(|(field, message)| (*field, message.as_str()))
  }

  /// `Ok(())` when nothing was recorded.
  pub fn into_result(self) -> Result<(), ValidationErrors> {
    if self.is_empty() {
      Ok(())
    } else {
      Err(self)
    }
  }
}

impl fmt::Display for ValidationErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let messages: Vec<&str> = self.0.values().map(String::as_str).collect();
    f.write_str(&messages.join("; "))
  }
}

impl std::error::Error for ValidationErrors {}

pub const HOUSE_FULL: &str = "Cette maison est complètement occupée";

/// Foreign key of a form whose select was left empty
pub const NOT_SELECTED: u64 = 0;

pub fn validate_house(house: &House) -> Result<(), ValidationErrors> {
  let mut errors = ValidationErrors::new();

  if house.reference.trim().is_empty() {
    errors.add("reference", "La référence est obligatoire");
  }
  if house.house_type.trim().is_empty() {
    errors.add("type", "Le type est obligatoire");
  }
  if house.total_units < 1 {
    errors.add("total_units", "Le nombre d'unités doit être au moins 1");
  }
  if house.occupied_units > house.total_units {
    errors.add(
      "occupied_units",
      "Le nombre d'unités occupées ne peut pas dépasser le nombre total",
    );
  }
  if house.rent <= 0.0 {
    errors.add("rent", "Le loyer doit être supérieur à 0");
  }

  errors.into_result()
}

/// Check a tenant form.
///
/// `previous` is the tenant being edited, if any: keeping the same house is
/// allowed even when that house is full.
pub fn validate_tenant(
  tenant: &Tenant,
  previous: Option<&Tenant>,
  houses: &[House],
) -> Result<(), ValidationErrors> {
  let mut errors = ValidationErrors::new();

  if tenant.full_name.trim().is_empty() {
    errors.add("full_name", "Le nom complet est obligatoire");
  }

  if tenant.phone.trim().is_empty() {
    errors.add("phone", "Le numéro de téléphone est obligatoire");
  } else if !is_phone_number(&tenant.phone) {
    errors.add("phone", "Format de téléphone invalide");
  }

  if tenant.house_id == NOT_SELECTED {
    errors.add("house_id", "Veuillez sélectionner une maison");
  } else {
    let house = houses
      .iter()
      .find(|h| h.id.as_server() == Some(tenant.house_id));
    let keeps_house = previous.is_some_and(|p| p.house_id == tenant.house_id);

    match house {
      None => errors.add("house_id", "Maison inconnue"),
      Some(house) if !keeps_house && house.is_full() => errors.add("house_id", HOUSE_FULL),
      Some(_) => {}
    }
  }

  errors.into_result()
}

pub fn validate_payment(payment: &Payment) -> Result<(), ValidationErrors> {
  let mut errors = ValidationErrors::new();

  if payment.tenant_id == NOT_SELECTED {
    errors.add("tenant_id", "Veuillez sélectionner un locataire");
  }
  if payment.month.trim().is_empty() {
    errors.add("month", "Le mois est obligatoire");
  } else if !is_month(&payment.month) {
    errors.add("month", "Format de mois invalide (AAAA-MM)");
  }
  if payment.amount <= 0.0 {
    errors.add("amount", "Le montant doit être supérieur à 0");
  }

  errors.into_result()
}

pub fn validate_expense(expense: &Expense) -> Result<(), ValidationErrors> {
  let mut errors = ValidationErrors::new();

  if expense.house_id == NOT_SELECTED {
    errors.add("house_id", "Veuillez sélectionner une maison");
  }
  if expense.description.trim().is_empty() {
    errors.add("description", "La description est obligatoire");
  }
  if expense.amount <= 0.0 {
    errors.add("amount", "Le montant doit être supérieur à 0");
  }
  if expense.category.trim().is_empty() {
    errors.add("category", "La catégorie est obligatoire");
  }
  if expense.date.trim().is_empty() {
    errors.add("date", "La date est obligatoire");
  } else if NaiveDate::parse_from_str(&expense.date, "%Y-%m-%d").is_err() {
    errors.add("date", "Format de date invalide (AAAA-MM-JJ)");
  }

  errors.into_result()
}

/// Digits, `+`, `-`, parentheses and whitespace only.
fn is_phone_number(phone: &str) -> bool {
  phone
    .chars()
    .all(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '+' | '-' | '(' | ')'))
}

/// YYYY-MM with a real month.
pub fn is_month(month: &str) -> bool {
  NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").is_ok() && month.len() == 7
}
