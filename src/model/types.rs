use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::record::RecordId;

/// Role of a back-office user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  SuperAdmin,
  Admin,
}

/// Back-office user, seeded on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: RecordId,
  pub email: String,
  pub password: String,
  pub role: Role,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A rental property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct House {
  pub id: RecordId,
  pub reference: String,
  #[serde(default)]
  pub address: String,
  #[serde(rename = "type")]
  pub house_type: String,
  pub total_units: u32,
  #[serde(default)]
  pub occupied_units: u32,
  pub rent: f64,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl House {
  pub fn new(reference: &str, address: &str, house_type: &str, total_units: u32, rent: f64) -> Self {
    Self {
      id: RecordId::unassigned(),
      reference: reference.to_string(),
      address: address.to_string(),
      house_type: house_type.to_string(),
      total_units,
      occupied_units: 0,
      rent,
      extra: Map::new(),
    }
  }

  pub fn is_full(&self) -> bool {
    self.occupied_units >= self.total_units
  }

  pub fn available_units(&self) -> u32 {
    self.total_units.saturating_sub(self.occupied_units)
  }
}

/// A tenant assigned to one house
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
  pub id: RecordId,
  pub full_name: String,
  pub phone: String,
  #[serde(deserialize_with = "foreign_key")]
  pub house_id: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rent: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Tenant {
  pub fn new(full_name: &str, phone: &str, house_id: u64) -> Self {
    Self {
      id: RecordId::unassigned(),
      full_name: full_name.to_string(),
      phone: phone.to_string(),
      house_id,
      rent: None,
      extra: Map::new(),
    }
  }
}

/// Rent payment of one tenant for one month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  pub id: RecordId,
  #[serde(deserialize_with = "foreign_key")]
  pub tenant_id: u64,
  /// YYYY-MM
  pub month: String,
  pub amount: f64,
  #[serde(default)]
  pub paid: bool,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Payment {
  pub fn new(tenant_id: u64, month: &str, amount: f64, paid: bool) -> Self {
    Self {
      id: RecordId::unassigned(),
      tenant_id,
      month: month.to_string(),
      amount,
      paid,
      extra: Map::new(),
    }
  }
}

/// An expense booked against a house
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
  pub id: RecordId,
  #[serde(deserialize_with = "foreign_key")]
  pub house_id: u64,
  pub description: String,
  pub category: String,
  pub amount: f64,
  /// YYYY-MM-DD
  pub date: String,
  /// YYYY-MM, derived from `date`
  #[serde(default)]
  pub month: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Expense {
  pub fn new(house_id: u64, description: &str, category: &str, amount: f64, date: &str) -> Self {
    Self {
      id: RecordId::unassigned(),
      house_id,
      description: description.to_string(),
      category: category.to_string(),
      amount,
      date: date.to_string(),
      month: month_of(date),
      extra: Map::new(),
    }
  }

  /// Recompute `month` from `date`.
  pub fn sync_month(&mut self) {
    self.month = month_of(&self.date);
  }
}

/// Reference to another record. Older clients stored these as strings
/// (`"house_id": "1"`), so a numeric string is accepted too.
fn foreign_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Number(u64),
    Text(String),
  }

  match Raw::deserialize(deserializer)? {
    Raw::Number(id) => Ok(id),
    Raw::Text(text) => text
      .trim()
      .parse()
      .map_err(|_| D::Error::custom(format!("invalid record reference {:?}", text))),
  }
}

/// The YYYY-MM prefix of a YYYY-MM-DD date.
pub fn month_of(date: &str) -> String {
  date.chars().take(7).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_house_wire_format() {
    let house: House = serde_json::from_value(json!({
      "id": 1,
      "reference": "APT-3",
      "address": "Plateau",
      "type": "Appartement",
      "total_units": 4,
      "occupied_units": 4,
      "rent": 90000
    }))
    .unwrap();

    assert_eq!(house.house_type, "Appartement");
    assert!(house.is_full());
    assert_eq!(house.available_units(), 0);
    assert_eq!(serde_json::to_value(&house).unwrap()["type"], json!("Appartement"));
  }

  #[test]
  fn test_tenant_rent_is_optional() {
    let tenant: Tenant = serde_json::from_value(json!({
      "id": 2, "full_name": "Awa Ndiaye", "phone": "+221 77 000 00 00", "house_id": 1
    }))
    .unwrap();

    assert_eq!(tenant.rent, None);
    assert!(serde_json::to_value(&tenant).unwrap().get("rent").is_none());
  }

  #[test]
  fn test_expense_month_derived_from_date() {
    let mut expense = Expense::new(1, "Plomberie", "Réparation", 25000.0, "2024-03-18");
    assert_eq!(expense.month, "2024-03");

    expense.date = "2024-04-02".to_string();
    expense.sync_month();
    assert_eq!(expense.month, "2024-04");
  }

  #[test]
  fn test_string_references_are_accepted() {
    let expenses: Vec<Expense> = serde_json::from_value(json!([
      {"id": 1, "house_id": "1", "description": "Peinture", "category": "Entretien",
       "amount": 5000, "date": "2024-05-09", "month": "2024-05"},
      {"id": 2, "house_id": 2, "description": "Serrure", "category": "Réparation",
       "amount": 8000, "date": "2024-05-11", "month": "2024-05"}
    ]))
    .unwrap();
    assert_eq!(expenses[0].house_id, 1);
    assert_eq!(expenses[1].house_id, 2);
    assert_eq!(serde_json::to_value(&expenses[0]).unwrap()["house_id"], json!(1));

    let payment: Payment = serde_json::from_value(json!({
      "id": 4, "tenant_id": " 7 ", "month": "2024-05", "amount": 50000
    }))
    .unwrap();
    assert_eq!(payment.tenant_id, 7);

    let tenant: Tenant = serde_json::from_value(json!({
      "id": 2, "full_name": "Awa", "phone": "770000000", "house_id": "3"
    }))
    .unwrap();
    assert_eq!(tenant.house_id, 3);
  }

  #[test]
  fn test_non_numeric_reference_is_rejected() {
    let err = serde_json::from_value::<Expense>(json!({
      "id": 1, "house_id": "villa", "description": "d", "category": "c",
      "amount": 1, "date": "2024-05-09"
    }))
    .unwrap_err();
    assert!(err.to_string().contains("invalid record reference"));
  }

  #[test]
  fn test_user_role_names() {
    let user: User = serde_json::from_value(json!({
      "id": 1, "email": "a@b.c", "password": "x", "role": "super_admin"
    }))
    .unwrap();
    assert_eq!(user.role, Role::SuperAdmin);
  }
}
