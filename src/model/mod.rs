//! Entities of the rental backend and their REST bindings.

mod record;
mod types;

pub use record::{create_body, item_endpoint, merge_patch, Record, RecordId};
pub use types::{month_of, Expense, House, Payment, Role, Tenant, User};

impl Record for House {
  fn collection() -> &'static str {
    "houses"
  }

  fn kind() -> &'static str {
    "house"
  }

  fn id(&self) -> &RecordId {
    &self.id
  }

  fn set_id(&mut self, id: RecordId) {
    self.id = id;
  }
}

impl Record for Tenant {
  fn collection() -> &'static str {
    "tenants"
  }

  fn kind() -> &'static str {
    "tenant"
  }

  fn id(&self) -> &RecordId {
    &self.id
  }

  fn set_id(&mut self, id: RecordId) {
    self.id = id;
  }
}

impl Record for Payment {
  fn collection() -> &'static str {
    "payments"
  }

  fn kind() -> &'static str {
    "payment"
  }

  fn id(&self) -> &RecordId {
    &self.id
  }

  fn set_id(&mut self, id: RecordId) {
    self.id = id;
  }
}

impl Record for Expense {
  fn collection() -> &'static str {
    "expenses"
  }

  fn kind() -> &'static str {
    "expense"
  }

  fn id(&self) -> &RecordId {
    &self.id
  }

  fn set_id(&mut self, id: RecordId) {
    self.id = id;
  }
}

impl Record for User {
  fn collection() -> &'static str {
    "users"
  }

  fn kind() -> &'static str {
    "user"
  }

  fn id(&self) -> &RecordId {
    &self.id
  }

  fn set_id(&mut self, id: RecordId) {
    self.id = id;
  }
}
