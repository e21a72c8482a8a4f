//! Table output for CLI commands.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::model::{Expense, House, Payment, Tenant};
use crate::report::{format_currency, MonthlySummary};

/// Table renderer for CLI output
pub struct TableFormatter {
  use_colors: bool,
}

impl TableFormatter {
  pub fn new() -> Self {
    Self {
      use_colors: supports_color(),
    }
  }

  pub fn plain() -> Self {
    Self { use_colors: false }
  }

  pub fn houses(&self, houses: &[House]) -> String {
    let mut table = base_table(&["ID", "Référence", "Type", "Adresse", "Occupation", "Loyer"]);

    for house in houses {
      let occupancy = format!("{}/{}", house.occupied_units, house.total_units);
      let occupancy_cell = if self.use_colors && house.is_full() {
        Cell::new(occupancy).fg(Color::Red)
      } else {
        Cell::new(occupancy)
      };

      table.add_row(vec![
        Cell::new(&house.id),
        Cell::new(&house.reference),
        Cell::new(&house.house_type),
        Cell::new(&house.address),
        occupancy_cell,
        Cell::new(format_currency(house.rent)),
      ]);
    }

    table.to_string()
  }

  pub fn tenants(&self, tenants: &[Tenant], houses: &[House]) -> String {
    let mut table = base_table(&["ID", "Nom", "Téléphone", "Maison", "Loyer"]);

    for tenant in tenants {
      table.add_row(vec![
        Cell::new(&tenant.id),
        Cell::new(&tenant.full_name),
        Cell::new(&tenant.phone),
        Cell::new(house_reference(houses, tenant.house_id)),
        Cell::new(tenant.rent.map(format_currency).unwrap_or_else(|| "-".to_string())),
      ]);
    }

    table.to_string()
  }

  pub fn payments(&self, payments: &[Payment], tenants: &[Tenant]) -> String {
    let mut table = base_table(&["ID", "Locataire", "Mois", "Montant", "Statut"]);

    for payment in payments {
      let tenant = tenants
        .iter()
        .find(|t| t.id.as_server() == Some(payment.tenant_id))
        .map(|t| t.full_name.as_str())
        .unwrap_or("-");

      table.add_row(vec![
        Cell::new(&payment.id),
        Cell::new(tenant),
        Cell::new(&payment.month),
        Cell::new(format_currency(payment.amount)),
        self.paid_cell(payment.paid),
      ]);
    }

    table.to_string()
  }

  pub fn expenses(&self, expenses: &[Expense], houses: &[House]) -> String {
    let mut table = base_table(&["ID", "Date", "Maison", "Catégorie", "Description", "Montant"]);

    for expense in expenses {
      table.add_row(vec![
        Cell::new(&expense.id),
        Cell::new(&expense.date),
        Cell::new(house_reference(houses, expense.house_id)),
        Cell::new(&expense.category),
        Cell::new(&expense.description),
        Cell::new(format_currency(expense.amount)),
      ]);
    }

    table.to_string()
  }

  /// Tenant rows followed by the month totals.
  pub fn report(&self, summary: &MonthlySummary) -> String {
    let mut rows = base_table(&["Locataire", "Maison", "Montant", "Statut"]);
    for row in &summary.rows {
      rows.add_row(vec![
        Cell::new(&row.tenant.full_name),
        Cell::new(row.house.as_ref().map(|h| h.reference.as_str()).unwrap_or("-")),
        Cell::new(format_currency(row.payment.amount)),
        self.paid_cell(row.payment.paid),
      ]);
    }

    let t = &summary.totals;
    let mut totals = Table::new();
    totals
      .load_preset(presets::UTF8_FULL)
      .set_content_arrangement(ContentArrangement::Dynamic);
    totals.add_row(vec![Cell::new("Total attendu"), Cell::new(format_currency(t.expected))]);
    totals.add_row(vec![Cell::new("Total payé"), Cell::new(format_currency(t.paid))]);
    totals.add_row(vec![Cell::new("Total impayé"), Cell::new(format_currency(t.unpaid))]);
    totals.add_row(vec![Cell::new("Dépenses"), Cell::new(format_currency(t.expenses))]);
    totals.add_row(vec![Cell::new("Revenu net"), Cell::new(format_currency(t.net_income))]);
    totals.add_row(vec![
      Cell::new("Locataires ayant payé"),
      Cell::new(format!("{}/{}", t.paid_count, t.total_tenants)),
    ]);

    format!("Rapport {}\n{}\n{}", summary.month, rows, totals)
  }

  fn paid_cell(&self, paid: bool) -> Cell {
    let label = if paid { "Payé" } else { "Non payé" };
    if self.use_colors {
      Cell::new(label).fg(if paid { Color::Green } else { Color::Red })
    } else {
      Cell::new(label)
    }
  }
}

impl Default for TableFormatter {
  fn default() -> Self {
    Self::new()
  }
}

fn base_table(headers: &[&str]) -> Table {
  let mut table = Table::new();
  table
    .load_preset(presets::UTF8_FULL)
    .set_content_arrangement(ContentArrangement::Dynamic);
  table.set_header(
    headers
      .iter()
      .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
      .collect::<Vec<_>>(),
  );
  table
}

fn house_reference(houses: &[House], house_id: u64) -> String {
  houses
    .iter()
    .find(|h| h.id.as_server() == Some(house_id))
    .map(|h| h.reference.clone())
    .unwrap_or_else(|| format!("#{}", house_id))
}

/// Respect NO_COLOR and dumb terminals
fn supports_color() -> bool {
  if env::var("NO_COLOR").is_ok() {
    return false;
  }
  !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}
