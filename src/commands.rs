//! Command-line surface.

use clap::{Args, Subcommand, ValueEnum};

use crate::report::ReportFilter;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Log in with a back-office account
  Login {
    #[arg(short, long)]
    email: String,
    #[arg(short, long)]
    password: String,
  },
  /// Forget the logged-in user
  Logout,
  /// Show the logged-in user and their permissions
  Whoami,
  /// Manage houses
  #[command(subcommand)]
  Houses(HouseCommand),
  /// Manage tenants
  #[command(subcommand)]
  Tenants(TenantCommand),
  /// Manage rent payments
  #[command(subcommand)]
  Payments(PaymentCommand),
  /// Manage expenses
  #[command(subcommand)]
  Expenses(ExpenseCommand),
  /// Monthly report
  Report {
    /// YYYY-MM (default: configured or current month)
    #[arg(short, long)]
    month: Option<String>,
    #[arg(short, long, value_enum, default_value_t = FilterArg::All)]
    filter: FilterArg,
  },
  /// Local response cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum HouseCommand {
  List,
  Add(HouseFields),
  Update {
    id: u64,
    #[command(flatten)]
    fields: HousePatch,
  },
  Delete {
    id: u64,
  },
}

#[derive(Args, Debug)]
pub struct HouseFields {
  #[arg(long)]
  pub reference: String,
  #[arg(long, default_value = "")]
  pub address: String,
  #[arg(long = "type")]
  pub house_type: String,
  #[arg(long)]
  pub units: u32,
  #[arg(long)]
  pub rent: f64,
}

#[derive(Args, Debug)]
pub struct HousePatch {
  #[arg(long)]
  pub reference: Option<String>,
  #[arg(long)]
  pub address: Option<String>,
  #[arg(long = "type")]
  pub house_type: Option<String>,
  #[arg(long)]
  pub units: Option<u32>,
  #[arg(long)]
  pub rent: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum TenantCommand {
  List,
  Add {
    #[arg(long)]
    name: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    house: u64,
    /// Defaults to the house rent
    #[arg(long)]
    rent: Option<f64>,
  },
  /// Move a tenant to another house
  Move {
    id: u64,
    #[arg(long)]
    house: u64,
  },
  Delete {
    id: u64,
  },
}

#[derive(Subcommand, Debug)]
pub enum PaymentCommand {
  List {
    #[arg(short, long)]
    month: Option<String>,
  },
  /// Record a payment, updating the tenant's payment for that month if any
  Record {
    #[arg(long)]
    tenant: u64,
    #[arg(short, long)]
    month: Option<String>,
    #[arg(long)]
    amount: f64,
    /// Record the amount as due but not paid
    #[arg(long)]
    unpaid: bool,
  },
  Delete {
    id: u64,
  },
}

#[derive(Subcommand, Debug)]
pub enum ExpenseCommand {
  List {
    #[arg(short, long)]
    month: Option<String>,
  },
  Add {
    #[arg(long)]
    house: u64,
    #[arg(long)]
    description: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    amount: f64,
    /// YYYY-MM-DD
    #[arg(long)]
    date: String,
  },
  Delete {
    id: u64,
  },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Drop cached responses, all of them or those matching a pattern
  Clear {
    #[arg(short, long)]
    pattern: Option<String>,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterArg {
  All,
  Paid,
  Unpaid,
}

impl From<FilterArg> for ReportFilter {
  fn from(arg: FilterArg) -> Self {
    match arg {
      FilterArg::All => ReportFilter::All,
      FilterArg::Paid => ReportFilter::Paid,
      FilterArg::Unpaid => ReportFilter::Unpaid,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  #[test]
  fn test_parse_house_update() {
    let cli = Cli::try_parse_from(["rentdesk", "houses", "update", "3", "--rent", "120000", "--type", "Studio"]).unwrap();
    match cli.command {
      Command::Houses(HouseCommand::Update { id, fields }) => {
        assert_eq!(id, 3);
        assert_eq!(fields.rent, Some(120000.0));
        assert_eq!(fields.house_type.as_deref(), Some("Studio"));
        assert!(fields.reference.is_none());
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn test_parse_report_filter() {
    let cli = Cli::try_parse_from(["rentdesk", "report", "--month", "2024-03", "--filter", "unpaid"]).unwrap();
    match cli.command {
      Command::Report { month, filter } => {
        assert_eq!(month.as_deref(), Some("2024-03"));
        assert_eq!(ReportFilter::from(filter), ReportFilter::Unpaid);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn test_payment_record_requires_amount() {
    assert!(Cli::try_parse_from(["rentdesk", "payments", "record", "--tenant", "7"]).is_err());
  }
}
