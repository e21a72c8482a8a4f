use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::api::ApiClient;
use crate::cache::{CacheStorage, CacheStore, NoopStorage, SqliteStorage};
use crate::commands::{CacheCommand, Command, ExpenseCommand, HouseCommand, PaymentCommand, TenantCommand};
use crate::config::Config;
use crate::model::{Expense, House, Payment, RecordId, Role, Tenant};
use crate::portfolio::Portfolio;
use crate::render::TableFormatter;
use crate::report::{summarize, Reports};
use crate::session::{Permissions, Session};
use crate::validation::is_month;

/// Command runner: one API client and session for the whole process.
pub struct App {
  config: Config,
  api: ApiClient,
  session: Session,
  output: TableFormatter,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let storage: Arc<dyn CacheStorage> = match &config.cache.path {
      Some(path) => Arc::new(SqliteStorage::open_at(path)?),
      None => Arc::new(SqliteStorage::open()?),
    };

    // The session outlives a disabled cache
    let cache = if config.cache.enabled {
      CacheStore::from_shared(Arc::clone(&storage))
    } else {
      CacheStore::new(NoopStorage)
    };

    let api = ApiClient::new(&config.api.base_url, cache)
      .map_err(|e| eyre!("Invalid server url {}: {}", config.api.base_url, e))?;
    let session = Session::new(&api, storage);

    Ok(Self {
      config,
      api,
      session,
      output: TableFormatter::new(),
    })
  }

  /// Render tables without colors.
  pub fn with_plain_output(mut self) -> Self {
    self.output = TableFormatter::plain();
    self
  }

  /// Run `command` and return what should be printed.
  pub async fn execute(&self, command: Command) -> Result<String> {
    match command {
      Command::Login { email, password } => {
        let user = self.session.login(&email, &password).await?;
        Ok(format!("Connecté en tant que {} ({})", user.email, role_label(user.role)))
      }
      Command::Logout => {
        self.session.logout();
        Ok("Déconnecté".to_string())
      }
      Command::Whoami => self.whoami(),
      Command::Houses(cmd) => self.houses(cmd).await,
      Command::Tenants(cmd) => self.tenants(cmd).await,
      Command::Payments(cmd) => self.payments(cmd).await,
      Command::Expenses(cmd) => self.expenses(cmd).await,
      Command::Report { month, filter } => {
        self.require(|p| p.view_reports, "voir les rapports")?;
        let month = self.month(month)?;

        let reports = Reports::new(&self.api);
        let data = reports.ensure_month(&month).await?;
        Ok(self.output.report(&summarize(&month, &data, filter.into())))
      }
      Command::Cache(CacheCommand::Clear { pattern }) => match pattern {
        Some(pattern) => {
          self.api.clear_cache_by_pattern(&pattern);
          Ok(format!("Cache vidé pour \"{}\"", pattern))
        }
        None => {
          self.api.clear_all_cache();
          Ok("Cache vidé".to_string())
        }
      },
    }
  }

  fn whoami(&self) -> Result<String> {
    let user = self
      .session
      .current_user()
      .ok_or_else(|| eyre!("Non connecté. Utilisez `rentdesk login`."))?;
    let p = Permissions::for_user(Some(&user));

    let mut lines = vec![format!("{} ({})", user.email, role_label(user.role))];
    for (allowed, label) in [
      (p.manage_houses, "gérer les maisons"),
      (p.manage_tenants, "gérer les locataires"),
      (p.manage_payments, "gérer les paiements"),
      (p.manage_expenses, "gérer les dépenses"),
      (p.view_reports, "voir les rapports"),
      (p.manage_users, "gérer les utilisateurs"),
    ] {
      if allowed {
        lines.push(format!("  - {}", label));
      }
    }
    Ok(lines.join("\n"))
  }

  async fn houses(&self, cmd: HouseCommand) -> Result<String> {
    let portfolio = Portfolio::new(&self.api, None);

    match cmd {
      HouseCommand::List => {
        self.require(|p| p.view_houses, "voir les maisons")?;
        let houses = portfolio.houses().ensure_loaded().await?;
        Ok(self.output.houses(&houses))
      }
      HouseCommand::Add(fields) => {
        self.require(|p| p.manage_houses, "gérer les maisons")?;
        let house = House::new(
          &fields.reference,
          &fields.address,
          &fields.house_type,
          fields.units,
          fields.rent,
        );
        let created = portfolio.add_house(house).await?;
        Ok(format!("Maison {} créée (id {})", created.reference, created.id))
      }
      HouseCommand::Update { id, fields } => {
        self.require(|p| p.manage_houses, "gérer les maisons")?;
        let mut patch = Map::new();
        if let Some(reference) = fields.reference {
          patch.insert("reference".into(), reference.into());
        }
        if let Some(address) = fields.address {
          patch.insert("address".into(), address.into());
        }
        if let Some(house_type) = fields.house_type {
          patch.insert("type".into(), house_type.into());
        }
        if let Some(units) = fields.units {
          patch.insert("total_units".into(), units.into());
        }
        if let Some(rent) = fields.rent {
          patch.insert("rent".into(), rent.into());
        }
        if patch.is_empty() {
          return Err(eyre!("Rien à modifier"));
        }

        portfolio.houses().ensure_loaded().await?;
        let updated = portfolio.update_house(&RecordId::Server(id), Value::Object(patch)).await?;
        Ok(format!("Maison {} mise à jour", updated.reference))
      }
      HouseCommand::Delete { id } => {
        self.require(|p| p.manage_houses, "gérer les maisons")?;
        portfolio.houses().ensure_loaded().await?;
        deleted(portfolio.delete_house(&RecordId::Server(id)).await?, "Maison", id)
      }
    }
  }

  async fn tenants(&self, cmd: TenantCommand) -> Result<String> {
    self.require(|p| p.manage_tenants, "gérer les locataires")?;
    let portfolio = Portfolio::new(&self.api, None);
    futures::try_join!(portfolio.houses().ensure_loaded(), portfolio.tenants().ensure_loaded())?;

    match cmd {
      TenantCommand::List => Ok(
        self
          .output
          .tenants(&portfolio.tenants().items(), &portfolio.houses().items()),
      ),
      TenantCommand::Add {
        name,
        phone,
        house,
        rent,
      } => {
        let mut tenant = Tenant::new(&name, &phone, house);
        tenant.rent = rent;
        let created = portfolio.add_tenant(tenant).await?;
        Ok(format!("Locataire {} ajouté (id {})", created.full_name, created.id))
      }
      TenantCommand::Move { id, house } => {
        let moved = portfolio
          .update_tenant(&RecordId::Server(id), serde_json::json!({ "house_id": house }))
          .await?;
        Ok(format!("{} déplacé vers la maison {}", moved.full_name, moved.house_id))
      }
      TenantCommand::Delete { id } => {
        deleted(portfolio.delete_tenant(&RecordId::Server(id)).await?, "Locataire", id)
      }
    }
  }

  async fn payments(&self, cmd: PaymentCommand) -> Result<String> {
    self.require(|p| p.manage_payments, "gérer les paiements")?;

    match cmd {
      PaymentCommand::List { month } => {
        let portfolio = Portfolio::new(&self.api, Some(self.month(month)?));
        let (tenants, payments) =
          futures::try_join!(portfolio.tenants().ensure_loaded(), portfolio.payments().ensure_loaded())?;
        Ok(self.output.payments(&payments, &tenants))
      }
      PaymentCommand::Record {
        tenant,
        month,
        amount,
        unpaid,
      } => {
        let month = self.month(month)?;
        let portfolio = Portfolio::new(&self.api, Some(month.clone()));
        portfolio.payments().ensure_loaded().await?;

        let saved = portfolio
          .record_payment(Payment::new(tenant, &month, amount, !unpaid))
          .await?;
        Ok(format!("Paiement {} enregistré pour {}", saved.id, saved.month))
      }
      PaymentCommand::Delete { id } => {
        let portfolio = Portfolio::new(&self.api, None);
        portfolio.payments().ensure_loaded().await?;
        deleted(portfolio.delete_payment(&RecordId::Server(id)).await?, "Paiement", id)
      }
    }
  }

  async fn expenses(&self, cmd: ExpenseCommand) -> Result<String> {
    self.require(|p| p.manage_expenses, "gérer les dépenses")?;

    match cmd {
      ExpenseCommand::List { month } => {
        let portfolio = Portfolio::new(&self.api, Some(self.month(month)?));
        let (houses, expenses) =
          futures::try_join!(portfolio.houses().ensure_loaded(), portfolio.expenses().ensure_loaded())?;
        Ok(self.output.expenses(&expenses, &houses))
      }
      ExpenseCommand::Add {
        house,
        description,
        category,
        amount,
        date,
      } => {
        let portfolio = Portfolio::new(&self.api, None);
        let saved = portfolio
          .add_expense(Expense::new(house, &description, &category, amount, &date))
          .await?;
        Ok(format!("Dépense {} enregistrée pour {}", saved.id, saved.month))
      }
      ExpenseCommand::Delete { id } => {
        let portfolio = Portfolio::new(&self.api, None);
        portfolio.expenses().ensure_loaded().await?;
        deleted(portfolio.delete_expense(&RecordId::Server(id)).await?, "Dépense", id)
      }
    }
  }

  fn require(&self, allowed: impl Fn(&Permissions) -> bool, action: &str) -> Result<()> {
    let user = self
      .session
      .current_user()
      .ok_or_else(|| eyre!("Non connecté. Utilisez `rentdesk login`."))?;

    if allowed(&Permissions::for_user(Some(&user))) {
      Ok(())
    } else {
      Err(eyre!("Accès refusé: vous ne pouvez pas {}", action))
    }
  }

  /// Explicit month, then configured default, then the current month.
  fn month(&self, explicit: Option<String>) -> Result<String> {
    let month = explicit
      .or_else(|| self.config.default_month.clone())
      .unwrap_or_else(|| Local::now().format("%Y-%m").to_string());

    if is_month(&month) {
      Ok(month)
    } else {
      Err(eyre!("Mois invalide {}: format attendu AAAA-MM", month))
    }
  }
}

fn role_label(role: Role) -> &'static str {
  match role {
    Role::SuperAdmin => "super administrateur",
    Role::Admin => "administrateur",
  }
}

fn deleted(found: bool, what: &str, id: u64) -> Result<String> {
  if found {
    Ok(format!("{} {} supprimé(e)", what, id))
  } else {
    Err(eyre!("{} {} introuvable", what, id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::commands::FilterArg;
  use serde_json::json;
  use tempfile::TempDir;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn app_for(server: &MockServer, dir: &TempDir) -> App {
    Mock::given(method("GET"))
      .and(path("/users"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": 1, "email": "root@rent.sn", "password": "secret", "role": "super_admin"},
        {"id": 2, "email": "desk@rent.sn", "password": "desk", "role": "admin"}
      ])))
      .mount(server)
      .await;

    let mut config = Config::default().with_url_override(Some(server.uri()));
    config.cache.path = Some(dir.path().join("cache.db"));
    config.default_month = Some("2024-03".to_string());
    App::new(config).unwrap().with_plain_output()
  }

  fn login(email: &str, password: &str) -> Command {
    Command::Login {
      email: email.to_string(),
      password: password.to_string(),
    }
  }

  #[tokio::test]
  async fn test_commands_require_login() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app_for(&server, &dir).await;

    let err = app.execute(Command::Houses(HouseCommand::List)).await.unwrap_err();
    assert!(err.to_string().contains("Non connecté"));
  }

  #[tokio::test]
  async fn test_admin_cannot_list_houses() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app_for(&server, &dir).await;

    app.execute(login("desk@rent.sn", "desk")).await.unwrap();
    let err = app.execute(Command::Houses(HouseCommand::List)).await.unwrap_err();
    assert!(err.to_string().contains("Accès refusé"));
  }

  #[tokio::test]
  async fn test_session_survives_restart() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    app_for(&server, &dir)
      .await
      .execute(login("root@rent.sn", "secret"))
      .await
      .unwrap();

    let out = app_for(&server, &dir).await.execute(Command::Whoami).await.unwrap();
    assert!(out.starts_with("root@rent.sn (super administrateur)"));
    assert!(out.contains("gérer les maisons"));
  }

  #[tokio::test]
  async fn test_report_for_default_month() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app_for(&server, &dir).await;

    for (endpoint, body) in [
      ("/houses", json!([{"id": 1, "reference": "V1", "type": "Villa", "total_units": 1, "occupied_units": 1, "rent": 50000}])),
      ("/tenants", json!([{"id": 1, "full_name": "Awa", "phone": "77", "house_id": 1, "rent": 50000}])),
      ("/payments", json!([{"id": 1, "tenant_id": 1, "month": "2024-03", "amount": 50000, "paid": true}])),
      ("/expenses", json!([])),
    ] {
      Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    }

    app.execute(login("desk@rent.sn", "desk")).await.unwrap();
    let out = app
      .execute(Command::Report {
        month: None,
        filter: FilterArg::All,
      })
      .await
      .unwrap();

    assert!(out.starts_with("Rapport 2024-03"));
    assert!(out.contains("Awa"));
    assert!(out.contains("1/1"));
  }

  #[tokio::test]
  async fn test_invalid_month_is_rejected() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app_for(&server, &dir).await;

    app.execute(login("desk@rent.sn", "desk")).await.unwrap();
    let err = app
      .execute(Command::Payments(PaymentCommand::List {
        month: Some("03/2024".to_string()),
      }))
      .await
      .unwrap_err();
    assert!(err.to_string().contains("Mois invalide"));
  }

  #[tokio::test]
  async fn test_cache_clear_keeps_session() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app_for(&server, &dir).await;

    app.execute(login("root@rent.sn", "secret")).await.unwrap();
    app
      .execute(Command::Cache(CacheCommand::Clear { pattern: None }))
      .await
      .unwrap();
    assert!(app.execute(Command::Whoami).await.is_ok());
  }
}
