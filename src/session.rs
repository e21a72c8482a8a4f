//! Login against the users collection and the role permissions derived from it.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError, GetOptions};
use crate::cache::{CacheStorage, Params};
use crate::model::{Role, User};

/// Storage key of the logged-in user
pub const USER_KEY: &str = "user";

#[derive(Debug, Error)]
pub enum LoginError {
  #[error("Email ou mot de passe incorrect")]
  InvalidCredentials,

  #[error("Erreur de connexion au serveur")]
  Server(#[source] ApiError),
}

/// The logged-in user, persisted in `storage` under [`USER_KEY`].
pub struct Session {
  api: ApiClient,
  storage: Arc<dyn CacheStorage>,
}

impl Session {
  pub fn new(api: &ApiClient, storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      api: api.instance(),
      storage,
    }
  }

  /// Look the credentials up in the users collection and remember the match.
  ///
  /// The user list is always read from the server.
  pub async fn login(&self, email: &str, password: &str) -> Result<User, LoginError> {
    let users: Vec<User> = self
      .api
      .get("users", &Params::new(), GetOptions::uncached())
      .await
      .map_err(LoginError::Server)?;

    let user = users
      .into_iter()
      .find(|u| u.email == email && u.password == password)
      .ok_or(LoginError::InvalidCredentials)?;

    match serde_json::to_string(&user) {
      Ok(raw) => {
        if let Err(e) = self.storage.set_item(USER_KEY, &raw) {
          warn!(error = %e, "Failed to persist session");
        }
      }
      Err(e) => warn!(error = %e, "Failed to serialize user"),
    }

    info!(email = %user.email, "Logged in");
    Ok(user)
  }

  /// The persisted user, if any.
  pub fn current_user(&self) -> Option<User> {
    let raw = match self.storage.get_item(USER_KEY) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(error = %e, "Failed to read session");
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(user) => Some(user),
      Err(e) => {
        warn!(error = %e, "Discarding unreadable session");
        None
      }
    }
  }

  pub fn logout(&self) {
    if let Err(e) = self.storage.remove_item(USER_KEY) {
      warn!(error = %e, "Failed to clear session");
    }
  }
}

/// What a user is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
  pub manage_houses: bool,
  pub view_houses: bool,
  pub manage_tenants: bool,
  pub manage_payments: bool,
  pub manage_expenses: bool,
  pub view_reports: bool,
  pub manage_users: bool,
}

impl Permissions {
  /// No user, no permissions.
  pub fn for_user(user: Option<&User>) -> Self {
    let Some(user) = user else {
      return Self::default();
    };

    let super_admin = user.role == Role::SuperAdmin;
    Self {
      manage_houses: super_admin,
      view_houses: super_admin,
      manage_tenants: true,
      manage_payments: true,
      manage_expenses: true,
      view_reports: true,
      manage_users: super_admin,
    }
  }
}
