//! Auth session manager: login, registration, refresh, logout and the
//! signed-in user.

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::session::{token, Session, SessionStore};

use super::client::HttpClient;
use super::keys;
use super::types::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, User};

#[derive(Clone)]
pub struct AuthManager {
  http: HttpClient,
  session: SessionStore,
  cache: Cache,
  /// User confirmed by the last successful auth call
  user: Arc<Mutex<Option<User>>>,
}

impl AuthManager {
  pub fn new(http: HttpClient, session: SessionStore, cache: Cache) -> Self {
    Self {
      http,
      session,
      cache,
      user: Arc::new(Mutex::new(None)),
    }
  }

  /// Authenticate with email and password.
  ///
  /// Nothing is stored unless the server accepts the credentials.
  pub async fn login(&self, email: &str, password: &str) -> Result<User> {
    let request = LoginRequest {
      email: email.to_string(),
      password: password.to_string(),
    };
    let response: AuthResponse = self.http.post(&["auth", "login"], &request).await?;
    info!(user_id = %response.user.id, "logged in");
    self.establish(response)
  }

  /// Create an account and sign into it.
  pub async fn register(&self, request: &RegisterRequest) -> Result<User> {
    let response: AuthResponse = self.http.post(&["auth", "register"], request).await?;
    info!(user_id = %response.user.id, "registered");
    self.establish(response)
  }

  /// Exchange the stored refresh token for a new token pair.
  pub async fn refresh(&self) -> Result<User> {
    let session = self.session.get()?.ok_or(Error::NoSession)?;
    let request = RefreshRequest {
      refresh_token: session.refresh_token,
    };
    let response: AuthResponse = self.guard(self.http.post(&["auth", "refresh"], &request).await)?;
    info!(user_id = %response.user.id, "session refreshed");
    self.establish(response)
  }

  /// The signed-in user's profile.
  ///
  /// Fails with [`Error::NoSession`] when no token is stored, and with a
  /// token error when the stored token is malformed or already expired;
  /// neither case touches the network.
  pub async fn current_user(&self) -> Result<User> {
    let access_token = self.session.access_token()?.ok_or(Error::NoSession)?;
    let claims = token::validate(&access_token)?;
    debug!(sub = ?claims.sub, exp = claims.exp, "access token accepted locally");

    let http = self.http.clone();
    let result = self
      .cache
      .read(&keys::current_user(), move || async move {
        http.get_once::<User>(&["auth", "me"]).await
      })
      .await;

    let user = self.guard(result)?.data;
    self.set_user(Some(user.clone()));
    Ok(user)
  }

  /// End the session.
  ///
  /// The server is told first, but local state is cleared whatever it
  /// answers. A failed server call is still reported to the caller.
  pub async fn logout(&self) -> Result<()> {
    let remote = self.http.post_empty(&["auth", "logout"]).await;
    self.clear_local()?;

    match remote {
      Ok(()) => {
        info!("logged out");
        Ok(())
      }
      Err(e) => {
        warn!(error = %e, "server logout failed, local session cleared anyway");
        Err(e)
      }
    }
  }

  /// Apply the session policy to the outcome of an authenticated call.
  ///
  /// A 401 means the server no longer accepts the session, so it is
  /// cleared. Anything else (5xx, network) leaves the session in place.
  pub fn guard<T>(&self, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
      if e.is_unauthorized() {
        warn!("server rejected the session, clearing it");
        if let Err(clear_err) = self.clear_local() {
          warn!(error = %clear_err, "failed to clear rejected session");
        }
      }
    }
    result
  }

  /// The user confirmed by the last successful auth call, if any.
  pub fn user(&self) -> Option<User> {
    self.user.lock().ok().and_then(|u| u.clone())
  }

  pub fn is_authenticated(&self) -> bool {
    self.user().is_some()
  }

  fn set_user(&self, user: Option<User>) {
    if let Ok(mut guard) = self.user.lock() {
      *guard = user;
    }
  }

  fn establish(&self, response: AuthResponse) -> Result<User> {
    self.session.set(&Session {
      access_token: response.token,
      refresh_token: response.refresh_token,
    })?;
    self.cache.set(&keys::current_user(), &response.user)?;
    self.cache.invalidate(&keys::all_lists())?;
    self.set_user(Some(response.user.clone()));
    Ok(response.user)
  }

  fn clear_local(&self) -> Result<()> {
    self.set_user(None);
    self.session.clear()?;
    self.cache.invalidate(&keys::current_user())?;
    self.cache.invalidate(&keys::all_lists())?;
    self.cache.invalidate(&keys::detail_root())?;
    Ok(())
  }
}
