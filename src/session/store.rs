use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{Error, Result};

use super::token;

const ACCESS_TOKEN_KEY: &str = "auth_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Access and refresh credentials issued by the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub access_token: String,
  pub refresh_token: String,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session").finish_non_exhaustive()
  }
}

/// Backend that persists the token pair.
pub trait TokenStorage: Send + Sync {
  fn load(&self) -> Result<Option<Session>>;

  fn save(&self, session: &Session) -> Result<()>;

  fn clear(&self) -> Result<()>;
}

/// Tokens held only for the life of the process.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryTokens {
  session: std::sync::Mutex<Option<Session>>,
}

#[cfg(test)]
impl TokenStorage for MemoryTokens {
  fn load(&self) -> Result<Option<Session>> {
    let guard = self
      .session
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))?;
    Ok(guard.clone())
  }

  fn save(&self, session: &Session) -> Result<()> {
    let mut guard = self
      .session
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))?;
    *guard = Some(session.clone());
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let mut guard = self
      .session
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))?;
    *guard = None;
    Ok(())
  }
}

/// Tokens kept in the state database under two fixed keys.
pub struct SqliteTokens {
  db: Database,
}

impl SqliteTokens {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl TokenStorage for SqliteTokens {
  fn load(&self) -> Result<Option<Session>> {
    let conn = self.db.conn()?;
    let get = |key: &str| -> Result<Option<String>> {
      conn
        .query_row(
          "SELECT value FROM kv_store WHERE key = ?",
          params![key],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to read {}: {}", key, e)))
    };

    match (get(ACCESS_TOKEN_KEY)?, get(REFRESH_TOKEN_KEY)?) {
      (Some(access_token), Some(refresh_token)) => Ok(Some(Session {
        access_token,
        refresh_token,
      })),
      _ => Ok(None),
    }
  }

  fn save(&self, session: &Session) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

    for (key, value) in [
      (ACCESS_TOKEN_KEY, &session.access_token),
      (REFRESH_TOKEN_KEY, &session.refresh_token),
    ] {
      tx.execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| Error::Storage(format!("Failed to store {}: {}", key, e)))?;
    }

    tx.commit()
      .map_err(|e| Error::Storage(format!("Failed to commit transaction: {}", e)))
  }

  fn clear(&self) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "DELETE FROM kv_store WHERE key IN (?, ?)",
        params![ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY],
      )
      .map_err(|e| Error::Storage(format!("Failed to clear session: {}", e)))?;
    Ok(())
  }
}

/// The single owner of the current session.
///
/// Clones share the same backend, so every component reading credentials
/// sees the same values.
#[derive(Clone)]
pub struct SessionStore {
  storage: Arc<dyn TokenStorage>,
}

impl SessionStore {
  pub fn new(storage: impl TokenStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// An empty, process-local store.
  #[cfg(test)]
  pub fn in_memory() -> Self {
    Self::new(MemoryTokens::default())
  }

  pub fn get(&self) -> Result<Option<Session>> {
    self.storage.load()
  }

  pub fn access_token(&self) -> Result<Option<String>> {
    Ok(self.get()?.map(|s| s.access_token))
  }

  pub fn set(&self, session: &Session) -> Result<()> {
    self.storage.save(session)?;
    debug!("session stored");
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.clear()?;
    debug!("session cleared");
    Ok(())
  }

  /// Drop a stored session whose access token is malformed or expired.
  ///
  /// Returns `true` if a session was cleared.
  pub fn sanitize(&self) -> Result<bool> {
    let Some(session) = self.get()? else {
      return Ok(false);
    };

    match token::validate(&session.access_token) {
      Ok(_) => Ok(false),
      Err(e) => {
        info!(reason = %e, "clearing unusable stored session");
        self.clear()?;
        Ok(true)
      }
    }
  }
}
