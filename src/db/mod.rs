pub mod schema;

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Shared handle to the state database.
///
/// Session tokens and the persisted query cache live in the same file; each
/// store holds a clone of this handle.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Storage(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::Storage(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;
    debug!(path = %path.display(), "opened state database");

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory database
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::Storage(format!("Failed to open in-memory database: {}", e)))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| Error::Storage(format!("Failed to run migrations: {}", e)))?;

    let stored: Option<String> = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = 'cache_buster'",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| Error::Storage(format!("Failed to read cache version: {}", e)))?;

    let current = schema::CACHE_BUSTER.to_string();
    if stored.as_deref() != Some(current.as_str()) {
      info!(from = ?stored, to = %current, "cache format changed, discarding cached queries");
      conn
        .execute("DELETE FROM query_cache", [])
        .map_err(|e| Error::Storage(format!("Failed to clear query cache: {}", e)))?;
      conn
        .execute(
          "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES ('cache_buster', ?, datetime('now'))",
          params![current],
        )
        .map_err(|e| Error::Storage(format!("Failed to store cache version: {}", e)))?;
    }

    Ok(())
  }

  /// Lock the connection
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }
}
