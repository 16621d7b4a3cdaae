//! The client context: one session store, one cache, and the services built
//! on them.

use chrono::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{AuthManager, HttpClient, TodoService};
use crate::cache::{Cache, CacheLayer, CacheStorage, MemoryStorage, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::event::EventHandler;
use crate::session::{SessionStore, SqliteTokens};

pub struct TodoClient {
  session: SessionStore,
  pub cache: Cache,
  pub auth: AuthManager,
  pub todos: TodoService,
  gc: Option<JoinHandle<()>>,
}

impl TodoClient {
  /// Client whose session (and, if configured, query cache) live in `db`.
  ///
  /// A stored session with an unusable access token is dropped on open.
  pub fn open(config: &Config, db: Database) -> Result<Self> {
    let session = SessionStore::new(SqliteTokens::new(db.clone()));
    if session.sanitize()? {
      info!("stored session was expired or malformed and has been cleared");
    }

    let storage: Box<dyn CacheStorage> = if config.cache.persist {
      Box::new(SqliteStorage::new(db)?)
    } else {
      Box::new(MemoryStorage::new())
    };

    Self::build(config, session, storage)
  }

  /// Client that keeps nothing beyond the process.
  #[cfg(test)]
  pub fn ephemeral(config: &Config) -> Result<Self> {
    Self::build(
      config,
      SessionStore::in_memory(),
      Box::new(MemoryStorage::new()),
    )
  }

  fn build(config: &Config, session: SessionStore, storage: Box<dyn CacheStorage>) -> Result<Self> {
    let cache = CacheLayer::new(storage)
      .with_stale_time(Duration::minutes(config.cache.stale_minutes))
      .with_gc_time(Duration::minutes(config.cache.gc_minutes));
    let http = HttpClient::new(&config.api, session.clone())?;
    let auth = AuthManager::new(http.clone(), session.clone(), cache.clone());
    let todos = TodoService::new(http, auth.clone(), cache.clone(), config.page_size.max(1));

    Ok(Self {
      session,
      cache,
      auth,
      todos,
      gc: None,
    })
  }

  /// Evict unused cache entries in the background.
  pub fn start_gc(&mut self, every: std::time::Duration) {
    if self.gc.is_none() {
      self.gc = Some(self.cache.spawn_gc(every));
    }
  }

  /// Channel for server change notifications.
  pub fn live_events(&self) -> EventHandler {
    EventHandler::new(self.cache.clone())
  }

  /// End the session and drop every cached response.
  ///
  /// Local state is cleared even when the server call fails; that failure is
  /// still returned.
  pub async fn logout(&self) -> Result<()> {
    let remote = self.auth.logout().await;
    self.clear()?;
    remote
  }

  /// Forget the session and every cached response.
  pub fn clear(&self) -> Result<()> {
    self.session.clear()?;
    let removed = self.cache.clear()?;
    info!(removed, "client state cleared");
    Ok(())
  }
}

impl Drop for TodoClient {
  fn drop(&mut self) {
    if let Some(gc) = self.gc.take() {
      gc.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{TodoFilters, TodoStatus};
  use crate::cache::CacheSource;
  use crate::session::token::make_token;
  use crate::session::Session;
  use crate::testing::{todo, FakeApi, PASSWORD, USER_ID};

  fn config(api: &FakeApi) -> Config {
    Config {
      api: api.config(),
      ..Config::default()
    }
  }

  #[tokio::test]
  async fn test_persistent_state_survives_reopen() {
    let api = FakeApi::start().await;
    api.add_todo(todo("t1", Some(USER_ID), TodoStatus::Todo));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    {
      let client = TodoClient::open(&config(&api), Database::open(&path).unwrap()).unwrap();
      client.auth.login("a@example.com", PASSWORD).await.unwrap();
      client.todos.list(1, &TodoFilters::default()).await.unwrap();
    }

    let client = TodoClient::open(&config(&api), Database::open(&path).unwrap()).unwrap();
    assert!(client.session.get().unwrap().is_some());
    let page = client.todos.list(1, &TodoFilters::default()).await.unwrap();
    assert_eq!(page.source, CacheSource::Cache);
    assert_eq!(page.data.data.len(), 1);
    assert_eq!(api.calls("list_tasks"), 1);
  }

  #[tokio::test]
  async fn test_open_drops_expired_session() {
    let api = FakeApi::start().await;
    let db = Database::open_in_memory().unwrap();
    SessionStore::new(SqliteTokens::new(db.clone()))
      .set(&Session {
        access_token: make_token(USER_ID, 1),
        refresh_token: "r".to_string(),
      })
      .unwrap();

    let client = TodoClient::open(&config(&api), db).unwrap();
    assert_eq!(client.session.get().unwrap(), None);
  }

  #[tokio::test]
  async fn test_clear_resets_everything() {
    let api = FakeApi::start().await;
    let mut client = TodoClient::ephemeral(&config(&api)).unwrap();
    client.start_gc(std::time::Duration::from_secs(60));
    client.auth.login("a@example.com", PASSWORD).await.unwrap();
    client.todos.list(1, &TodoFilters::default()).await.unwrap();

    client.clear().unwrap();
    assert_eq!(client.session.get().unwrap(), None);
    let page = client.todos.list(1, &TodoFilters::default()).await.unwrap();
    assert_eq!(page.source, CacheSource::Network);
  }

  #[tokio::test]
  async fn test_logout_drops_all_cached_state_even_if_server_fails() {
    let api = FakeApi::start().await;
    api.add_todo(todo("t1", Some(USER_ID), TodoStatus::Todo));
    let client = TodoClient::ephemeral(&config(&api)).unwrap();
    client.auth.login("a@example.com", PASSWORD).await.unwrap();
    client.todos.list(1, &TodoFilters::default()).await.unwrap();
    let other = crate::cache::QueryKey::new("other");
    client.cache.set(&other, &1).unwrap();

    api.fail_next("logout", 500, 1);
    assert_eq!(client.logout().await.unwrap_err().status(), Some(500));
    assert_eq!(client.session.get().unwrap(), None);
    assert!(!client.auth.is_authenticated());

    let reread = client
      .cache
      .read(&other, || async { Ok::<i32, crate::error::Error>(2) })
      .await
      .unwrap();
    assert_eq!(reread.source, CacheSource::Network);
  }

  #[tokio::test]
  async fn test_unused_persisted_entries_are_collected() {
    let api = FakeApi::start().await;
    let mut config = config(&api);
    config.cache.gc_minutes = 0;
    let client = TodoClient::open(&config, Database::open_in_memory().unwrap()).unwrap();
    client.auth.login("a@example.com", PASSWORD).await.unwrap();
    client.todos.list(1, &TodoFilters::default()).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(client.cache.collect_garbage().unwrap() >= 1);
    let page = client.todos.list(1, &TodoFilters::default()).await.unwrap();
    assert_eq!(page.source, CacheSource::Network);
  }
}
