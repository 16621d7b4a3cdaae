//! Push invalidation: server-sent change notifications drive the same cache
//! invalidation as local mutations.

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::keys;
use crate::cache::Cache;
use crate::error::{Error, Result};

/// Reference to the entity an event is about
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityRef {
  pub id: String,
}

/// Change notification from the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveEvent {
  TodoCreated(EntityRef),
  TodoUpdated(EntityRef),
  TodoDeleted(EntityRef),
}

impl LiveEvent {
  /// Parse one JSON message.
  pub fn parse(message: &str) -> Result<Self> {
    serde_json::from_str(message).map_err(|e| Error::Decode(format!("bad event: {}", e)))
  }

  pub fn entity_id(&self) -> &str {
    match self {
      LiveEvent::TodoCreated(e) | LiveEvent::TodoUpdated(e) | LiveEvent::TodoDeleted(e) => &e.id,
    }
  }

  /// Invalidate what this event made stale: every list, plus the entity's
  /// own detail entry.
  pub fn apply(&self, cache: &Cache) -> Result<()> {
    cache.invalidate(&keys::all_lists())?;
    cache.invalidate(&keys::detail(self.entity_id()))?;
    debug!(event = ?self, "applied live event");
    Ok(())
  }
}

/// Sender side of the push channel; events sent here are applied in order.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<LiveEvent>,
  task: JoinHandle<()>,
}

impl EventHandler {
  /// Start applying events to `cache`.
  pub fn new(cache: Cache) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<LiveEvent>();

    let task = tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        if let Err(e) = event.apply(&cache) {
          warn!(error = %e, "failed to apply live event");
        }
      }
    });

    Self { tx, task }
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<LiveEvent> {
    self.tx.clone()
  }

  /// Stop accepting events and wait for queued ones to be applied.
  pub async fn finish(self) {
    drop(self.tx);
    if let Err(e) = self.task.await {
      warn!(error = %e, "live event task failed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheLayer, CacheSource, CacheStorage, MemoryStorage};

  fn cache() -> Cache {
    let storage: Box<dyn CacheStorage> = Box::new(MemoryStorage::new());
    CacheLayer::new(storage)
  }

  #[test]
  fn test_parse() {
    let event = LiveEvent::parse(
      r#"{"type":"todo_updated","data":{"id":"t1","name":"x","status":"TODO"}}"#,
    )
    .unwrap();
    assert_eq!(
      event,
      LiveEvent::TodoUpdated(EntityRef {
        id: "t1".to_string()
      })
    );

    assert!(matches!(
      LiveEvent::parse(r#"{"type":"todo_exploded","data":{"id":"t1"}}"#),
      Err(Error::Decode(_))
    ));
    assert!(LiveEvent::parse("not json").is_err());
  }

  #[tokio::test]
  async fn test_events_invalidate_like_mutations() {
    let cache = cache();
    let list = keys::all_lists().with(1);
    cache.set(&list, &vec!["t1"]).unwrap();
    cache.set(&keys::detail("t1"), &"t1").unwrap();
    cache.set(&keys::detail("t2"), &"t2").unwrap();

    let handler = EventHandler::new(cache.clone());
    handler
      .sender()
      .send(LiveEvent::parse(r#"{"type":"todo_deleted","data":{"id":"t1"}}"#).unwrap())
      .unwrap();
    handler.finish().await;

    let refetch = || async { Ok::<String, Error>("fresh".to_string()) };
    let list_read = cache.read(&list, || async { Ok::<Vec<String>, Error>(vec![]) }).await.unwrap();
    assert_eq!(list_read.source, CacheSource::Network);
    assert_eq!(cache.read(&keys::detail("t1"), refetch).await.unwrap().source, CacheSource::Network);
    assert_eq!(cache.read(&keys::detail("t2"), refetch).await.unwrap().source, CacheSource::Cache);
  }
}
