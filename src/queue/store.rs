//! SQLite-backed durable queue.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::types::{generate_id, ItemKind, NewItem, QueueItem};
use crate::db::Database;

/// Crash-durable store of queued items.
///
/// Each call is a single SQLite statement, so it is atomic on its own and
/// safe against other connections (and processes) using the same file.
pub struct QueueStore {
  conn: Mutex<Connection>,
}

impl QueueStore {
  pub fn new(db: Database) -> Self {
    Self {
      conn: Mutex::new(db.into_connection()),
    }
  }

  /// Open the queue of the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    Ok(Self::new(Database::open(path)?))
  }

  pub fn open_in_memory() -> Result<Self> {
    Ok(Self::new(Database::open_in_memory()?))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Persist `item` and return its id.
  ///
  /// Enqueuing a caller-chosen id that is already queued replaces that item
  /// (last write wins). A generated id never replaces anything; a collision
  /// is an error.
  pub fn enqueue(&self, item: NewItem) -> Result<String> {
    let now = Utc::now();
    let (id, replace) = match item.id {
      Some(id) if !id.is_empty() => (id, true),
      _ => (generate_id(item.kind, now), false),
    };
    let payload = serde_json::to_string(&item.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    self.insert(&id, item.kind, &payload, now, replace)?;
    debug!("Enqueued {} ({})", id, item.kind.as_str());
    Ok(id)
  }

  fn insert(
    &self,
    id: &str,
    kind: ItemKind,
    payload: &str,
    enqueued_at: DateTime<Utc>,
    replace: bool,
  ) -> Result<()> {
    let sql = if replace {
      "INSERT INTO queue_items (id, kind, payload, enqueued_at)
       VALUES (?1, ?2, ?3, ?4)
       ON CONFLICT(id) DO UPDATE SET
         kind = excluded.kind,
         payload = excluded.payload,
         enqueued_at = excluded.enqueued_at"
    } else {
      "INSERT INTO queue_items (id, kind, payload, enqueued_at)
       VALUES (?1, ?2, ?3, ?4)"
    };

    let conn = self.conn()?;
    conn
      .execute(
        sql,
        params![id, kind.as_str(), payload, enqueued_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to enqueue {}: {}", id, e))?;
    Ok(())
  }

  /// Every queued item, in insertion order.
  ///
  /// Rows that can no longer be decoded are skipped with a warning rather
  /// than failing the whole listing.
  pub fn list_all(&self) -> Result<Vec<QueueItem>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, kind, payload, enqueued_at FROM queue_items ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read queue row: {}", e))?;

    let items = rows
      .into_iter()
      .filter_map(|(id, kind, payload, enqueued_at)| {
        match decode(&id, &kind, &payload, &enqueued_at) {
          Ok(item) => Some(item),
          Err(e) => {
            warn!("Skipping undecodable queue item {}: {}", id, e);
            None
          }
        }
      })
      .collect();

    Ok(items)
  }

  pub fn get(&self, id: &str) -> Result<Option<QueueItem>> {
    let conn = self.conn()?;
    let row: Option<(String, String, String)> = conn
      .query_row(
        "SELECT kind, payload, enqueued_at FROM queue_items WHERE id = ?",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read queue item {}: {}", id, e))?;

    row
      .map(|(kind, payload, enqueued_at)| decode(id, &kind, &payload, &enqueued_at))
      .transpose()
  }

  /// Delete `id`. Removing an absent id is a no-op; the return value says
  /// whether anything was removed.
  pub fn remove(&self, id: &str) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute("DELETE FROM queue_items WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove {}: {}", id, e))?;
    Ok(removed > 0)
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM queue_items", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

fn decode(id: &str, kind: &str, payload: &str, enqueued_at: &str) -> Result<QueueItem> {
  Ok(QueueItem {
    id: id.to_string(),
    kind: ItemKind::parse(kind)?,
    payload: serde_json::from_str(payload)
      .map_err(|e| eyre!("Failed to deserialize payload: {}", e))?,
    enqueued_at: DateTime::parse_from_rfc3339(enqueued_at)
      .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", enqueued_at, e))?
      .with_timezone(&Utc),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Arc;
  use tempfile::TempDir;

  #[test]
  fn test_enqueue_assigns_id_and_lists_in_order() {
    let queue = QueueStore::open_in_memory().unwrap();

    let a = queue.enqueue(NewItem::snapshot(json!({"draft": "a"}))).unwrap();
    let b = queue
      .enqueue(NewItem::action(json!({"url": "/api", "body": {"x": 1}})))
      .unwrap();

    assert!(a.starts_with("state-"));
    assert!(b.starts_with("action-"));

    let items = queue.list_all().unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str()]);
    assert_eq!(items[1].payload, json!({"url": "/api", "body": {"x": 1}}));
  }

  #[test]
  fn test_explicit_id_is_kept_and_last_write_wins() {
    let queue = QueueStore::open_in_memory().unwrap();

    let id = queue
      .enqueue(NewItem::snapshot(json!({"v": 1})).with_id("editor-state"))
      .unwrap();
    queue
      .enqueue(NewItem::snapshot(json!({"v": 2})).with_id("editor-state"))
      .unwrap();

    assert_eq!(id, "editor-state");
    assert_eq!(queue.len().unwrap(), 1);
    assert_eq!(queue.get(&id).unwrap().unwrap().payload, json!({"v": 2}));
  }

  #[test]
  fn test_generated_id_collision_does_not_overwrite() {
    let queue = QueueStore::open_in_memory().unwrap();
    let id = queue
      .enqueue(NewItem::action(json!({"url": "/api/a"})))
      .unwrap();

    let clash = queue.insert(
      &id,
      ItemKind::Action,
      r#"{"url":"/api/b"}"#,
      Utc::now(),
      false,
    );

    assert!(clash.is_err());
    assert_eq!(queue.len().unwrap(), 1);
    assert_eq!(queue.get(&id).unwrap().unwrap().payload, json!({"url": "/api/a"}));
  }

  #[test]
  fn test_remove_is_idempotent() {
    let queue = QueueStore::open_in_memory().unwrap();
    let id = queue.enqueue(NewItem::action(json!({}))).unwrap();

    assert!(queue.remove(&id).unwrap());
    assert!(!queue.remove(&id).unwrap());
    assert!(!queue.remove("never-existed").unwrap());
    assert!(queue.is_empty().unwrap());
  }

  #[test]
  fn test_items_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");

    let mut expected = Vec::new();
    {
      let queue = QueueStore::open(&path).unwrap();
      for n in 0..5 {
        let id = queue
          .enqueue(NewItem::action(json!({"url": "/api/items", "body": {"n": n}})))
          .unwrap();
        expected.push((id, json!({"url": "/api/items", "body": {"n": n}})));
      }
    }

    let reopened = QueueStore::open(&path).unwrap();
    let items: Vec<(String, serde_json::Value)> = reopened
      .list_all()
      .unwrap()
      .into_iter()
      .map(|item| (item.id, item.payload))
      .collect();
    assert_eq!(items, expected);
  }

  #[test]
  fn test_concurrent_writers_do_not_lose_items() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");
    // Create the schema up front so writers don't race on migrations.
    QueueStore::open(&path).unwrap();

    let handles: Vec<_> = (0..4)
      .map(|worker| {
        let path = path.clone();
        std::thread::spawn(move || {
          // Separate connection per thread, like separate instances.
          let queue = Arc::new(QueueStore::open(&path).unwrap());
          let mut ids = Vec::new();
          for n in 0..25 {
            ids.push(
              queue
                .enqueue(NewItem::action(json!({"worker": worker, "n": n})))
                .unwrap(),
            );
          }
          // Each writer removes its own even items.
          for id in ids.iter().step_by(2) {
            queue.remove(id).unwrap();
          }
          ids
        })
      })
      .collect();

    let mut kept = Vec::new();
    for handle in handles {
      let ids = handle.join().unwrap();
      kept.extend(ids.into_iter().skip(1).step_by(2));
    }

    let queue = QueueStore::open(&path).unwrap();
    let mut listed: Vec<String> = queue.list_all().unwrap().into_iter().map(|i| i.id).collect();
    listed.sort();
    kept.sort();
    assert_eq!(listed, kept);
  }
}
