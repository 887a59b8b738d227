//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::identity::RequestIdentity;
use crate::db::Database;
use crate::net::{Headers, Response};

/// A single cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  /// The stored response
  pub response: Response,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// Summary of one stored generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationInfo {
  pub namespace: String,
  pub tag: String,
  pub is_current: bool,
  pub entries: usize,
}

/// Trait for cache storage backends.
///
/// Every method is atomic on its own; no caller relies on multi-call
/// transactions.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create an empty generation. Creating an existing one is a no-op.
  fn create_generation(&self, namespace: &str, tag: &str) -> Result<()>;

  /// Delete a generation and all of its entries. Missing ones are ignored.
  fn delete_generation(&self, namespace: &str, tag: &str) -> Result<()>;

  /// Atomically make `tag` the only current generation of `namespace`.
  fn set_current(&self, namespace: &str, tag: &str) -> Result<()>;

  /// Tag of the current generation of `namespace`.
  fn current(&self, namespace: &str) -> Result<Option<String>>;

  /// Whether the generation exists.
  fn has_generation(&self, namespace: &str, tag: &str) -> Result<bool>;

  /// Every stored generation across all namespaces.
  fn generations(&self) -> Result<Vec<GenerationInfo>>;

  /// Insert or replace the entry for `identity`.
  fn put(
    &self,
    namespace: &str,
    tag: &str,
    identity: &RequestIdentity,
    response: &Response,
  ) -> Result<()>;

  /// Get the entry for `identity`.
  fn get(
    &self,
    namespace: &str,
    tag: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<CachedResponse>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self {
      conn: Mutex::new(db.into_connection()),
    }
  }

  /// Open the cache tables of the database at `path`.
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
}

impl CacheStorage for SqliteStorage {
  fn create_generation(&self, namespace: &str, tag: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO generations (namespace, tag, is_current, created_at)
         VALUES (?, ?, 0, datetime('now'))",
        params![namespace, tag],
      )
      .map_err(|e| eyre!("Failed to create generation {}/{}: {}", namespace, tag, e))?;
    Ok(())
  }

  fn delete_generation(&self, namespace: &str, tag: &str) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE namespace = ? AND tag = ?",
      params![namespace, tag],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}/{}: {}", namespace, tag, e))?;
    tx.execute(
      "DELETE FROM generations WHERE namespace = ? AND tag = ?",
      params![namespace, tag],
    )
    .map_err(|e| eyre!("Failed to delete generation {}/{}: {}", namespace, tag, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn set_current(&self, namespace: &str, tag: &str) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists: bool = tx
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM generations WHERE namespace = ? AND tag = ?)",
        params![namespace, tag],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to look up generation: {}", e))?;
    if !exists {
      return Err(eyre!("Generation {}/{} does not exist", namespace, tag));
    }

    tx.execute(
      "UPDATE generations SET is_current = CASE WHEN tag = ?2 THEN 1 ELSE 0 END
       WHERE namespace = ?1",
      params![namespace, tag],
    )
    .map_err(|e| eyre!("Failed to switch current generation: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn current(&self, namespace: &str) -> Result<Option<String>> {
    let conn = self.conn()?;
    conn
      .query_row(
        "SELECT tag FROM generations WHERE namespace = ? AND is_current = 1",
        params![namespace],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read current generation: {}", e))
  }

  fn has_generation(&self, namespace: &str, tag: &str) -> Result<bool> {
    let conn = self.conn()?;
    conn
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM generations WHERE namespace = ? AND tag = ?)",
        params![namespace, tag],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to look up generation: {}", e))
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT g.namespace, g.tag, g.is_current, COUNT(e.identity_hash)
         FROM generations g
         LEFT JOIN cache_entries e ON e.namespace = g.namespace AND e.tag = g.tag
         GROUP BY g.namespace, g.tag
         ORDER BY g.namespace, g.created_at, g.tag",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let generations = stmt
      .query_map([], |row| {
        Ok(GenerationInfo {
          namespace: row.get(0)?,
          tag: row.get(1)?,
          is_current: row.get(2)?,
          entries: row.get::<_, i64>(3)? as usize,
        })
      })
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read generation row: {}", e))?;

    Ok(generations)
  }

  fn put(
    &self,
    namespace: &str,
    tag: &str,
    identity: &RequestIdentity,
    response: &Response,
  ) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (namespace, tag, identity_hash, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          namespace,
          tag,
          identity.cache_hash(),
          identity.method(),
          identity.url(),
          response.status,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}/{}: {}", identity.url(), namespace, tag, e))?;

    Ok(())
  }

  fn get(
    &self,
    namespace: &str,
    tag: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE namespace = ? AND tag = ? AND identity_hash = ?",
        params![namespace, tag, identity.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
