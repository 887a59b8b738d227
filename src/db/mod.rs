pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a writer waits for another connection (or process) holding the
/// write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database connection wrapper shared by the cache and the queue.
///
/// Every component opens its own `Database`; SQLite's WAL and the busy
/// timeout keep concurrent connections (and processes) consistent.
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create the database at `path`
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    let db = Self { conn };
    db.configure()?;
    db.run_migrations()?;

    Ok(db)
  }

  /// Private in-memory database. Nothing survives the connection.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    let db = Self { conn };
    db.configure()?;
    db.run_migrations()?;

    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offsync").join("offsync.db"))
  }

  fn configure(&self) -> Result<()> {
    // Must precede the pragmas, which can also hit a locked database.
    self
      .conn
      .busy_timeout(BUSY_TIMEOUT)
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    // In-memory databases report "memory" here, which is fine.
    let _mode: String = self
      .conn
      .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
      .map_err(|e| eyre!("Failed to enable WAL: {}", e))?;

    self
      .conn
      .pragma_update(None, "synchronous", "FULL")
      .map_err(|e| eyre!("Failed to set synchronous mode: {}", e))?;
    self
      .conn
      .pragma_update(None, "foreign_keys", "ON")
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;

    Ok(())
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Hand the configured connection over to its owning component.
  pub fn into_connection(self) -> Connection {
    self.conn
  }
}
