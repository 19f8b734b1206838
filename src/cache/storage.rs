//! Cache storage trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::api::types::Timestamp;

use super::traits::{EntityKind, StoredRecord};

/// The host cannot provide durable storage at all.
#[derive(Debug, Error)]
#[error("persistent cache unavailable at {path}: {reason}")]
pub struct StorageUnavailable {
  pub path: PathBuf,
  pub reason: String,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  fn read(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>>;

  /// Commit `record` only if no record exists for `id` or `record` is
  /// strictly newer than the stored one. The read and the write form one
  /// transaction. Returns whether the record was committed.
  fn write_if_newer(&self, kind: EntityKind, id: &str, record: &StoredRecord) -> Result<bool>;

  /// Remove every record of one kind.
  fn clear(&self, kind: EntityKind) -> Result<()>;

  fn read_token(&self) -> Result<Option<String>>;

  fn write_token(&self, token: &str) -> Result<()>;

  fn clear_token(&self) -> Result<()>;

  /// Remove the stored token only if it is still `token`.
  fn clear_token_if(&self, token: &str) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when durable storage is disabled or unavailable.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn read(&self, _kind: EntityKind, _id: &str) -> Result<Option<StoredRecord>> {
    Ok(None) // Always miss
  }

  fn write_if_newer(&self, _kind: EntityKind, _id: &str, _record: &StoredRecord) -> Result<bool> {
    Ok(false) // Discard
  }

  fn clear(&self, _kind: EntityKind) -> Result<()> {
    Ok(())
  }

  fn read_token(&self) -> Result<Option<String>> {
    Ok(None)
  }

  fn write_token(&self, _token: &str) -> Result<()> {
    Ok(())
  }

  fn clear_token(&self) -> Result<()> {
    Ok(())
  }

  fn clear_token_if(&self, _token: &str) -> Result<()> {
    Ok(())
  }
}

/// Key of the single record in the token unit.
const TOKEN_KEY: &str = "lastLogInUser";

/// Schema for cache tables. One table per entity kind plus the token unit.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "account" (
    id TEXT PRIMARY KEY,
    observed_at INTEGER NOT NULL,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS "project" (
    id TEXT PRIMARY KEY,
    observed_at INTEGER NOT NULL,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS "typePart" (
    id TEXT PRIMARY KEY,
    observed_at INTEGER NOT NULL,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS "image-binary" (
    id TEXT PRIMARY KEY,
    observed_at INTEGER NOT NULL,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS "accountToken" (
    key TEXT PRIMARY KEY,
    token TEXT NOT NULL
);
"#;

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> std::result::Result<Self, StorageUnavailable> {
    let unavailable = |reason: String| StorageUnavailable {
      path: path.to_path_buf(),
      reason,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| unavailable(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;
    Self::from_connection(conn).map_err(|e| unavailable(e.to_string()))
  }

  /// A private in-memory database, mainly for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    // Another instance may hold the write lock briefly.
    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStorage for SqliteStorage {
  fn read(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!(r#"SELECT observed_at, value FROM "{}" WHERE id = ?"#, kind.table());
    conn
      .query_row(&sql, params![id], |row| {
        Ok(StoredRecord {
          observed_at: Timestamp::from_millis(row.get(0)?),
          value: row.get(1)?,
        })
      })
      .optional()
      .map_err(|e| eyre!("Failed to read {} {}: {}", kind, id, e))
  }

  fn write_if_newer(&self, kind: EntityKind, id: &str, record: &StoredRecord) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // IMMEDIATE takes the write lock before the read, so no other connection
    // can commit between the freshness check and our write.
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let existing: Option<i64> = tx
      .query_row(
        &format!(r#"SELECT observed_at FROM "{}" WHERE id = ?"#, kind.table()),
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} {}: {}", kind, id, e))?;

    let newer = existing.map_or(true, |stored| record.observed_at.as_millis() > stored);
    if newer {
      tx.execute(
        &format!(
          r#"INSERT OR REPLACE INTO "{}" (id, observed_at, value) VALUES (?, ?, ?)"#,
          kind.table()
        ),
        params![id, record.observed_at.as_millis(), record.value],
      )
      .map_err(|e| eyre!("Failed to store {} {}: {}", kind, id, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(newer)
  }

  fn clear(&self, kind: EntityKind) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(&format!(r#"DELETE FROM "{}""#, kind.table()), [])
      .map_err(|e| eyre!("Failed to clear {}: {}", kind, e))?;
    Ok(())
  }

  fn read_token(&self) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        r#"SELECT token FROM "accountToken" WHERE key = ?"#,
        params![TOKEN_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read account token: {}", e))
  }

  fn write_token(&self, token: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        r#"INSERT OR REPLACE INTO "accountToken" (key, token) VALUES (?, ?)"#,
        params![TOKEN_KEY, token],
      )
      .map_err(|e| eyre!("Failed to store account token: {}", e))?;
    Ok(())
  }

  fn clear_token(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(r#"DELETE FROM "accountToken" WHERE key = ?"#, params![TOKEN_KEY])
      .map_err(|e| eyre!("Failed to clear account token: {}", e))?;
    Ok(())
  }

  fn clear_token_if(&self, token: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        r#"DELETE FROM "accountToken" WHERE key = ? AND token = ?"#,
        params![TOKEN_KEY, token],
      )
      .map_err(|e| eyre!("Failed to clear account token: {}", e))?;
    Ok(())
  }
}
