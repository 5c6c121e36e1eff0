pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CacheError, Result};

/// Database connection wrapper for the persistent store
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create the database inside `data_dir`
  pub fn open(data_dir: &Path) -> Result<Self> {
    let path = Self::path_in(data_dir);

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        CacheError::StoreUnavailable(format!("Failed to create database directory: {}", e))
      })?;
    }

    let conn = Connection::open(&path).map_err(|e| {
      CacheError::StoreUnavailable(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let db = Self { conn };
    db.run_migrations()?;
    info!(path = %path.display(), "Persistent store initialized");

    Ok(db)
  }

  /// Open a private in-memory database (tests and throwaway runs)
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to open in-memory db: {}", e)))?;
    let db = Self { conn };
    db.run_migrations()?;
    Ok(db)
  }

  /// Location of the store file for a data directory
  pub fn path_in(data_dir: &Path) -> PathBuf {
    data_dir.join(schema::STORE_NAME)
  }

  /// Run database migrations. Safe to call on every open.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to run migrations: {}", e)))?;

    let current: i64 = self
      .conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current < schema::SCHEMA_VERSION {
      debug!(from = current, to = schema::SCHEMA_VERSION, "Upgrading schema version");
      self
        .conn
        .execute_batch(&format!("PRAGMA user_version = {}", schema::SCHEMA_VERSION))?;
    }

    Ok(())
  }

  pub fn schema_version(&self) -> Result<i64> {
    Ok(
      self
        .conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))?,
    )
  }

  /// Hand the connection to a store implementation
  pub fn into_connection(self) -> Connection {
    self.conn
  }
}
