//! SQLite implementation of the persistent store.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

use super::traits::{LogEntry, PersistentStore, StoreWrite, Table};
use crate::db::Database;
use crate::error::{CacheError, Result};

/// SQLite-based persistent store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (creating if needed) the store inside `data_dir`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    let db = Database::open(data_dir)?;
    Ok(Self {
      conn: Mutex::new(db.into_connection()),
    })
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let db = Database::open_in_memory()?;
    Ok(Self {
      conn: Mutex::new(db.into_connection()),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::StoreUnavailable(format!("Lock poisoned: {}", e)))
  }

  #[cfg(test)]
  pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
    self.lock()?.execute_batch(sql)?;
    Ok(())
  }
}

fn upsert(conn: &Connection, table: Table, key: &str, value: &Value) -> Result<()> {
  let data = serde_json::to_string(value).map_err(|e| CacheError::parse(key, e))?;
  conn.execute(
    &format!(
      "INSERT OR REPLACE INTO {} (key, data) VALUES (?, ?)",
      table.name()
    ),
    params![key, data],
  )?;
  Ok(())
}

impl PersistentStore for SqliteStore {
  fn get(&self, table: Table, key: &str) -> Result<Option<Value>> {
    let conn = self.lock()?;

    let data: Option<String> = conn
      .query_row(
        &format!("SELECT data FROM {} WHERE key = ?", table.name()),
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => {
        let value = serde_json::from_str(&data).map_err(|e| CacheError::parse(key, e))?;
        Ok(Some(value))
      }
      None => Ok(None),
    }
  }

  fn put(&self, table: Table, key: &str, value: &Value) -> Result<()> {
    let conn = self.lock()?;
    upsert(&conn, table, key, value).map_err(|e| {
      error!(table = table.name(), key, "Failed to store data: {}", e);
      e
    })?;
    debug!(table = table.name(), key, "Data stored");
    Ok(())
  }

  fn put_batch(&self, writes: &[StoreWrite]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    for write in writes {
      upsert(&tx, write.table, &write.key, &write.value)?;
    }

    // Dropping the transaction on an early return rolls everything back
    tx.commit()?;
    debug!(count = writes.len(), "Batch committed");
    Ok(())
  }

  fn clear(&self, tables: &[Table]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    for table in tables {
      tx.execute(&format!("DELETE FROM {}", table.name()), [])?;
    }

    tx.commit()?;
    debug!(?tables, "Tables cleared");
    Ok(())
  }

  fn append_log(&self, entry: &Value) -> Result<i64> {
    let conn = self.lock()?;
    let data = serde_json::to_string(entry).map_err(|e| CacheError::parse("log entry", e))?;
    conn.execute("INSERT INTO logs (entry) VALUES (?)", params![data])?;
    Ok(conn.last_insert_rowid())
  }

  fn logs(&self) -> Result<Vec<LogEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT id, entry FROM logs ORDER BY id")?;

    let rows: Vec<(i64, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<std::result::Result<_, _>>()?;

    rows
      .into_iter()
      .map(|(id, data)| {
        let entry = serde_json::from_str(&data).map_err(|e| CacheError::parse("log entry", e))?;
        Ok(LogEntry { id, entry })
      })
      .collect()
  }

  fn delete_logs(&self, ids: &[i64]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    {
      let mut stmt = tx.prepare("DELETE FROM logs WHERE id = ?")?;
      for id in ids {
        stmt.execute(params![id])?;
      }
    }

    tx.commit()?;
    debug!(?ids, "Deleted logs");
    Ok(())
  }
}
