//! Store wrappers for unit tests.

use serde_json::Value;
use std::sync::Mutex;

use super::traits::{LogEntry, PersistentStore, StoreWrite, Table};
use super::SqliteStore;
use crate::error::Result;

/// In-memory SQLite store that records every write in order.
pub struct RecordingStore {
  inner: SqliteStore,
  writes: Mutex<Vec<(Table, String)>>,
}

impl RecordingStore {
  pub fn new() -> Self {
    Self {
      inner: SqliteStore::open_in_memory().unwrap(),
      writes: Mutex::new(Vec::new()),
    }
  }

  pub fn writes(&self) -> Vec<(Table, String)> {
    self.writes.lock().unwrap().clone()
  }

  pub fn reset(&self) {
    self.writes.lock().unwrap().clear();
  }
}

impl PersistentStore for RecordingStore {
  fn get(&self, table: Table, key: &str) -> Result<Option<Value>> {
    self.inner.get(table, key)
  }

  fn put(&self, table: Table, key: &str, value: &Value) -> Result<()> {
    self.inner.put(table, key, value)?;
    self.writes.lock().unwrap().push((table, key.to_string()));
    Ok(())
  }

  fn put_batch(&self, writes: &[StoreWrite]) -> Result<()> {
    self.inner.put_batch(writes)?;
    let mut recorded = self.writes.lock().unwrap();
    for write in writes {
      recorded.push((write.table, write.key.clone()));
    }
    Ok(())
  }

  fn clear(&self, tables: &[Table]) -> Result<()> {
    self.inner.clear(tables)
  }

  fn append_log(&self, entry: &Value) -> Result<i64> {
    self.inner.append_log(entry)
  }

  fn logs(&self) -> Result<Vec<LogEntry>> {
    self.inner.logs()
  }

  fn delete_logs(&self, ids: &[i64]) -> Result<()> {
    self.inner.delete_logs(ids)
  }
}
