//! Core traits and types for the persistent store.

use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, Result};

/// Keyed tables of the persistent store.
///
/// The append-only log table is reached through the dedicated log methods
/// instead, since its key is an auto-increment id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
  /// Content entries, keyed by manifest file name
  Content,
  /// Version tags and the last refresh date
  Meta,
}

impl Table {
  pub fn name(&self) -> &'static str {
    match self {
      Table::Content => "poems",
      Table::Meta => "cache_meta",
    }
  }
}

/// One upsert inside a `put_batch` transaction.
#[derive(Debug, Clone)]
pub struct StoreWrite {
  pub table: Table,
  pub key: String,
  pub value: Value,
}

impl StoreWrite {
  pub fn new(table: Table, key: impl Into<String>, value: Value) -> Self {
    Self {
      table,
      key: key.into(),
      value,
    }
  }
}

/// A row of the diagnostic log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
  pub id: i64,
  #[serde(flatten)]
  pub entry: Value,
}

/// Trait for persistent store backends.
///
/// Every write runs in its own transaction: on error nothing from that call
/// has been committed. No extra locking is layered on top, so a get followed
/// by a put is two independent transactions.
pub trait PersistentStore: Send + Sync {
  /// Get a value by key, `None` when absent.
  fn get(&self, table: Table, key: &str) -> Result<Option<Value>>;

  /// Upsert a single value.
  fn put(&self, table: Table, key: &str, value: &Value) -> Result<()>;

  /// Apply several upserts, in order, inside one transaction.
  fn put_batch(&self, writes: &[StoreWrite]) -> Result<()>;

  /// Empty the given tables inside one transaction.
  fn clear(&self, tables: &[Table]) -> Result<()>;

  /// Append a diagnostic entry, returning its id.
  fn append_log(&self, entry: &Value) -> Result<i64>;

  /// All diagnostic entries in id order.
  fn logs(&self) -> Result<Vec<LogEntry>>;

  /// Delete a batch of diagnostic entries inside one transaction.
  fn delete_logs(&self, ids: &[i64]) -> Result<()>;
}

/// Store used when the real one could not be opened.
/// Every operation rejects with `StoreUnavailable`.
pub struct UnavailableStore {
  reason: String,
}

impl UnavailableStore {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }

  fn reject<T>(&self) -> Result<T> {
    Err(CacheError::StoreUnavailable(self.reason.clone()))
  }
}

impl PersistentStore for UnavailableStore {
  fn get(&self, _table: Table, _key: &str) -> Result<Option<Value>> {
    self.reject()
  }

  fn put(&self, _table: Table, _key: &str, _value: &Value) -> Result<()> {
    self.reject()
  }

  fn put_batch(&self, _writes: &[StoreWrite]) -> Result<()> {
    self.reject()
  }

  fn clear(&self, _tables: &[Table]) -> Result<()> {
    self.reject()
  }

  fn append_log(&self, _entry: &Value) -> Result<i64> {
    self.reject()
  }

  fn logs(&self) -> Result<Vec<LogEntry>> {
    self.reject()
  }

  fn delete_logs(&self, _ids: &[i64]) -> Result<()> {
    self.reject()
  }
}

/// Indicates where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from the asset cache without touching the network
  Cache,
  /// Network failed, served from the asset cache
  Offline,
}
