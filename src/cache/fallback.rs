//! Degraded-durability fallback storage.
//!
//! Structured storage can be denied while plain key-value storage still
//! works, so writes and reads cascade through an ordered list of tiers:
//! the persistent store, a durable local key-value file, and a
//! process-lifetime session map.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

use super::traits::{PersistentStore, Table};
use crate::error::{CacheError, Result};

/// Flat string key-value storage, the shape of browser local/session storage.
pub trait KeyValueStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;
  fn set_item(&self, key: &str, value: &str) -> Result<()>;
  fn remove_item(&self, key: &str) -> Result<()>;
  fn keys(&self) -> Result<Vec<String>>;

  /// Remove every key except `reserved`.
  fn clear_except(&self, reserved: &str) -> Result<()> {
    for key in self.keys()? {
      if key != reserved {
        self.remove_item(&key)?;
      }
    }
    Ok(())
  }
}

/// Session-scoped tier: lives as long as the process.
#[derive(Default)]
pub struct MemoryKvStore {
  items: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn items(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
    self
      .items
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl KeyValueStore for MemoryKvStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    Ok(self.items()?.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self.items()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self.items()?.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.items()?.keys().cloned().collect())
  }
}

/// Durable local tier: a single JSON object on disk, rewritten on every change.
pub struct FileKvStore {
  path: PathBuf,
  lock: Mutex<()>,
}

impl FileKvStore {
  pub const FILE_NAME: &'static str = "local_storage.json";

  pub fn new(path: PathBuf) -> Self {
    Self {
      path,
      lock: Mutex::new(()),
    }
  }

  pub fn in_dir(data_dir: &Path) -> Self {
    Self::new(data_dir.join(Self::FILE_NAME))
  }

  fn read_map(&self) -> Result<BTreeMap<String, String>> {
    match std::fs::read_to_string(&self.path) {
      Ok(contents) => serde_json::from_str(&contents)
        .map_err(|e| CacheError::parse(self.path.display().to_string(), e)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
      Err(e) => Err(CacheError::Storage(format!(
        "Failed to read {}: {}",
        self.path.display(),
        e
      ))),
    }
  }

  fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    let contents =
      serde_json::to_string_pretty(map).map_err(|e| CacheError::Storage(e.to_string()))?;
    std::fs::write(&self.path, contents)
      .map_err(|e| CacheError::Storage(format!("Failed to write {}: {}", self.path.display(), e)))
  }

  fn update<F>(&self, f: F) -> Result<()>
  where
    F: FnOnce(&mut BTreeMap<String, String>),
  {
    let _guard = self
      .lock
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))?;
    let mut map = self.read_map()?;
    f(&mut map);
    self.write_map(&map)
  }
}

impl KeyValueStore for FileKvStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    Ok(self.read_map()?.remove(key))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self.update(|map| {
      map.insert(key.to_string(), value.to_string());
    })
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self.update(|map| {
      map.remove(key);
    })
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.read_map()?.into_keys().collect())
  }

  fn clear_except(&self, reserved: &str) -> Result<()> {
    self.update(|map| map.retain(|k, _| k == reserved))
  }
}

/// One step of the fallback cascade.
pub trait StorageTier: Send + Sync {
  fn name(&self) -> &'static str;
  fn store(&self, key: &str, data: &Value) -> Result<()>;
  fn load(&self, key: &str) -> Result<Option<Value>>;
}

/// Persistent store content table as a tier.
pub struct PersistentTier(pub Arc<dyn PersistentStore>);

impl StorageTier for PersistentTier {
  fn name(&self) -> &'static str {
    "persistent"
  }

  fn store(&self, key: &str, data: &Value) -> Result<()> {
    self.0.put(Table::Content, key, data)
  }

  fn load(&self, key: &str) -> Result<Option<Value>> {
    self.0.get(Table::Content, key)
  }
}

/// A key-value store as a tier; values are stored as JSON text.
pub struct KvTier {
  name: &'static str,
  store: Arc<dyn KeyValueStore>,
}

impl KvTier {
  pub fn new(name: &'static str, store: Arc<dyn KeyValueStore>) -> Self {
    Self { name, store }
  }
}

impl StorageTier for KvTier {
  fn name(&self) -> &'static str {
    self.name
  }

  fn store(&self, key: &str, data: &Value) -> Result<()> {
    let text = serde_json::to_string(data).map_err(|e| CacheError::parse(key, e))?;
    self.store.set_item(key, &text)
  }

  fn load(&self, key: &str) -> Result<Option<Value>> {
    match self.store.get_item(key)? {
      Some(text) => Ok(Some(
        serde_json::from_str(&text).map_err(|e| CacheError::parse(key, e))?,
      )),
      None => Ok(None),
    }
  }
}

/// Try `op` against each tier in order and return the first success.
///
/// On exhaustion the error list names every tier with its failure.
pub fn first_success<T, F>(
  tiers: &[Box<dyn StorageTier>],
  mut op: F,
) -> std::result::Result<(T, &'static str), Vec<String>>
where
  F: FnMut(&dyn StorageTier) -> Result<T>,
{
  let mut causes = Vec::new();
  for tier in tiers {
    match op(tier.as_ref()) {
      Ok(value) => return Ok((value, tier.name())),
      Err(e) => {
        warn!(tier = tier.name(), "Storage tier failed: {}", e);
        causes.push(format!("{}: {}", tier.name(), e));
      }
    }
  }
  Err(causes)
}

/// Cascading store over an ordered list of tiers.
pub struct FallbackStore {
  tiers: Vec<Box<dyn StorageTier>>,
}

impl FallbackStore {
  pub fn new(tiers: Vec<Box<dyn StorageTier>>) -> Self {
    Self { tiers }
  }

  /// The standard cascade: persistent store, then local, then session.
  pub fn standard(
    persistent: Arc<dyn PersistentStore>,
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
  ) -> Self {
    Self::new(vec![
      Box::new(PersistentTier(persistent)),
      Box::new(KvTier::new("local", local)),
      Box::new(KvTier::new("session", session)),
    ])
  }

  pub fn store_with_fallback(&self, key: &str, data: &Value) -> Result<()> {
    match first_success(&self.tiers, |tier| tier.store(key, data)) {
      Ok(((), tier)) => {
        debug!(key, tier, "Data stored");
        Ok(())
      }
      Err(causes) => {
        error!(key, "All storage methods failed");
        Err(CacheError::AllStorageFailed {
          key: key.to_string(),
          causes,
        })
      }
    }
  }

  /// Read through the tiers; a failing tier counts as "nothing here".
  ///
  /// Returns `Ok(None)` once every tier has been consulted without data, and
  /// `AllStorageFailed` only when no tier could answer at all.
  pub fn get_with_fallback(&self, key: &str) -> Result<Option<Value>> {
    let mut causes = Vec::new();
    let mut answered = false;

    for tier in &self.tiers {
      match tier.load(key) {
        Ok(Some(value)) => return Ok(Some(value)),
        Ok(None) => {
          answered = true;
          debug!(key, tier = tier.name(), "No data in tier");
        }
        Err(e) => {
          warn!(key, tier = tier.name(), "Storage tier failed: {}", e);
          causes.push(format!("{}: {}", tier.name(), e));
        }
      }
    }

    if answered || self.tiers.is_empty() {
      Ok(None)
    } else {
      Err(CacheError::AllStorageFailed {
        key: key.to_string(),
        causes,
      })
    }
  }
}
