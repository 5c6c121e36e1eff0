//! Typed accessors for the metadata table: version tags and the last refresh date.

use chrono::{DateTime, Local};
use serde_json::Value;
use tracing::{debug, info};

use super::traits::{PersistentStore, Table};
use crate::error::{CacheError, Result};

pub const LAST_REFRESH_KEY: &str = "lastCacheDate";

/// Metadata key holding the version tag of a content file.
pub fn version_key(file_key: &str) -> String {
  format!("version-{}", file_key)
}

pub fn get_file_version(store: &dyn PersistentStore, file_key: &str) -> Result<Option<String>> {
  let value = store.get(Table::Meta, &version_key(file_key))?;
  Ok(value.and_then(|v| v.as_str().map(String::from)))
}

pub fn set_file_version(store: &dyn PersistentStore, file_key: &str, tag: &str) -> Result<()> {
  store.put(
    Table::Meta,
    &version_key(file_key),
    &Value::String(tag.to_string()),
  )?;
  debug!(file_key, tag, "File version stored");
  Ok(())
}

pub fn get_last_refresh_date(store: &dyn PersistentStore) -> Result<Option<DateTime<Local>>> {
  let Some(value) = store.get(Table::Meta, LAST_REFRESH_KEY)? else {
    return Ok(None);
  };

  let raw = value
    .as_str()
    .ok_or_else(|| CacheError::parse(LAST_REFRESH_KEY, "not a string"))?;

  let date = DateTime::parse_from_rfc3339(raw)
    .map_err(|e| CacheError::parse(LAST_REFRESH_KEY, e))?
    .with_timezone(&Local);

  Ok(Some(date))
}

/// Record a completed refresh cycle.
///
/// The stored date never moves backwards: if a later date is already
/// recorded (clock skew, concurrent writer) it is kept.
pub fn set_last_refresh_date(store: &dyn PersistentStore, date: DateTime<Local>) -> Result<()> {
  if let Some(existing) = get_last_refresh_date(store)? {
    if existing > date {
      debug!(%existing, %date, "Keeping later refresh date");
      return Ok(());
    }
  }

  store.put(
    Table::Meta,
    LAST_REFRESH_KEY,
    &Value::String(date.to_rfc3339()),
  )?;
  info!(date = %date.to_rfc3339(), "Last cache date set");
  Ok(())
}
