//! Named, URL-addressed response caches owned by the sync agent.
//!
//! Kept in their own database file so they stay invisible to the
//! persistent content store.

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::origin::FetchResponse;

pub const ASSET_STORE_NAME: &str = "agent_caches.db";

/// Trait for asset cache backends.
pub trait AssetCaches: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of all caches, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a cache and everything in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Store one response, creating the cache if needed.
  fn put(&self, name: &str, url: &str, response: &FetchResponse) -> Result<()>;

  /// Store a set of responses in one transaction: all or none.
  fn put_all(&self, name: &str, entries: &[(String, FetchResponse)]) -> Result<()>;

  /// Look up a URL in one cache.
  fn match_in(&self, name: &str, url: &str) -> Result<Option<FetchResponse>>;

  /// Look up a URL across all caches, oldest cache first.
  fn match_any(&self, url: &str) -> Result<Option<FetchResponse>>;

  /// URLs stored in one cache.
  fn urls(&self, name: &str) -> Result<Vec<String>>;
}

const ASSET_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    etag TEXT,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url_hash)
);
"#;

/// Stable, fixed-length key for a URL.
pub fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

/// SQLite-based asset caches.
pub struct SqliteAssetCaches {
  conn: Mutex<Connection>,
}

impl SqliteAssetCaches {
  pub fn open_in(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir)
      .map_err(|e| CacheError::Storage(format!("Failed to create {}: {}", data_dir.display(), e)))?;
    let conn = Connection::open(data_dir.join(ASSET_STORE_NAME))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(ASSET_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }
}

fn ensure_cache(conn: &Connection, name: &str) -> Result<()> {
  // rowid keeps creation order stable within the same second
  conn.execute(
    "INSERT OR IGNORE INTO caches (name) VALUES (?)",
    params![name],
  )?;
  Ok(())
}

fn insert_entry(conn: &Connection, name: &str, url: &str, response: &FetchResponse) -> Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries
       (cache_name, url_hash, url, status, etag, content_type, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      name,
      url_hash(url),
      url,
      response.status,
      response.etag,
      response.content_type,
      response.body
    ],
  )?;
  Ok(())
}

fn row_to_response(row: &rusqlite::Row<'_>) -> rusqlite::Result<FetchResponse> {
  Ok(FetchResponse {
    status: row.get(0)?,
    etag: row.get(1)?,
    content_type: row.get(2)?,
    body: row.get(3)?,
  })
}

impl AssetCaches for SqliteAssetCaches {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_cache(&conn, name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY rowid")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])?;
    let removed = tx.execute("DELETE FROM caches WHERE name = ?", params![name])?;
    tx.commit()?;
    if removed > 0 {
      debug!(cache = name, "Deleted cache");
    }
    Ok(removed > 0)
  }

  fn put(&self, name: &str, url: &str, response: &FetchResponse) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    ensure_cache(&tx, name)?;
    insert_entry(&tx, name, url, response)?;
    tx.commit()?;
    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(String, FetchResponse)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    ensure_cache(&tx, name)?;
    for (url, response) in entries {
      insert_entry(&tx, name, url, response)?;
    }
    tx.commit()?;
    debug!(cache = name, count = entries.len(), "Cached entries");
    Ok(())
  }

  fn match_in(&self, name: &str, url: &str) -> Result<Option<FetchResponse>> {
    let conn = self.lock()?;
    Ok(
      conn
        .query_row(
          "SELECT status, etag, content_type, body FROM cache_entries
           WHERE cache_name = ? AND url_hash = ?",
          params![name, url_hash(url)],
          row_to_response,
        )
        .optional()?,
    )
  }

  fn match_any(&self, url: &str) -> Result<Option<FetchResponse>> {
    let conn = self.lock()?;
    Ok(
      conn
        .query_row(
          "SELECT e.status, e.etag, e.content_type, e.body FROM cache_entries e
           INNER JOIN caches c ON c.name = e.cache_name
           WHERE e.url_hash = ?
           ORDER BY c.rowid
           LIMIT 1",
          params![url_hash(url)],
          row_to_response,
        )
        .optional()?,
    )
  }

  fn urls(&self, name: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY url")?;
    let urls = stmt
      .query_map(params![name], |row| row.get(0))?
      .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(urls)
  }
}
