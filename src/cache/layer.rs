//! Version-aware fetcher that sits between the refresh cycle and the origin.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::meta::{get_file_version, version_key};
use super::traits::{PersistentStore, StoreWrite, Table};
use crate::error::{CacheError, Result};
use crate::origin::{FetchRequest, Origin};

/// Relative path content files are served under.
pub const CONTENT_PREFIX: &str = "json/";

/// What a single `fetch_and_store` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Origin sent a new body; tag (if any) and content were written.
  Updated { etag: Option<String> },
  /// Origin answered 304; nothing was written.
  NotModified,
}

/// Fetches content files conditionally and persists changes.
///
/// The stored version tag is sent as `If-None-Match`, so unchanged files
/// cost one request and zero writes.
#[derive(Clone)]
pub struct VersionedFetcher {
  store: Arc<dyn PersistentStore>,
  origin: Arc<dyn Origin>,
}

impl VersionedFetcher {
  pub fn new(store: Arc<dyn PersistentStore>, origin: Arc<dyn Origin>) -> Self {
    Self { store, origin }
  }

  /// Fetch `json/<file_key>` and store it if it changed.
  ///
  /// 1. Read the stored version tag (may be absent)
  /// 2. Issue a conditional request with that tag
  /// 3. On 200, write the new tag then the content in one transaction
  /// 4. On 304, write nothing
  /// 5. Anything else is a `NetworkFailure` and leaves the entry untouched
  pub async fn fetch_and_store(&self, file_key: &str) -> Result<FetchOutcome> {
    let stored_etag = get_file_version(self.store.as_ref(), file_key)?;
    let path = format!("{}{}", CONTENT_PREFIX, file_key);
    let request = FetchRequest::conditional(&path, stored_etag);

    let response = self.origin.fetch(&request).await?;

    if response.is_not_modified() {
      debug!(file_key, "Unchanged (304). Using cached version.");
      return Ok(FetchOutcome::NotModified);
    }

    if response.status != 200 {
      warn!(file_key, status = response.status, "Failed to fetch {}", path);
      return Err(CacheError::NetworkFailure(format!(
        "Failed to fetch {}: {}",
        path, response.status
      )));
    }

    let data: Value =
      serde_json::from_slice(&response.body).map_err(|e| CacheError::parse(path.clone(), e))?;

    // Tag strictly before content; both commit or neither does
    let mut writes = Vec::with_capacity(2);
    if let Some(etag) = &response.etag {
      writes.push(StoreWrite::new(
        Table::Meta,
        version_key(file_key),
        Value::String(etag.clone()),
      ));
    }
    writes.push(StoreWrite::new(Table::Content, file_key, data));
    self.store.put_batch(&writes)?;

    info!(file_key, etag = ?response.etag, "Updated from the server");
    Ok(FetchOutcome::Updated {
      etag: response.etag,
    })
  }

  /// Cached content for a file, if any.
  pub fn cached(&self, file_key: &str) -> Result<Option<Value>> {
    self.store.get(Table::Content, file_key)
  }
}
