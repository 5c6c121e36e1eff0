//! Persistent content cache.
//!
//! - A SQLite-backed store with content, metadata and log tables
//! - Typed accessors for version tags and the last refresh date
//! - A fallback cascade onto plain key-value storage
//! - A version-aware fetcher that only re-downloads changed files

mod fallback;
mod layer;
mod meta;
mod storage;
mod traits;

pub use fallback::{
  first_success, FallbackStore, FileKvStore, KeyValueStore, KvTier, MemoryKvStore, PersistentTier,
  StorageTier,
};
pub use layer::{FetchOutcome, VersionedFetcher};
pub use meta::{
  get_file_version, get_last_refresh_date, set_file_version, set_last_refresh_date, version_key,
  LAST_REFRESH_KEY,
};
pub use storage::SqliteStore;
pub use traits::{CacheSource, LogEntry, PersistentStore, StoreWrite, Table, UnavailableStore};

#[cfg(test)]
pub(crate) mod testing;
