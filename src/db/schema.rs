//! Schema for the persistent content store.
//!
//! Migrations only ever add tables. Bumping `SCHEMA_VERSION` must never drop
//! anything an older version created.

pub const STORE_NAME: &str = "tapestry.db";

pub const SCHEMA_VERSION: i64 = 4;

pub const SCHEMA: &str = r#"
-- Content entries keyed by manifest file name
CREATE TABLE IF NOT EXISTS poems (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

-- Per-file version tags ("version-<file>") and the last refresh date
CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

-- Append-only diagnostic trail
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
