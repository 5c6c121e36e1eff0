//! Offline content cache with a once-a-day versioned refresh and a
//! background agent that serves requests from named asset caches.

pub mod agent;
pub mod app;
pub mod audio;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod origin;
pub mod refresh;
pub mod state;

pub use error::{CacheError, Result};
