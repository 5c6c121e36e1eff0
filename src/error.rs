//! Error taxonomy shared by the store, fetcher, agent and controller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
  /// Storage was denied or never initialized. Every store operation short-circuits with this.
  #[error("Persistent store unavailable: {0}")]
  StoreUnavailable(String),

  /// A query against an otherwise available store failed.
  #[error("Storage error: {0}")]
  Storage(String),

  #[error("Network failure: {0}")]
  NetworkFailure(String),

  #[error("Failed to parse {what}: {reason}")]
  ParseFailure { what: String, reason: String },

  #[error("All storage methods failed for key {key}: {}", causes.join("; "))]
  AllStorageFailed { key: String, causes: Vec<String> },

  #[error("Agent install failed: {0}")]
  InstallFailed(String),

  #[error("Background sync agent is not running")]
  AgentUnavailable,
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
  pub fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
    CacheError::ParseFailure {
      what: what.into(),
      reason: reason.to_string(),
    }
  }

  /// Parse failures of a fetched body count as network failures for refresh accounting.
  pub fn is_network(&self) -> bool {
    matches!(
      self,
      CacheError::NetworkFailure(_) | CacheError::ParseFailure { .. }
    )
  }
}

impl From<rusqlite::Error> for CacheError {
  fn from(e: rusqlite::Error) -> Self {
    CacheError::Storage(e.to_string())
  }
}

impl From<reqwest::Error> for CacheError {
  fn from(e: reqwest::Error) -> Self {
    CacheError::NetworkFailure(e.to_string())
  }
}
