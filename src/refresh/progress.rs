//! Progress notifications for refresh cycles.
//!
//! Any number of observers can subscribe, independent of which caller
//! started the refresh.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const PROGRESS_CHANNEL: &str = "cache-progress";

/// Wire shape: `{"type":"progress","percent":33}` and `{"type":"complete"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
  Progress { percent: u8 },
  Complete,
}

/// `round(done / total * 100)`, clamped to 0..=100.
pub fn percent(done: usize, total: usize) -> u8 {
  if total == 0 {
    return 100;
  }
  let ratio = done.min(total) as f64 / total as f64;
  (ratio * 100.0).round() as u8
}

/// Named broadcast channel for progress events
#[derive(Clone)]
pub struct ProgressChannel {
  name: &'static str,
  tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressChannel {
  pub fn new() -> Self {
    Self::with_capacity(64)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity);
    Self {
      name: PROGRESS_CHANNEL,
      tx,
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
    self.tx.subscribe()
  }

  /// Post an event; having no listeners is fine.
  pub fn emit(&self, event: ProgressEvent) {
    let _ = self.tx.send(event);
  }
}

impl Default for ProgressChannel {
  fn default() -> Self {
    Self::new()
  }
}
