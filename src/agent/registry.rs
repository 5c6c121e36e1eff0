use tracing::{info, warn};

use super::worker::{AgentHandle, SyncAgent};
use crate::error::Result;

/// Tracks which agent generation controls pages.
///
/// A new generation skips waiting: once installed it replaces the previous
/// controller immediately. A failed install leaves the current controller
/// in place.
#[derive(Default)]
pub struct AgentRegistry {
  controller: Option<AgentHandle>,
}

impl AgentRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn controller(&self) -> Option<&AgentHandle> {
    self.controller.as_ref()
  }

  pub async fn register(&mut self, agent: SyncAgent) -> Result<AgentHandle> {
    let handle = agent.spawn();

    if let Err(e) = handle.install().await {
      warn!(cache = handle.cache_name(), "Agent install failed: {}", e);
      handle.retire().await;
      return Err(e);
    }

    self.retire_controller(&handle).await;
    handle.activate().await?;
    self.controller = Some(handle.clone());
    Ok(handle)
  }

  /// Put a generation that is already installed back in control.
  ///
  /// Nothing is fetched and no other cache is collected, so this works
  /// offline and keeps caches written by earlier runs.
  pub async fn resume(&mut self, agent: SyncAgent) -> AgentHandle {
    agent.claim();
    let handle = agent.spawn();
    self.retire_controller(&handle).await;
    self.controller = Some(handle.clone());
    handle
  }

  async fn retire_controller(&mut self, next: &AgentHandle) {
    if let Some(previous) = self.controller.take() {
      info!(
        from = previous.cache_name(),
        to = next.cache_name(),
        "Replacing controlling agent"
      );
      previous.retire().await;
    }
  }
}
