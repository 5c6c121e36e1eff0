//! Cache invalidation and agent coordination.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::{AgentHandle, AgentState, AssetCaches, ControlMessage};
use crate::audio::{generate_audio_file_list, DEFAULT_AUDIO_DIR};
use crate::cache::{get_last_refresh_date, KeyValueStore, PersistentStore, Table};
use crate::error::Result;
use crate::origin::{FetchRequest, Origin};
use crate::state::DEFAULT_STATE_KEY;

pub const DYNAMIC_CACHE: &str = "dynamic-cache";

/// Restarts whatever surface shows cached content.
pub trait Reloader: Send + Sync {
  fn reload(&self);
}

/// Reloader for headless runs: records the request in the log.
#[derive(Debug, Default)]
pub struct LogReloader;

impl Reloader for LogReloader {
  fn reload(&self) {
    info!("Reload requested");
  }
}

/// Where historical audio lives and the first day it exists.
#[derive(Debug, Clone)]
pub struct AudioSettings {
  pub start_date: NaiveDate,
  pub dir: String,
}

impl Default for AudioSettings {
  fn default() -> Self {
    Self {
      start_date: NaiveDate::from_ymd_opt(2024, 10, 24).unwrap_or_default(),
      dir: DEFAULT_AUDIO_DIR.to_string(),
    }
  }
}

/// Best-effort extra assets cached outside the agent's install manifest.
struct AdditionalAssets {
  origin: Arc<dyn Origin>,
  assets: Vec<String>,
}

pub struct LifecycleController {
  store: Arc<dyn PersistentStore>,
  local: Arc<dyn KeyValueStore>,
  session: Arc<dyn KeyValueStore>,
  reloader: Arc<dyn Reloader>,
  agent: Option<AgentHandle>,
  reserved_key: String,
  audio: AudioSettings,
  caches: Option<Arc<dyn AssetCaches>>,
  additional: Option<AdditionalAssets>,
}

impl LifecycleController {
  pub fn new(
    store: Arc<dyn PersistentStore>,
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    reloader: Arc<dyn Reloader>,
  ) -> Self {
    Self {
      store,
      local,
      session,
      reloader,
      agent: None,
      reserved_key: DEFAULT_STATE_KEY.to_string(),
      audio: AudioSettings::default(),
      caches: None,
      additional: None,
    }
  }

  pub fn with_agent(mut self, agent: AgentHandle) -> Self {
    self.agent = Some(agent);
    self
  }

  pub fn with_reserved_key(mut self, key: impl Into<String>) -> Self {
    self.reserved_key = key.into();
    self
  }

  pub fn with_audio(mut self, audio: AudioSettings) -> Self {
    self.audio = audio;
    self
  }

  /// Asset caches to wipe directly when no agent can do it.
  pub fn with_asset_caches(mut self, caches: Arc<dyn AssetCaches>) -> Self {
    self.caches = Some(caches);
    self
  }

  /// Extra assets for `cache_additional_assets`; needs `with_asset_caches`.
  pub fn with_additional_assets(mut self, origin: Arc<dyn Origin>, assets: Vec<String>) -> Self {
    self.additional = Some(AdditionalAssets { origin, assets });
    self
  }

  /// The agent controlling this surface, if it is still running.
  fn controller(&self) -> Option<&AgentHandle> {
    self
      .agent
      .as_ref()
      .filter(|agent| agent.state() != AgentState::Redundant)
  }

  /// Wipe content, version tags and non-reserved key-value entries, then
  /// have the agent drop its caches and reload once it confirms.
  pub async fn clear_cache(&self) -> Result<()> {
    self.store.clear(&[Table::Content, Table::Meta])?;
    self.local.clear_except(&self.reserved_key)?;
    self.session.clear_except(&self.reserved_key)?;
    info!("Cleared content, version tags and key-value storage");

    let Some(agent) = self.controller() else {
      self.clear_asset_caches()?;
      self.reloader.reload();
      return Ok(());
    };

    match agent.request(ControlMessage::ClearCaches).await {
      Ok(ControlMessage::CachesCleared) => {
        info!("Agent caches cleared, reloading");
        self.reloader.reload();
      }
      Ok(other) => warn!(?other, "Unexpected reply to clearCaches"),
      Err(e) => {
        warn!("Agent did not answer clearCaches: {}", e);
        self.clear_asset_caches()?;
        self.reloader.reload();
      }
    }
    Ok(())
  }

  /// Delete every asset cache without going through an agent.
  fn clear_asset_caches(&self) -> Result<()> {
    let Some(caches) = &self.caches else {
      return Ok(());
    };
    for name in caches.keys()? {
      caches.delete(&name)?;
    }
    info!("Asset caches cleared directly");
    Ok(())
  }

  /// Drop cached content only; version tags and media caches stay.
  pub fn clear_json_cache(&self) -> Result<()> {
    self.store.clear(&[Table::Content])?;
    info!("Cleared cached content, left version tags and media alone");
    Ok(())
  }

  /// Ask the agent to pre-warm every audio file up to the last refresh day.
  ///
  /// Returns how many files were requested; zero when there is no agent or
  /// no refresh has completed yet.
  pub async fn cache_audio_files_up_to_last_refresh(&self) -> Result<usize> {
    let Some(agent) = self.controller() else {
      warn!("No active agent, skipping audio caching");
      return Ok(0);
    };
    let Some(last) = get_last_refresh_date(self.store.as_ref())? else {
      warn!("No last refresh date found");
      return Ok(0);
    };

    let files = generate_audio_file_list(&self.audio.dir, self.audio.start_date, last.date_naive());
    info!(count = files.len(), up_to = %last.date_naive(), "Caching audio files");
    let count = files.len();
    agent.post_message(ControlMessage::CacheAudioFiles { files }).await?;
    Ok(count)
  }

  /// Cache the configured extra assets into the dynamic cache.
  ///
  /// Individual failures are skipped. Returns how many assets were stored.
  pub async fn cache_additional_assets(&self) -> Result<usize> {
    let (Some(caches), Some(additional)) = (&self.caches, &self.additional) else {
      return Ok(0);
    };
    caches.open(DYNAMIC_CACHE)?;

    let mut stored = 0;
    for asset in &additional.assets {
      let url = match additional.origin.resolve(asset) {
        Ok(url) => url.to_string(),
        Err(e) => {
          warn!(%asset, "Could not cache asset: {}", e);
          continue;
        }
      };
      match additional.origin.fetch(&FetchRequest::get(url.clone())).await {
        Ok(response) if response.is_ok() => {
          match caches.put(DYNAMIC_CACHE, &url, &response) {
            Ok(()) => {
              debug!(%asset, "Cached asset");
              stored += 1;
            }
            Err(e) => warn!(%asset, "Could not cache asset: {}", e),
          }
        }
        Ok(response) => warn!(%asset, status = response.status, "Could not cache asset"),
        Err(e) => warn!(%asset, "Could not cache asset: {}", e),
      }
    }
    Ok(stored)
  }

  /// React to a message the agent broadcast.
  pub fn handle_agent_event(&self, message: &ControlMessage) {
    match message {
      ControlMessage::CacheAudioFilesComplete => info!("Audio files caching complete"),
      ControlMessage::CachesCleared => {
        info!("Caches have been cleared");
        self.reloader.reload();
      }
      _ => {}
    }
  }
}
