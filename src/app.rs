//! Wires the cache engine together for the command line.

use chrono::{DateTime, Local};
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{
  AgentHandle, AgentRegistry, AssetCaches, ControlMessage, InterceptPolicy, Intercepted,
  SqliteAssetCaches, SyncAgent,
};
use crate::cache::{
  get_file_version, get_last_refresh_date, FallbackStore, FileKvStore, KeyValueStore, LogEntry,
  MemoryKvStore, PersistentStore, SqliteStore, UnavailableStore,
};
use crate::config::Config;
use crate::lifecycle::{LifecycleController, LogReloader};
use crate::origin::{HttpOrigin, Origin};
use crate::refresh::{ProgressChannel, RefreshOrchestrator, RefreshOutcome};
use crate::state::{AppState, SharedState};

/// Cache freshness at a glance.
#[derive(Debug)]
pub struct Status {
  pub last_refresh: Option<DateTime<Local>>,
  /// Manifest files with their stored version tag
  pub versions: Vec<(String, Option<String>)>,
  pub agent_caches: Vec<String>,
  pub log_entries: usize,
  pub state: AppState,
}

/// Main application
pub struct App {
  config: Config,
  store: Arc<dyn PersistentStore>,
  local: Arc<dyn KeyValueStore>,
  session: Arc<dyn KeyValueStore>,
  fallback: FallbackStore,
  origin: Arc<dyn Origin>,
  asset_caches: Arc<dyn AssetCaches>,
  state: SharedState,
  orchestrator: RefreshOrchestrator,
  registry: AgentRegistry,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let data_dir = config.data_dir();

    // A store that cannot open still lets the key-value tiers work
    let store: Arc<dyn PersistentStore> = match SqliteStore::open(&data_dir) {
      Ok(store) => Arc::new(store),
      Err(e) => {
        warn!("Persistent store unavailable, falling back: {}", e);
        Arc::new(UnavailableStore::new(e.to_string()))
      }
    };
    let local: Arc<dyn KeyValueStore> = Arc::new(FileKvStore::in_dir(&data_dir));
    let session: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let fallback = FallbackStore::standard(store.clone(), local.clone(), session.clone());

    let state = SharedState::new(AppState::load(
      &config.reserved_state_key,
      local.as_ref(),
      session.as_ref(),
    ));

    let origin: Arc<dyn Origin> = Arc::new(HttpOrigin::new(&config.origin.base_url)?);
    let asset_caches: Arc<dyn AssetCaches> = match SqliteAssetCaches::open_in(&data_dir) {
      Ok(caches) => Arc::new(caches),
      Err(e) => {
        warn!("Asset caches unavailable, keeping them in memory: {}", e);
        Arc::new(SqliteAssetCaches::open_in_memory()?)
      }
    };

    let orchestrator =
      RefreshOrchestrator::new(store.clone(), origin.clone(), config.manifest.clone())
        .with_hooks(Arc::new(state.clone()))
        .with_bonus_file(config.bonus_file.clone());

    Ok(Self {
      config,
      store,
      local,
      session,
      fallback,
      origin,
      asset_caches,
      state,
      orchestrator,
      registry: AgentRegistry::new(),
    })
  }

  pub fn progress(&self) -> &ProgressChannel {
    self.orchestrator.progress()
  }

  /// Run a refresh cycle: daily check, or unconditional with `force`.
  pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome> {
    let outcome = if force {
      self.orchestrator.update_cache().await?
    } else {
      self.orchestrator.check_and_refresh().await?
    };
    self.save_state();
    Ok(outcome)
  }

  pub fn get(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.fallback.get_with_fallback(key)?)
  }

  pub async fn clear(&mut self, json_only: bool) -> Result<()> {
    if json_only {
      self.lifecycle(None).clear_json_cache()?;
      return Ok(());
    }
    let agent = self.agent().await;
    self.lifecycle(agent).clear_cache().await?;
    Ok(())
  }

  pub fn logs(&self) -> Result<Vec<LogEntry>> {
    Ok(self.store.logs()?)
  }

  pub fn delete_logs(&self, ids: &[i64]) -> Result<()> {
    self.store.delete_logs(ids)?;
    info!(?ids, "Deleted log entries");
    Ok(())
  }

  /// Pre-warm historical audio and the extra assets.
  ///
  /// Returns the number of audio files requested and extra assets stored.
  pub async fn warm_media(&mut self) -> Result<(usize, usize)> {
    let agent = self.agent().await;
    let lifecycle = self.lifecycle(agent.clone());

    let mut events = agent.as_ref().map(AgentHandle::subscribe);
    let requested = lifecycle.cache_audio_files_up_to_last_refresh().await?;
    if requested > 0 {
      if let Some(events) = events.as_mut() {
        while let Ok(message) = events.recv().await {
          lifecycle.handle_agent_event(&message);
          if message == ControlMessage::CacheAudioFilesComplete {
            break;
          }
        }
      }
    }

    let assets = lifecycle.cache_additional_assets().await?;
    Ok((requested, assets))
  }

  /// Fetch a URL through the agent's interception policy.
  pub async fn fetch(&mut self, url: &str) -> Result<Intercepted> {
    let Some(agent) = self.agent().await else {
      return Err(color_eyre::eyre::eyre!("No active agent to route {} through", url));
    };
    Ok(agent.fetch(url).await?)
  }

  pub fn status(&self) -> Result<Status> {
    let store = self.store.as_ref();
    let versions = self
      .config
      .manifest
      .iter()
      .map(|file| Ok((file.clone(), get_file_version(store, file)?)))
      .collect::<Result<Vec<_>>>()?;

    Ok(Status {
      last_refresh: get_last_refresh_date(store)?,
      versions,
      agent_caches: self.asset_caches.keys()?,
      log_entries: store.logs()?.len(),
      state: self.state.snapshot(),
    })
  }

  /// The controlling agent.
  ///
  /// A generation already on disk under the configured name is resumed
  /// without touching the network; otherwise a new one is installed.
  async fn agent(&mut self) -> Option<AgentHandle> {
    if let Some(handle) = self.registry.controller() {
      return Some(handle.clone());
    }

    let agent_config = &self.config.agent;
    let agent = SyncAgent::new(
      agent_config.cache_version.clone(),
      agent_config.static_assets.clone(),
      InterceptPolicy::new(
        agent_config.network_first_paths.clone(),
        agent_config.denylist.clone(),
      ),
      self.asset_caches.clone(),
      self.origin.clone(),
    );

    let installed = match self.asset_caches.keys() {
      Ok(names) => names.contains(&agent_config.cache_version),
      Err(e) => {
        warn!("Could not list asset caches: {}", e);
        false
      }
    };
    if installed {
      return Some(self.registry.resume(agent).await);
    }

    match self.registry.register(agent).await {
      Ok(handle) => Some(handle),
      Err(e) => {
        warn!("Agent unavailable: {}", e);
        None
      }
    }
  }

  fn lifecycle(&self, agent: Option<AgentHandle>) -> LifecycleController {
    let controller = LifecycleController::new(
      self.store.clone(),
      self.local.clone(),
      self.session.clone(),
      Arc::new(LogReloader),
    )
    .with_reserved_key(self.config.reserved_state_key.clone())
    .with_audio((&self.config.audio).into())
    .with_asset_caches(self.asset_caches.clone())
    .with_additional_assets(self.origin.clone(), self.config.additional_assets.clone());

    match agent {
      Some(agent) => controller.with_agent(agent),
      None => controller,
    }
  }

  fn save_state(&self) {
    if let Err(e) = self.state.snapshot().save(
      &self.config.reserved_state_key,
      self.local.as_ref(),
      self.session.as_ref(),
    ) {
      warn!("Failed to save state: {}", e);
    }
  }
}
