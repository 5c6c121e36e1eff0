//! The background sync agent: install/activate lifecycle, request
//! interception and the control message protocol.
//!
//! The agent runs as its own task. Pages only reach it through an
//! `AgentHandle`, never through shared state.

use futures::future::try_join_all;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::assets::AssetCaches;
use super::protocol::{AgentRequest, ControlMessage, Intercepted};
use crate::cache::CacheSource;
use crate::error::{CacheError, Result};
use crate::origin::{FetchRequest, FetchResponse, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  Installing,
  /// Installed, not yet controlling pages
  Waiting,
  Active,
  /// Failed to install, or superseded by a newer agent
  Redundant,
}

/// Which requests go network-first and which responses must not be stored.
#[derive(Debug, Clone, Default)]
pub struct InterceptPolicy {
  pub network_first: Vec<String>,
  pub denylist: Vec<String>,
}

impl InterceptPolicy {
  pub fn new(network_first: Vec<String>, denylist: Vec<String>) -> Self {
    Self {
      network_first,
      denylist,
    }
  }

  pub fn is_network_first(&self, path: &str) -> bool {
    self.network_first.iter().any(|p| p == path)
  }

  pub fn should_cache(&self, path: &str) -> bool {
    !self.denylist.iter().any(|p| p == path)
  }
}

/// One generation of the background sync agent.
#[derive(Clone)]
pub struct SyncAgent {
  cache_name: String,
  static_assets: Vec<String>,
  policy: InterceptPolicy,
  caches: Arc<dyn AssetCaches>,
  origin: Arc<dyn Origin>,
  state: Arc<Mutex<AgentState>>,
  events: broadcast::Sender<ControlMessage>,
}

impl SyncAgent {
  pub fn new(
    cache_name: impl Into<String>,
    static_assets: Vec<String>,
    policy: InterceptPolicy,
    caches: Arc<dyn AssetCaches>,
    origin: Arc<dyn Origin>,
  ) -> Self {
    let (events, _) = broadcast::channel(32);
    Self {
      cache_name: cache_name.into(),
      static_assets,
      policy,
      caches,
      origin,
      state: Arc::new(Mutex::new(AgentState::Installing)),
      events,
    }
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn state(&self) -> AgentState {
    read_state(&self.state)
  }

  fn set_state(&self, next: AgentState) {
    if let Ok(mut state) = self.state.lock() {
      *state = next;
    }
  }

  /// Seed this generation's cache with every static asset.
  ///
  /// All assets are fetched before anything is written; one failure fails
  /// the whole install and leaves no cache behind.
  pub async fn install(&self) -> Result<()> {
    info!(cache = %self.cache_name, "Install event");
    self.set_state(AgentState::Installing);

    match self.fetch_static_assets().await {
      Ok(entries) => {
        if let Err(e) = self.caches.put_all(&self.cache_name, &entries) {
          self.set_state(AgentState::Redundant);
          return Err(CacheError::InstallFailed(e.to_string()));
        }
        info!(count = entries.len(), "Cached all static assets");
        self.set_state(AgentState::Waiting);
        Ok(())
      }
      Err(e) => {
        error!("Failed to cache static assets: {}", e);
        self.set_state(AgentState::Redundant);
        Err(e)
      }
    }
  }

  async fn fetch_static_assets(&self) -> Result<Vec<(String, FetchResponse)>> {
    let fetches = self.static_assets.iter().map(|asset| async move {
      let url = self.origin.resolve(asset)?.to_string();
      let response = self
        .origin
        .fetch(&FetchRequest::get(url.clone()))
        .await
        .map_err(|e| CacheError::InstallFailed(format!("{}: {}", asset, e)))?;
      if !response.is_ok() {
        return Err(CacheError::InstallFailed(format!(
          "{}: status {}",
          asset, response.status
        )));
      }
      Ok((url, response))
    });
    try_join_all(fetches).await
  }

  /// Delete every cache from other generations and take control.
  ///
  /// Returns the names of the deleted caches.
  pub fn activate(&self) -> Result<Vec<String>> {
    info!(cache = %self.cache_name, "Activate event");
    let mut deleted = Vec::new();
    for name in self.caches.keys()? {
      if name != self.cache_name {
        info!(cache = %name, "Deleting old cache");
        self.caches.delete(&name)?;
        deleted.push(name);
      }
    }
    self.set_state(AgentState::Active);
    Ok(deleted)
  }

  /// Take control over an already installed generation.
  ///
  /// Install and garbage collection ran when the generation was created;
  /// other caches present now are left alone.
  pub fn claim(&self) {
    info!(cache = %self.cache_name, "Resuming installed generation");
    self.set_state(AgentState::Active);
  }

  /// Answer a request according to the interception policy.
  ///
  /// Network-first paths go to the network and refresh the cache, falling
  /// back to the cache when offline. Everything else is cache-first, with
  /// misses fetched and stored unless denylisted.
  pub async fn intercept(&self, url: &str) -> Result<Intercepted> {
    let resolved = self.origin.resolve(url)?;
    let path = resolved.path().to_string();
    let key = resolved.to_string();

    if self.policy.is_network_first(&path) {
      return match self.origin.fetch(&FetchRequest::get(key.clone())).await {
        Ok(response) => {
          if response.is_ok() {
            self.store(&key, &response);
          }
          Ok(Intercepted {
            response,
            source: CacheSource::Network,
          })
        }
        Err(e) => match self.caches.match_in(&self.cache_name, &key)? {
          Some(response) => {
            debug!(%key, "Network failed, serving cached copy");
            Ok(Intercepted {
              response,
              source: CacheSource::Offline,
            })
          }
          None => Err(e),
        },
      };
    }

    if let Some(response) = self.caches.match_any(&key)? {
      return Ok(Intercepted {
        response,
        source: CacheSource::Cache,
      });
    }

    let response = self
      .origin
      .fetch(&FetchRequest::get(key.clone()))
      .await
      .map_err(|e| {
        error!(%key, "Fetch failed: {}", e);
        e
      })?;

    if response.is_ok() && self.policy.should_cache(&path) {
      self.store(&key, &response);
    }

    Ok(Intercepted {
      response,
      source: CacheSource::Network,
    })
  }

  /// Opportunistic write; a failure only costs a future cache hit.
  fn store(&self, key: &str, response: &FetchResponse) {
    if let Err(e) = self.caches.put(&self.cache_name, key, response) {
      warn!(%key, "Failed to cache response: {}", e);
    }
  }

  /// Delete every cache, this generation's included.
  pub fn clear_caches(&self) -> Result<()> {
    for name in self.caches.keys()? {
      self.caches.delete(&name)?;
    }
    info!("All caches cleared");
    Ok(())
  }

  /// Fetch and store each file independently, then announce completion.
  ///
  /// Returns how many files were stored.
  pub async fn cache_audio_files(&self, files: &[String]) -> usize {
    let mut stored = 0;
    for file in files {
      let url = match self.origin.resolve(file) {
        Ok(url) => url.to_string(),
        Err(e) => {
          warn!(%file, "Skipping audio file: {}", e);
          continue;
        }
      };
      match self.origin.fetch(&FetchRequest::get(url.clone())).await {
        Ok(response) if response.is_ok() => {
          match self.caches.put(&self.cache_name, &url, &response) {
            Ok(()) => stored += 1,
            Err(e) => warn!(%file, "Failed to cache audio file: {}", e),
          }
        }
        Ok(response) => warn!(%file, status = response.status, "Audio file not available"),
        Err(e) => warn!(%file, "Failed to fetch audio file: {}", e),
      }
    }
    info!(stored, requested = files.len(), "Audio files caching complete");
    let _ = self.events.send(ControlMessage::CacheAudioFilesComplete);
    stored
  }

  async fn handle_message(
    &self,
    message: ControlMessage,
    reply: Option<oneshot::Sender<ControlMessage>>,
  ) {
    match message {
      ControlMessage::ClearCaches => {
        if let Err(e) = self.clear_caches() {
          error!("Failed to clear caches: {}", e);
          return;
        }
        match reply {
          Some(port) => {
            let _ = port.send(ControlMessage::CachesCleared);
          }
          None => {
            let _ = self.events.send(ControlMessage::CachesCleared);
          }
        }
      }
      ControlMessage::CacheAudioFiles { files } => {
        let agent = self.clone();
        tokio::spawn(async move {
          agent.cache_audio_files(&files).await;
        });
      }
      other => warn!(?other, "Ignoring agent-originated message"),
    }
  }

  /// Move the agent onto its own task and return the only way to reach it.
  pub fn spawn(self) -> AgentHandle {
    let (tx, mut rx) = mpsc::channel::<AgentRequest>(32);
    let handle = AgentHandle {
      tx,
      events: self.events.clone(),
      state: self.state.clone(),
      cache_name: self.cache_name.clone(),
    };

    tokio::spawn(async move {
      while let Some(request) = rx.recv().await {
        match request {
          AgentRequest::Install(reply) => {
            let _ = reply.send(self.install().await);
          }
          AgentRequest::Activate(reply) => {
            let _ = reply.send(self.activate());
          }
          AgentRequest::Fetch { url, reply } => {
            let agent = self.clone();
            tokio::spawn(async move {
              let _ = reply.send(agent.intercept(&url).await);
            });
          }
          AgentRequest::Message { message, reply } => self.handle_message(message, reply).await,
          AgentRequest::Retire => break,
        }
      }
      self.set_state(AgentState::Redundant);
      debug!(cache = %self.cache_name, "Agent stopped");
    });

    handle
  }
}

fn read_state(state: &Mutex<AgentState>) -> AgentState {
  match state.lock() {
    Ok(state) => *state,
    Err(poisoned) => *poisoned.into_inner(),
  }
}

/// Mailbox to a running agent.
#[derive(Clone)]
pub struct AgentHandle {
  tx: mpsc::Sender<AgentRequest>,
  events: broadcast::Sender<ControlMessage>,
  state: Arc<Mutex<AgentState>>,
  cache_name: String,
}

impl AgentHandle {
  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn state(&self) -> AgentState {
    read_state(&self.state)
  }

  /// Agent-originated messages.
  pub fn subscribe(&self) -> broadcast::Receiver<ControlMessage> {
    self.events.subscribe()
  }

  async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> AgentRequest) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(make(reply))
      .await
      .map_err(|_| CacheError::AgentUnavailable)?;
    rx.await.map_err(|_| CacheError::AgentUnavailable)
  }

  pub async fn install(&self) -> Result<()> {
    self.call(AgentRequest::Install).await?
  }

  pub async fn activate(&self) -> Result<Vec<String>> {
    self.call(AgentRequest::Activate).await?
  }

  /// Route a page request through the agent.
  pub async fn fetch(&self, url: &str) -> Result<Intercepted> {
    let url = url.to_string();
    self
      .call(|reply| AgentRequest::Fetch { url, reply })
      .await?
  }

  /// Fire-and-forget control message.
  pub async fn post_message(&self, message: ControlMessage) -> Result<()> {
    self
      .tx
      .send(AgentRequest::Message {
        message,
        reply: None,
      })
      .await
      .map_err(|_| CacheError::AgentUnavailable)
  }

  /// Control message with a reply port; resolves with the agent's answer.
  pub async fn request(&self, message: ControlMessage) -> Result<ControlMessage> {
    self
      .call(|reply| AgentRequest::Message {
        message,
        reply: Some(reply),
      })
      .await
  }

  /// Stop the agent; it becomes redundant.
  pub async fn retire(&self) {
    if let Ok(mut state) = self.state.lock() {
      *state = AgentState::Redundant;
    }
    let _ = self.tx.send(AgentRequest::Retire).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::assets::SqliteAssetCaches;
  use crate::origin::testing::FakeOrigin;

  const BASE: &str = "https://example.test";

  fn setup(assets: &[&str]) -> (Arc<SqliteAssetCaches>, Arc<FakeOrigin>, SyncAgent) {
    let caches = Arc::new(SqliteAssetCaches::open_in_memory().unwrap());
    let origin = Arc::new(FakeOrigin::new());
    let agent = SyncAgent::new(
      "site-cache-v2",
      assets.iter().map(|s| s.to_string()).collect(),
      InterceptPolicy::new(
        vec!["/sections.json".into(), "/patreon-poetry".into()],
        vec!["/sig".into()],
      ),
      caches.clone(),
      origin.clone(),
    );
    (caches, origin, agent)
  }

  #[tokio::test]
  async fn test_install_seeds_cache() {
    let (caches, origin, agent) = setup(&["/index.html", "/styles.css"]);
    origin.serve("/index.html", "<html>", None);
    origin.serve("/styles.css", "body{}", None);

    agent.install().await.unwrap();

    assert_eq!(agent.state(), AgentState::Waiting);
    assert_eq!(
      caches.urls("site-cache-v2").unwrap(),
      vec![format!("{}/index.html", BASE), format!("{}/styles.css", BASE)]
    );
  }

  #[tokio::test]
  async fn test_install_fails_atomically() {
    let (caches, origin, agent) = setup(&["/index.html", "/missing.png"]);
    origin.serve("/index.html", "<html>", None);

    let err = agent.install().await.unwrap_err();

    assert!(matches!(err, CacheError::InstallFailed(_)));
    assert_eq!(agent.state(), AgentState::Redundant);
    assert!(caches.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activate_deletes_only_prior_generations() {
    let (caches, _origin, agent) = setup(&[]);
    caches.open("site-cache-v1").unwrap();
    caches.open("dynamic-cache").unwrap();
    agent.install().await.unwrap();

    let deleted = agent.activate().unwrap();

    assert_eq!(deleted, vec!["site-cache-v1".to_string(), "dynamic-cache".to_string()]);
    assert_eq!(caches.keys().unwrap(), vec!["site-cache-v2".to_string()]);
    assert_eq!(agent.state(), AgentState::Active);

    // Nothing left to collect
    assert!(agent.activate().unwrap().is_empty());
    assert_eq!(caches.keys().unwrap(), vec!["site-cache-v2".to_string()]);
  }

  #[tokio::test]
  async fn test_cache_first_serves_hit_without_network() {
    let (_caches, origin, agent) = setup(&["/index.html"]);
    origin.serve("/index.html", "<html>", None);
    agent.install().await.unwrap();

    let hit = agent.intercept("/index.html").await.unwrap();

    assert_eq!(hit.source, CacheSource::Cache);
    assert_eq!(hit.response.body, b"<html>".to_vec());
    assert_eq!(origin.request_count("/index.html"), 1);
  }

  #[tokio::test]
  async fn test_cache_first_miss_is_stored_unless_denylisted() {
    let (caches, origin, agent) = setup(&[]);
    origin.serve("/images/pane1.png", "png", None);
    origin.serve("/sig", "secret", None);

    let miss = agent.intercept("/images/pane1.png").await.unwrap();
    assert_eq!(miss.source, CacheSource::Network);
    let again = agent.intercept("/images/pane1.png").await.unwrap();
    assert_eq!(again.source, CacheSource::Cache);

    agent.intercept("/sig").await.unwrap();
    assert_eq!(
      caches.match_any(&format!("{}/sig", BASE)).unwrap(),
      None
    );
    assert_eq!(origin.request_count("/images/pane1.png"), 1);
  }

  #[tokio::test]
  async fn test_network_first_updates_cache_and_falls_back_offline() {
    let (caches, origin, agent) = setup(&[]);
    origin.serve("/sections.json", r#"{"v":1}"#, None);

    let online = agent.intercept("/sections.json").await.unwrap();
    assert_eq!(online.source, CacheSource::Network);
    origin.serve("/sections.json", r#"{"v":2}"#, None);
    let refreshed = agent.intercept("/sections.json").await.unwrap();
    assert_eq!(refreshed.response.body, br#"{"v":2}"#.to_vec());

    origin.offline("/sections.json");
    let offline = agent.intercept("/sections.json").await.unwrap();

    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.response.body, br#"{"v":2}"#.to_vec());
    assert_eq!(caches.keys().unwrap(), vec!["site-cache-v2".to_string()]);
  }

  #[tokio::test]
  async fn test_network_first_without_cache_propagates_failure() {
    let (_caches, origin, agent) = setup(&[]);
    origin.offline("/patreon-poetry");

    let err = agent.intercept("/patreon-poetry").await.unwrap_err();
    assert!(err.is_network());
  }

  #[tokio::test]
  async fn test_clear_caches_replies_over_port() {
    let (caches, origin, agent) = setup(&["/index.html"]);
    origin.serve("/index.html", "<html>", None);
    let handle = agent.spawn();
    handle.install().await.unwrap();
    handle.activate().await.unwrap();

    let reply = handle.request(ControlMessage::ClearCaches).await.unwrap();

    assert_eq!(reply, ControlMessage::CachesCleared);
    assert!(caches.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cache_audio_files_announces_completion() {
    let (caches, origin, agent) = setup(&[]);
    origin.serve("/audio/24_October_2024.m4a", "aac", None);
    origin.offline("/audio/25_October_2024.m4a");
    let handle = agent.spawn();
    let mut events = handle.subscribe();

    handle
      .post_message(ControlMessage::CacheAudioFiles {
        files: vec![
          "/audio/25_October_2024.m4a".into(),
          "/audio/24_October_2024.m4a".into(),
        ],
      })
      .await
      .unwrap();

    assert_eq!(
      events.recv().await.unwrap(),
      ControlMessage::CacheAudioFilesComplete
    );
    assert_eq!(
      caches.urls("site-cache-v2").unwrap(),
      vec![format!("{}/audio/24_October_2024.m4a", BASE)]
    );
  }

  #[tokio::test]
  async fn test_retired_agent_is_unreachable() {
    let (_caches, _origin, agent) = setup(&[]);
    let handle = agent.spawn();

    handle.retire().await;

    assert_eq!(handle.state(), AgentState::Redundant);
    assert!(matches!(
      handle.fetch("/index.html").await,
      Err(CacheError::AgentUnavailable)
    ));
  }
}
