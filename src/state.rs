//! Application state snapshot and the refresh hooks that act on it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cache::KeyValueStore;
use crate::error::{CacheError, Result};
use crate::refresh::RefreshHooks;

pub const DEFAULT_STATE_KEY: &str = "spectralTapestryState";

/// Poem sets that get a sort order when nothing was saved.
pub const POEM_SETS: [&str; 5] = ["main", "lupa", "caliope", "experiment", "strands"];

const BONUS_DATE: &str = "14 December 2024";

/// Navigation and preference state that survives a content wipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
  #[serde(rename = "preferredLanguage")]
  pub language: String,
  pub theme: Option<String>,
  #[serde(rename = "currentPoemSet")]
  pub poem_set: String,
  pub last_viewed_poem_id: Option<String>,
  pub saved_volume: Option<f64>,
  pub sort_orders: BTreeMap<String, String>,

  #[serde(skip)]
  pub poems: Vec<Value>,
  #[serde(skip)]
  pub is_updating: bool,
}

impl Default for AppState {
  fn default() -> Self {
    Self {
      language: "en".to_string(),
      theme: None,
      poem_set: "main".to_string(),
      last_viewed_poem_id: None,
      saved_volume: None,
      sort_orders: POEM_SETS
        .iter()
        .map(|set| (set.to_string(), "desc".to_string()))
        .collect(),
      poems: Vec::new(),
      is_updating: false,
    }
  }
}

/// The synthetic puzzle entry shown at the top of the experiments set.
pub fn bonus_entry() -> Value {
  json!({
    "title_en": "15 Puzzle",
    "title_it": "Gioco del 15",
    "date_en": BONUS_DATE,
    "date_it": "14 Dicembre 2024",
    "poem_en": "IF I AM NEAR   ",
    "poem_it": "MI VIENE A ME  ",
    "puzzle_content": true
  })
}

impl AppState {
  pub fn has_bonus_entry(&self) -> bool {
    self.poems.iter().any(|poem| {
      poem.get("date_en").and_then(Value::as_str) == Some(BONUS_DATE)
        && poem.get("puzzle_content").and_then(Value::as_bool).unwrap_or(false)
    })
  }

  /// Write the snapshot under `key`: local tier first, session on failure.
  pub fn save(
    &self,
    key: &str,
    local: &dyn KeyValueStore,
    session: &dyn KeyValueStore,
  ) -> Result<()> {
    let encoded = serde_json::to_string(self).map_err(|e| CacheError::Storage(e.to_string()))?;

    let local_err = match local.set_item(key, &encoded) {
      Ok(()) => return Ok(()),
      Err(e) => e,
    };
    warn!("Local storage failed, trying session storage: {}", local_err);

    session.set_item(key, &encoded).map_err(|session_err| CacheError::AllStorageFailed {
      key: key.to_string(),
      causes: vec![
        format!("local: {}", local_err),
        format!("session: {}", session_err),
      ],
    })
  }

  /// Read the snapshot from `key`, local tier first.
  ///
  /// Missing or unreadable snapshots give the defaults.
  pub fn load(key: &str, local: &dyn KeyValueStore, session: &dyn KeyValueStore) -> Self {
    for (tier, store) in [("local", local), ("session", session)] {
      match store.get_item(key) {
        Ok(Some(raw)) => match serde_json::from_str::<AppState>(&raw) {
          Ok(state) => {
            debug!(tier, "Loaded saved state");
            return state.with_default_sort_orders();
          }
          Err(e) => warn!(tier, "Ignoring unreadable saved state: {}", e),
        },
        Ok(None) => {}
        Err(e) => warn!(tier, "Error loading state: {}", e),
      }
    }
    Self::default()
  }

  fn with_default_sort_orders(mut self) -> Self {
    for set in POEM_SETS {
      self
        .sort_orders
        .entry(set.to_string())
        .or_insert_with(|| "desc".to_string());
    }
    self
  }
}

/// Shared handle to the application state.
#[derive(Clone, Default)]
pub struct SharedState(Arc<Mutex<AppState>>);

impl SharedState {
  pub fn new(state: AppState) -> Self {
    Self(Arc::new(Mutex::new(state)))
  }

  pub fn lock(&self) -> MutexGuard<'_, AppState> {
    match self.0.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  pub fn snapshot(&self) -> AppState {
    self.lock().clone()
  }

  pub fn is_updating(&self) -> bool {
    self.lock().is_updating
  }
}

impl RefreshHooks for SharedState {
  fn set_updating(&self, updating: bool) {
    self.lock().is_updating = updating;
  }

  fn update_status_icon(&self) {
    let icon = if self.is_updating() { "syncing" } else { "idle" };
    debug!(icon, "Status icon");
  }

  fn is_bonus_entry_inserted(&self) -> bool {
    self.lock().has_bonus_entry()
  }

  fn insert_bonus_entry(&self) {
    let mut state = self.lock();
    if !state.has_bonus_entry() {
      state.poems.insert(0, bonus_entry());
      info!("Inserted bonus puzzle entry");
    }
  }
}
