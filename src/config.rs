use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::lifecycle::AudioSettings;
use crate::state::DEFAULT_STATE_KEY;

pub const ORIGIN_ENV: &str = "TAPESTRY_ORIGIN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub origin: OriginConfig,
  /// Where the store, key-value file and logs live (defaults to the XDG data dir)
  pub data_dir: Option<PathBuf>,
  /// Content files refreshed each cycle, in order
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Manifest file whose update inserts the bonus entry
  #[serde(default = "default_bonus_file")]
  pub bonus_file: String,
  /// Key-value entry that survives a full clear
  #[serde(default = "default_state_key")]
  pub reserved_state_key: String,
  #[serde(default)]
  pub agent: AgentConfig,
  #[serde(default)]
  pub audio: AudioConfig,
  /// Extra assets cached on demand into the dynamic cache
  #[serde(default = "default_additional_assets")]
  pub additional_assets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
  /// Generation name; bump it to replace every cached asset
  pub cache_version: String,
  pub static_assets: Vec<String>,
  pub network_first_paths: Vec<String>,
  /// Paths never stored by the cache-first policy
  pub denylist: Vec<String>,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self {
      cache_version: "site-cache-v1".to_string(),
      static_assets: strings(DEFAULT_STATIC_ASSETS),
      network_first_paths: strings(&["/sections.json", "/patreon-poetry"]),
      denylist: strings(&["/sig"]),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
  pub start_date: NaiveDate,
  pub dir: String,
}

impl Default for AudioConfig {
  fn default() -> Self {
    let settings = AudioSettings::default();
    Self {
      start_date: settings.start_date,
      dir: settings.dir,
    }
  }
}

impl From<&AudioConfig> for AudioSettings {
  fn from(config: &AudioConfig) -> Self {
    Self {
      start_date: config.start_date,
      dir: config.dir.clone(),
    }
  }
}

const DEFAULT_STATIC_ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "/styles.css",
  "/script.js",
  "/sections.json",
  "/patreon-poetry",
  "/icons/favicon.ico",
  "/icons/darkmode.png",
  "/icons/lightmode.png",
  "/icons/patreon.png",
  "/icons/patreon_alt.png",
  "/icons/menu.png",
  "/icons/about.png",
  "/icons/poetry.png",
  "/icons/books.png",
  "/icons/contact.png",
  "/icons/twitter.png",
  "/icons/instagram.png",
  "/images/pane1.png",
  "/images/pane2.png",
  "/images/pane3.png",
  "/images/pane4.png",
  "/images/pane5.png",
  "/images/pane6.png",
  "/images/pane7.png",
  "/images/pane8.png",
  "/images/title.png",
  "/images/logo.png",
  "/images/preview.jpg",
  "https://fonts.googleapis.com/css2?family=Roboto:wght@400;700&display=swap",
];

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

fn default_manifest() -> Vec<String> {
  strings(&[
    "poetry.json",
    "caliope.json",
    "lupa.json",
    "experiments.json",
    "strands.json",
  ])
}

fn default_bonus_file() -> String {
  "experiments.json".to_string()
}

fn default_state_key() -> String {
  DEFAULT_STATE_KEY.to_string()
}

fn default_additional_assets() -> Vec<String> {
  strings(&[
    "/icons/play.png",
    "/icons/play_alt.png",
    "/icons/pause.png",
    "/icons/pause_alt.png",
  ])
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tapestry.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tapestry/config.yaml
  ///
  /// `TAPESTRY_ORIGIN` overrides `origin.base_url`.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/tapestry/config.yaml\n\
                 See config.example.yaml for the format."
        ))
      }
    };

    Ok(config.with_origin_override(std::env::var(ORIGIN_ENV).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tapestry.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tapestry").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.manifest.is_empty() {
      return Err(eyre!("manifest must list at least one content file"));
    }
    Ok(config)
  }

  fn with_origin_override(mut self, base_url: Option<String>) -> Self {
    if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
      self.origin.base_url = url;
    }
    self
  }

  /// Resolved data directory.
  pub fn data_dir(&self) -> PathBuf {
    self.data_dir.clone().unwrap_or_else(|| {
      dirs::data_dir()
        .map(|d| d.join("tapestry"))
        .unwrap_or_else(|| PathBuf::from(".tapestry"))
    })
  }

  pub fn log_dir(&self) -> PathBuf {
    self.data_dir().join("logs")
  }
}
