//! Configuration loader and validator for storymap.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::{Coordinate, Viewport};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub user: User,
    #[serde(default)]
    pub map: Map,
    pub storage: Storage,
    #[serde(default)]
    pub locations: Locations,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    /// Failed attachment retries before a task is abandoned.
    pub max_attempts: u32,
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match (self.data_dir.strip_prefix("~/"), std::env::var("HOME")) {
            (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
            _ => self.data_dir.clone(),
        }
    }
}

/// The signed-in author; authentication itself is handled elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
}

/// Initial map viewport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Map {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl Default for Map {
    fn default() -> Self {
        Self {
            latitude: 30.822279,
            longitude: 163.016783,
            latitude_delta: 0.001,
            longitude_delta: 0.003,
        }
    }
}

impl Map {
    pub fn viewport(&self) -> Viewport {
        Viewport::new(
            Coordinate::new(self.latitude, self.longitude),
            self.latitude_delta,
            self.longitude_delta,
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Http,
}

/// Object storage for uploaded images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub backend: StorageBackend,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// How new location records are keyed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Generated UUID.
    #[default]
    Generated,
    /// The location title; re-using a title overwrites the earlier record.
    Title,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locations {
    #[serde(default)]
    pub key: KeyPolicy,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// SQLite URL: `DATABASE_URL` if set, else `<data_dir>/storymap.db`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/storymap.db", self.app.resolved_data_dir()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.max_attempts == 0 || i32::try_from(cfg.app.max_attempts).is_err() {
        return Err(ConfigError::Invalid(
            "app.max_attempts must be between 1 and 2147483647",
        ));
    }
    if i64::try_from(cfg.app.max_backoff_seconds).is_err() {
        return Err(ConfigError::Invalid("app.max_backoff_seconds is too large"));
    }

    if cfg.user.id.trim().is_empty() {
        return Err(ConfigError::Invalid("user.id must be non-empty"));
    }

    if !cfg.map.viewport().center().is_valid() {
        return Err(ConfigError::Invalid("map.latitude/longitude out of range"));
    }
    if !(cfg.map.latitude_delta > 0.0 && cfg.map.longitude_delta > 0.0) {
        return Err(ConfigError::Invalid("map deltas must be > 0"));
    }

    if cfg.storage.backend == StorageBackend::Http {
        let base = cfg.storage.base_url.as_deref().unwrap_or("");
        if base.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.base_url must be non-empty for the http backend",
            ));
        }
        if reqwest::Url::parse(base).is_err() {
            return Err(ConfigError::Invalid("storage.base_url must be a valid URL"));
        }
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  max_backoff_seconds: 60
  max_attempts: 5

user:
  id: "local-user"

map:
  latitude: 30.822279
  longitude: 163.016783
  latitude_delta: 0.001
  longitude_delta: 0.003

storage:
  # "local" keeps images under <data_dir>/media; "http" PUTs them to base_url.
  backend: "local"
  base_url: "https://storage.example.com/storymap"
  token: ""

locations:
  # "generated" or "title"
  key: "generated"
"#
}
