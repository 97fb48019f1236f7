//! Configuration parsing and validation.
//!
//! bulksync reads a TOML file with four optional sections:
//!
//! ```toml
//! [db]
//! path = "./data/bulksync.sqlite"
//!
//! [source]
//! csv = "./data/occurrences.csv"
//! guid_field = "occurrenceid"
//!
//! [remote]
//! url = "http://127.0.0.1:5984"
//! database = "vertnet"
//!
//! [sync]
//! chunk_size = 10000
//! ```
//!
//! A missing file falls back to [`Config::default`] via
//! [`load_or_default`]; a present but invalid file is an error.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use bulksync_core::pipeline::{DEFAULT_CHUNK_SIZE, DEFAULT_GUID_FIELD};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/bulksync.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub csv: Option<PathBuf>,
    #[serde(default = "default_guid_field")]
    pub guid_field: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            csv: None,
            guid_field: default_guid_field(),
        }
    }
}

fn default_guid_field() -> String {
    DEFAULT_GUID_FIELD.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            database: default_database(),
            username: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_database() -> String {
    "vertnet".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Config {
    /// Bring free-form values into the form the pipeline matches on.
    ///
    /// The CSV source trims and lower-cases every header, so the guid field
    /// gets the same treatment.
    pub fn normalize(&mut self) {
        self.source.guid_field = self.source.guid_field.trim().to_lowercase();
    }

    /// Check cross-field constraints. Called after loading and again after
    /// CLI overrides are applied.
    pub fn validate(&self) -> Result<()> {
        if self.sync.chunk_size == 0 {
            bail!("sync.chunk_size must be > 0");
        }
        if self.source.guid_field.trim().is_empty() {
            bail!("source.guid_field must not be empty");
        }
        if self.remote.database.trim().is_empty() {
            bail!("remote.database must not be empty");
        }
        if let Some(url) = &self.remote.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("remote.url must start with http:// or https://, got '{}'", url);
            }
        }
        Ok(())
    }
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.normalize();
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}
