//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/marksync/config.toml)
//! 3. Environment variables (MARKSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::Policy;
use crate::tags::{is_valid_separator, DEFAULT_TAG_SEP};

/// Environment variable prefix
const ENV_PREFIX: &str = "MARKSYNC";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite db, logs, snapshots)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File name of the durable database inside `data_dir`
    #[serde(default = "default_db_file")]
    pub db_file: String,

    /// Quiet period before pending cache changes are written to disk
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Quiet period before a burst of file events triggers a reload
    #[serde(default = "default_reducer_interval_ms")]
    pub reducer_interval_ms: u64,

    /// Character joining tags in the stored encoding
    ///
    /// Applies to every store of the process. Changing it for an existing
    /// database leaves rows written with the old separator unreadable as
    /// tags.
    #[serde(default = "default_tag_separator")]
    pub tag_separator: char,

    /// Log file for the daemon (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Bookmark sources watched by the daemon
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// A file-backed bookmark source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source identifier, recorded as the bookmark module
    pub id: String,
    /// File to read bookmarks from
    pub path: PathBuf,
    #[serde(default)]
    pub format: SourceFormat,
    #[serde(default)]
    pub policy: Policy,
    /// Re-read the file on this interval in addition to watching it
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Re-create the native watch after every matching event
    ///
    /// Only needed on platforms that lose the watch when the directory
    /// entry is replaced.
    #[serde(default)]
    pub reset_watch: bool,
}

/// On-disk format of a file source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// JSON array of bookmark objects
    #[default]
    Json,
    /// One `URL [tag ...]` entry per line
    Text,
    /// SQLite database with a buku-style `bookmarks` table
    Buku,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: default_db_file(),
            sync_interval_ms: default_sync_interval_ms(),
            reducer_interval_ms: default_reducer_interval_ms(),
            tag_separator: default_tag_separator(),
            log_file: None,
            sources: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (MARKSYNC_DATA_DIR, MARKSYNC_SYNC_INTERVAL_MS, MARKSYNC_LOG_FILE)
    /// 2. Config file (~/.config/marksync/config.toml or MARKSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // MARKSYNC_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // MARKSYNC_SYNC_INTERVAL_MS
        if let Ok(val) = std::env::var(format!("{}_SYNC_INTERVAL_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.trim().parse() {
                self.sync_interval_ms = ms;
            }
        }

        // MARKSYNC_LOG_FILE
        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_separator(self.tag_separator) {
            anyhow::bail!(
                "Invalid tag separator {:?}: must not be alphanumeric, whitespace or '-'",
                self.tag_separator
            );
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                anyhow::bail!("Source with path {:?} has an empty id", source.path);
            }
            if !seen.insert(source.id.as_str()) {
                anyhow::bail!("Duplicate source id: {}", source.id);
            }
        }
        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with MARKSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("marksync")
            .join("config.toml")
    }

    /// Get the path to the durable SQLite database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    /// Directory used for snapshot copies of locked databases
    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn reducer_interval(&self) -> Duration {
        Duration::from_millis(self.reducer_interval_ms)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marksync")
}

fn default_db_file() -> String {
    "marksync.db".to_string()
}

fn default_sync_interval_ms() -> u64 {
    4000
}

fn default_reducer_interval_ms() -> u64 {
    1500
}

fn default_tag_separator() -> char {
    DEFAULT_TAG_SEP
}
