//! Configuration loading and root folder resolution
//!
//! Configuration lives in a TOML file. A missing file is not an error: the
//! daemon logs a warning and starts with compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "SCROBSYNC_ROOT_FOLDER";

/// Environment variable overriding the ListenBrainz API base URL
pub const LISTENBRAINZ_URL_ENV: &str = "SCROBSYNC_LISTENBRAINZ_URL";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "scrobsync.db";

pub const DEFAULT_LISTENBRAINZ_URL: &str = "https://api.listenbrainz.org";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub listenbrainz: ListenBrainzConfig,
    pub relay: RelayConfig,
    pub internal: InternalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// ListenBrainz transport and backfill settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenBrainzConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Minimum spacing between two requests to the remote service
    pub min_request_interval_ms: u64,
    pub sync_enabled: bool,
    pub sync_interval_secs: u64,
    /// Listens requested per history page (the service caps this at 1000)
    pub page_size: u32,
    /// Remote entries examined per import cycle; the rest waits for the next cycle
    pub max_listens_per_import: u32,
    pub threshold: PlayThresholdConfig,
}

impl Default for ListenBrainzConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_LISTENBRAINZ_URL.to_string(),
            request_timeout_secs: 30,
            min_request_interval_ms: 250,
            sync_enabled: true,
            sync_interval_secs: 3600,
            page_size: 100,
            max_listens_per_import: 5000,
            threshold: PlayThresholdConfig::HalfTrackCapped { cap_seconds: 240 },
        }
    }
}

/// Outbound relay retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Idle time after which a user's relay lane is retired
    pub lane_idle_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            lane_idle_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalConfig {
    pub threshold: PlayThresholdConfig,
}

/// Minimum play duration for a finished playback to count as a listen
///
/// ```toml
/// [listenbrainz.threshold]
/// mode = "half_track_capped"
/// cap_seconds = 240
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlayThresholdConfig {
    #[default]
    Always,
    Fixed {
        seconds: u64,
    },
    HalfTrackCapped {
        cap_seconds: u64,
    },
}

impl TomlConfig {
    /// Apply environment variable overrides on top of the file contents
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(LISTENBRAINZ_URL_ENV) {
            if !url.trim().is_empty() {
                debug!("ListenBrainz URL overridden by {}", LISTENBRAINZ_URL_ENV);
                self.listenbrainz.api_base_url = url;
            }
        }
    }

    /// Reject settings the synchronizer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.listenbrainz.page_size == 0 || self.listenbrainz.page_size > 1000 {
            return Err(Error::Config(format!(
                "listenbrainz.page_size must be within 1..=1000 (got {})",
                self.listenbrainz.page_size
            )));
        }
        if self.listenbrainz.max_listens_per_import == 0 {
            return Err(Error::Config(
                "listenbrainz.max_listens_per_import must be at least 1".to_string(),
            ));
        }
        if self.listenbrainz.sync_interval_secs == 0 {
            return Err(Error::Config(
                "listenbrainz.sync_interval_secs must be positive".to_string(),
            ));
        }
        if self.relay.max_attempts == 0 {
            return Err(Error::Config("relay.max_attempts must be at least 1".to_string()));
        }
        if self.relay.initial_backoff_ms > self.relay.max_backoff_ms {
            return Err(Error::Config(
                "relay.initial_backoff_ms exceeds relay.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default configuration file location (`~/.config/scrobsync/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scrobsync").join("config.toml"))
}

/// Load TOML configuration
///
/// A missing file yields defaults; an unreadable or malformed file is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

/// Root folder resolution
///
/// Priority order:
/// 1. Command-line argument
/// 2. `SCROBSYNC_ROOT_FOLDER` environment variable
/// 3. `root_folder` from the TOML config
/// 4. OS-dependent default
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self {
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml_config(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            return path.clone();
        }

        default_root_folder()
    }
}

impl Default for RootFolderResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates the root folder and locates files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

/// OS-dependent default root folder (`~/.local/share/scrobsync` on Linux)
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("scrobsync"))
        .unwrap_or_else(|| PathBuf::from("./scrobsync_data"))
}
