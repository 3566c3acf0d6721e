//! Configuration management for the photo backup engine.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`PHOTO_BACKUP__TRANSFER__MAX_RETRIES=3` and so on).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backup: BackupConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory the library is mirrored into
    pub root: PathBuf,

    /// Resume state; present only while a run is unfinished
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry key of the media provider
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of the provider API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// JSON file holding an `access_token` field, maintained by an external
    /// authorization tool
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Access token given directly (takes precedence over `token_file`)
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Items requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Upper bound on listing pages before giving up
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Retries after the first failed attempt (pages and items)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout for a single network call or stalled read
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Items downloaded in parallel
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_manifest_path() -> PathBuf {
    PathBuf::from("state/manifest.json")
}

fn default_provider_name() -> String {
    "google-photos".to_string()
}

fn default_api_base() -> String {
    "https://photoslibrary.googleapis.com/v1".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> usize {
    100_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_base: default_api_base(),
            token_file: None,
            access_token: None,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus `PHOTO_BACKUP__*`
    /// environment variables, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::layered(path, None, None)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge defaults, the optional file and the environment without
    /// validating, so callers can apply further overrides first.
    ///
    /// `root` comes from the command line and wins over file and
    /// environment. `env` replaces the process environment when given.
    pub fn layered(
        path: Option<&Path>,
        root: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix("PHOTO_BACKUP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .set_override_option("backup.root", root.map(|r| r.to_string_lossy().into_owned()))
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Configuration with defaults for everything but the backup root.
    #[cfg(test)]
    pub(crate) fn with_root(root: impl Into<PathBuf>) -> Self {
        Config {
            backup: BackupConfig {
                root: root.into(),
                manifest_path: default_manifest_path(),
            },
            provider: ProviderConfig::default(),
            catalog: CatalogConfig::default(),
            transfer: TransferConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backup.root.as_os_str().is_empty() {
            return Err(BackupError::Config("backup.root must not be empty".into()));
        }
        if self.catalog.page_size == 0 {
            return Err(BackupError::Config("catalog.page_size must be at least 1".into()));
        }
        if self.catalog.max_pages == 0 {
            return Err(BackupError::Config("catalog.max_pages must be at least 1".into()));
        }
        if self.transfer.max_concurrent == 0 {
            return Err(BackupError::Config("transfer.max_concurrent must be at least 1".into()));
        }
        Ok(())
    }
}
