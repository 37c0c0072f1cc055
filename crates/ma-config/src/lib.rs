//! # ma-config
//!
//! Layered settings for the archive: built-in defaults, then an optional TOML
//! file, then `MYARCHIVE__SECTION__KEY` environment variables (a `.env` file
//! is honoured). Command line overrides are applied last by the binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// File picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "myarchive.toml";
pub const ENV_PREFIX: &str = "MYARCHIVE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub database_url: String,
    pub media_root: PathBuf,
    /// Blocking threads used to hash files during folder imports.
    pub hash_workers: usize,
    pub download: DownloadSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:myarchive.db".to_string(),
            media_root: PathBuf::from("media"),
            hash_workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            download: DownloadSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: concat!("myarchive/", env!("CARGO_PKG_VERSION")).to_string(),
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 15 * 60 * 1_000,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ArchiveConfig {
    /// Loads `.env`, then layers `path` (required when given, otherwise the
    /// optional [`DEFAULT_CONFIG_FILE`]) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "Loaded .env");
        }
        Self::load_with(path, None)
    }

    /// Like [`load`](Self::load) without touching `.env`. `env` replaces the
    /// process environment when given.
    pub fn load_with(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(env);

        let config: Self = Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command line overrides, which beat every other layer.
    pub fn with_overrides(
        mut self,
        database_url: Option<String>,
        media_root: Option<PathBuf>,
    ) -> Self {
        if let Some(url) = database_url {
            self.database_url = url;
        }
        if let Some(root) = media_root {
            self.media_root = root;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url must not be empty".into()));
        }
        if self.media_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("media_root must not be empty".into()));
        }
        if self.hash_workers == 0 {
            return Err(ConfigError::Invalid("hash_workers must be at least 1".into()));
        }
        if self.download.max_attempts == 0 {
            return Err(ConfigError::Invalid("download.max_attempts must be at least 1".into()));
        }
        if self.download.base_delay_ms > self.download.max_delay_ms {
            return Err(ConfigError::Invalid(
                "download.base_delay_ms must not exceed download.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}
