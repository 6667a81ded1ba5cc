//! Configuration loading and data folder resolution
//!
//! Settings come from, in priority order:
//! 1. Command-line arguments
//! 2. Environment variables (`RQS_DATA_FOLDER`, `RQS_ADDR`)
//! 3. TOML config file (`--config`, or `<config dir>/rqs/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error; an explicitly requested one is.

use crate::receipts::DomainCode;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the data folder
pub const DATA_FOLDER_ENV: &str = "RQS_DATA_FOLDER";

/// Environment variable overriding the HTTP listen address
pub const LISTEN_ADDR_ENV: &str = "RQS_ADDR";

/// Database file name inside the data folder
pub const DB_FILE_NAME: &str = "main.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the database and session files
    #[serde(default)]
    pub data_folder: Option<PathBuf>,

    /// HTTP server address:port
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Jurisdictions to accept and fetch; all of them when absent
    #[serde(default)]
    pub domains: Option<Vec<DomainCode>>,

    #[serde(default)]
    pub ru_fns: RuFnsConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            data_folder: None,
            listen_addr: default_listen_addr(),
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
            domains: None,
            ru_fns: RuFnsConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error); `RUST_LOG` wins
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Scheduler tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Records processed per draining pass
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// ru-fns mobile API identity
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuFnsConfig {
    /// `Device-Id` header for regular requests; random per process when absent
    #[serde(default)]
    pub device_id: Option<String>,

    /// `Device-Id` header for session refresh requests
    #[serde(default)]
    pub firebase_token: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:9010".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_size() -> i64 {
    5
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if config.scheduler.batch_size < 1 {
            return Err(Error::Config(format!(
                "scheduler.batch_size must be positive, got {}",
                config.scheduler.batch_size
            )));
        }
        Ok(config)
    }

    /// Enabled jurisdictions in registry order
    pub fn enabled_domains(&self) -> Vec<DomainCode> {
        match &self.domains {
            Some(list) => DomainCode::ALL
                .into_iter()
                .filter(|d| list.contains(d))
                .collect(),
            None => DomainCode::ALL.to_vec(),
        }
    }
}

/// Load configuration from the explicit path, or the default location if present
pub fn load_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit_path {
        info!("Loading config: {}", path.display());
        return TomlConfig::from_file(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            info!("Loading config: {}", path.display());
            TomlConfig::from_file(&path)
        }
        _ => {
            warn!("No config file found, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// `<config dir>/rqs/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rqs").join("config.toml"))
}

/// Data folder by priority: CLI > `RQS_DATA_FOLDER` > TOML > OS default
pub fn resolve_data_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_FOLDER_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.data_folder {
        return path.clone();
    }

    default_data_folder()
}

/// Listen address by priority: CLI > `RQS_ADDR` > TOML/default
pub fn resolve_listen_addr(cli_arg: Option<&str>, config: &TomlConfig) -> String {
    if let Some(addr) = cli_arg {
        return addr.to_string();
    }
    match std::env::var(LISTEN_ADDR_ENV) {
        Ok(addr) if !addr.is_empty() => addr,
        _ => config.listen_addr.clone(),
    }
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("rqs"))
        .unwrap_or_else(|| PathBuf::from("./rqs_data"))
}

pub fn database_path(data_folder: &Path) -> PathBuf {
    data_folder.join(DB_FILE_NAME)
}
