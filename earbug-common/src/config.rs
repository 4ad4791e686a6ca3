//! Bootstrap configuration
//!
//! Settings are read once at startup from `earbug.toml`. The file location is
//! resolved in priority order:
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`EARBUG_CONFIG`)
//! 3. Platform config directory (`~/.config/earbug/earbug.toml` on Linux)
//! 4. Compiled defaults (no file)
//!
//! A missing file is not an error: a warning is logged and defaults apply.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::service::ServiceConfig;
use crate::source::MAX_FETCH_LIMIT;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "EARBUG_CONFIG";

/// Config file name inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "earbug.toml";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// HTTP listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory holding actor snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Actor used when a request names none
    #[serde(default = "default_actor")]
    pub default_actor: String,

    /// OAuth redirect URL registered with Spotify
    #[serde(default = "default_auth_redirect_url")]
    pub auth_redirect_url: String,

    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,

    /// Publish a snapshot after every successful update
    #[serde(default)]
    pub persist_on_update: bool,

    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_shutdown_export_timeout_secs")]
    pub shutdown_export_timeout_secs: u64,

    /// Recent plays requested per update (1..=50)
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,

    #[serde(default)]
    pub spotify: SpotifyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Optional client registration seeded into actors that have none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
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

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("earbug"))
        .unwrap_or_else(|| PathBuf::from("./earbug-data"))
}

fn default_actor() -> String {
    "default".to_string()
}

fn default_auth_redirect_url() -> String {
    "http://localhost:8080/auth/callback".to_string()
}

fn default_update_interval_secs() -> u64 {
    300
}

fn default_export_interval_secs() -> u64 {
    1800
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_shutdown_export_timeout_secs() -> u64 {
    10
}

fn default_fetch_limit() -> u32 {
    MAX_FETCH_LIMIT
}

fn default_log_level() -> String {
    "earbug_server=info,earbug_common=info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            default_actor: default_actor(),
            auth_redirect_url: default_auth_redirect_url(),
            update_interval_secs: default_update_interval_secs(),
            export_interval_secs: default_export_interval_secs(),
            persist_on_update: false,
            operation_timeout_secs: default_operation_timeout_secs(),
            shutdown_export_timeout_secs: default_shutdown_export_timeout_secs(),
            fetch_limit: default_fetch_limit(),
            spotify: SpotifyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_secs == 0 || self.export_interval_secs == 0 {
            return Err(Error::Config("intervals must be greater than zero".to_string()));
        }
        if self.operation_timeout_secs == 0 {
            return Err(Error::Config("operation_timeout_secs must be greater than zero".to_string()));
        }
        if self.fetch_limit == 0 || self.fetch_limit > MAX_FETCH_LIMIT {
            return Err(Error::Config(format!(
                "fetch_limit must be between 1 and {}",
                MAX_FETCH_LIMIT
            )));
        }
        if self.default_actor.is_empty() {
            return Err(Error::Config("default_actor must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }

    pub fn shutdown_export_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_export_timeout_secs)
    }

    /// Service knobs derived from this file
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            fetch_limit: self.fetch_limit,
            persist_on_update: self.persist_on_update,
            seed_client_id: self.spotify.client_id.clone(),
            seed_client_secret: self.spotify.client_secret.clone(),
        }
    }
}

/// Default config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("earbug").join(CONFIG_FILE_NAME))
}

/// Resolve the config file path: CLI > environment > platform default
///
/// Returns `None` when no candidate applies.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    default_config_path()
}

/// Load configuration, falling back to defaults when the file is missing
///
/// An unreadable or malformed file is an error.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = resolve_config_path(cli_arg) else {
        warn!("No config directory available, using defaults");
        return Ok(TomlConfig::default());
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let config = TomlConfig::from_toml_str(&content)?;
            info!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(TomlConfig::default())
        }
        Err(e) => Err(Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Write a config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    std::fs::write(path, content)
        .map_err(|e| Error::Config(format!("Failed to write {}: {}", path.display(), e)))
}
