//! Configuration management module for the VPN bridge.
//!
//! This module provides functionality for loading, parsing, and managing
//! configuration settings for the bridge host and its simulated backend.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Tunnel session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Name of the process-wide tunnel session (default: "vpnbridge")
    #[serde(default = "default_session_name")]
    pub name: String,
}

fn default_session_name() -> String {
    "vpnbridge".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            name: default_session_name(),
        }
    }
}

/// Settings for the simulated backend used by the bridge host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Delay before the backend reports the tunnel up, in milliseconds (default: 200)
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,

    /// Delay before the backend reports the tunnel down, in milliseconds (default: 100)
    #[serde(default = "default_disconnect_delay_ms")]
    pub disconnect_delay_ms: u64,

    /// When set, every state change is rejected with this detail
    #[serde(default)]
    pub fail_with: Option<String>,
}

fn default_connect_delay_ms() -> u64 {
    200
}

fn default_disconnect_delay_ms() -> u64 {
    100
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            connect_delay_ms: default_connect_delay_ms(),
            disconnect_delay_ms: default_disconnect_delay_ms(),
            fail_with: None,
        }
    }
}

impl BackendConfig {
    /// Returns the connect delay as a [`Duration`].
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    /// Returns the disconnect delay as a [`Duration`].
    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }
}

/// Tunnel-creation consent settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermissionConfig {
    /// Consent is already on record; no prompt is shown (default: false)
    #[serde(default)]
    pub pre_granted: bool,

    /// Answer given when a prompt is shown (default: true)
    #[serde(default = "default_true")]
    pub grant: bool,

    /// How long the simulated prompt stays open, in milliseconds (default: 0)
    #[serde(default)]
    pub prompt_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

impl Default for PermissionConfig {
    fn default() -> Self {
        PermissionConfig {
            pre_granted: false,
            grant: default_true(),
            prompt_delay_ms: 0,
        }
    }
}

impl PermissionConfig {
    /// Returns the prompt delay as a [`Duration`].
    pub fn prompt_delay(&self) -> Duration {
        Duration::from_millis(self.prompt_delay_ms)
    }
}

/// Main configuration structure for the VPN bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Tunnel session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Permission configuration
    #[serde(default)]
    pub permission: PermissionConfig,

    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session: SessionConfig::default(),
            backend: BackendConfig::default(),
            permission: PermissionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Config::default()
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.validate()?;

        // Environment variables take precedence over the file
        Self::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        Self::apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.name.trim().is_empty() {
            return Err(ConfigError::MissingValue("session.name".to_string()));
        }

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "log_level".to_string(),
                message: format!(
                    "'{}' is not one of {}",
                    self.log_level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        if let Some(detail) = &self.backend.fail_with {
            if detail.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "backend.fail_with".to_string(),
                    message: "failure detail cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: VPNBRIDGE_)
    /// Example keys:
    /// - VPNBRIDGE_LOG_LEVEL, VPNBRIDGE_SESSION_NAME
    /// - VPNBRIDGE_BACKEND_CONNECT_DELAY_MS, VPNBRIDGE_BACKEND_DISCONNECT_DELAY_MS,
    ///   VPNBRIDGE_BACKEND_FAIL_WITH
    /// - VPNBRIDGE_PERMISSION_PRE_GRANTED, VPNBRIDGE_PERMISSION_GRANT,
    ///   VPNBRIDGE_PERMISSION_PROMPT_DELAY_MS
    fn apply_env_overrides(cfg: &mut Config) {
        use std::env;

        fn parse_bool(s: &str) -> Option<bool> {
            match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            }
        }
        fn parse_u64(s: &str) -> Option<u64> {
            s.parse().ok()
        }

        // Top-level
        if let Ok(v) = env::var("VPNBRIDGE_LOG_LEVEL") {
            cfg.log_level = v;
        }

        // Session
        if let Ok(v) = env::var("VPNBRIDGE_SESSION_NAME") {
            if !v.is_empty() {
                cfg.session.name = v;
            }
        }

        // Backend
        if let Ok(v) = env::var("VPNBRIDGE_BACKEND_CONNECT_DELAY_MS") {
            if let Some(n) = parse_u64(&v) {
                cfg.backend.connect_delay_ms = n;
            }
        }
        if let Ok(v) = env::var("VPNBRIDGE_BACKEND_DISCONNECT_DELAY_MS") {
            if let Some(n) = parse_u64(&v) {
                cfg.backend.disconnect_delay_ms = n;
            }
        }
        if let Ok(v) = env::var("VPNBRIDGE_BACKEND_FAIL_WITH") {
            if !v.is_empty() {
                cfg.backend.fail_with = Some(v);
            }
        }

        // Permission
        if let Ok(v) = env::var("VPNBRIDGE_PERMISSION_PRE_GRANTED") {
            if let Some(b) = parse_bool(&v) {
                cfg.permission.pre_granted = b;
            }
        }
        if let Ok(v) = env::var("VPNBRIDGE_PERMISSION_GRANT") {
            if let Some(b) = parse_bool(&v) {
                cfg.permission.grant = b;
            }
        }
        if let Ok(v) = env::var("VPNBRIDGE_PERMISSION_PROMPT_DELAY_MS") {
            if let Some(n) = parse_u64(&v) {
                cfg.permission.prompt_delay_ms = n;
            }
        }
    }

    /// Reload configuration from the same file it was loaded from
    pub fn reload(&mut self, path: &Path) -> Result<(), ConfigError> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("vpnbridge").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}

/// Configuration manager for handling configuration loading and reloading.
#[derive(Debug)]
pub struct ConfigManager {
    /// Current configuration
    config: Config,
    /// Path to the configuration file
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with the default configuration
    pub fn new() -> Self {
        ConfigManager {
            config: Config::default(),
            config_path: Config::default_path(),
        }
    }

    /// Load configuration from the specified path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load(&path)?;

        Ok(ConfigManager {
            config,
            config_path: path,
        })
    }

    /// Load configuration from the default path
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(Config::default_path())
    }

    /// Get a reference to the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the current configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Reload configuration from the current path
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        self.config.reload(&self.config_path)
    }

    /// Save the current configuration to the current path
    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.save(&self.config_path)
    }

    /// Get the current configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
