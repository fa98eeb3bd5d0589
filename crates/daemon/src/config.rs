//! Configuration management for the jailserve daemon.
//!
//! This module provides TOML-based configuration file loading.
//! The default configuration path is `~/.config/jailserve/config.toml`.
//! Values are layered: built-in defaults, then the file, then `JAILSERVE_*`
//! environment variables, then command-line flags.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::DEFAULT_MAX_UPLOAD_BYTES;
use crate::privilege::RootConfinement;

/// Largest accepted upload ceiling (1 GiB).
pub const MAX_UPLOAD_CEILING: usize = 1024 * 1024 * 1024;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_address must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("max_body_bytes must be between 1 and 1073741824 (1 GiB), got {0}")]
    InvalidMaxBodyBytes(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the jailserve daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener and serve root.
    pub server: ServerConfig,

    /// Upload limits.
    pub upload: UploadConfig,

    /// Logging.
    pub daemon: DaemonConfig,

    /// Privilege reduction.
    pub security: SecurityConfig,
}

/// Listener and serve root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub bind_address: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Directory to serve. Defaults to the working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Accept single-file uploads via POST.
    pub allow_uploads: bool,
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Ceiling for a whole multipart request body in bytes.
    pub max_body_bytes: usize,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Append logs to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// How strictly to enforce filesystem root confinement.
    pub root_confinement: RootConfinement,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            root: None,
            allow_uploads: false,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jailserve")
        .join("config.toml")
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Set and non-empty.
fn env_value(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// An environment variable noticed by [`Config::apply_env_overrides`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOverride {
    /// The value replaced the configured one.
    Applied { var: &'static str, value: String },
    /// The value could not be parsed and was ignored.
    Ignored { var: &'static str, value: String },
}

impl EnvOverride {
    pub fn log(&self) {
        match self {
            EnvOverride::Applied { var, value } => {
                tracing::info!("Overriding from environment: {}={}", var, value)
            }
            EnvOverride::Ignored { var, value } => {
                tracing::warn!("Ignoring invalid {}: {}", var, value)
            }
        }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - JAILSERVE_PORT: Override listening port
    /// - JAILSERVE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - JAILSERVE_ALLOW_UPLOADS: Enable uploads when `1`, `true` or `yes`
    ///
    /// This runs before logging is set up, so the overrides are returned
    /// for the caller to log once a subscriber exists.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvOverride> {
        let mut notes = Vec::new();

        if let Some(port) = env_value("JAILSERVE_PORT") {
            match port.parse() {
                Ok(parsed) => {
                    self.server.port = parsed;
                    notes.push(EnvOverride::Applied { var: "JAILSERVE_PORT", value: port });
                }
                Err(_) => notes.push(EnvOverride::Ignored { var: "JAILSERVE_PORT", value: port }),
            }
        }

        if let Some(level) = env_value("JAILSERVE_LOG_LEVEL") {
            self.daemon.log_level = level.clone();
            notes.push(EnvOverride::Applied { var: "JAILSERVE_LOG_LEVEL", value: level });
        }

        if let Some(allow) = env_value("JAILSERVE_ALLOW_UPLOADS") {
            self.server.allow_uploads = parse_bool(&allow);
            notes.push(EnvOverride::Applied { var: "JAILSERVE_ALLOW_UPLOADS", value: allow });
        }

        notes
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.server.bind_address.clone(),
            ));
        }

        let max = self.upload.max_body_bytes;
        if max == 0 || max > MAX_UPLOAD_CEILING {
            return Err(ConfigError::InvalidMaxBodyBytes(max));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
