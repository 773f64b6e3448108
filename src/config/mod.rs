pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;
use crate::stream::{NdjsonOptions, SseOptions};

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// How request and tool-call identifiers are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    #[default]
    Sequential,
    Random,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::Sequential => write!(f, "sequential"),
            IdKind::Random => write!(f, "random"),
        }
    }
}

/// Identifier generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdsConfig {
    #[serde(default)]
    pub kind: IdKind,
    #[serde(default = "default_request_prefix")]
    pub request_prefix: String,
    #[serde(default = "default_call_prefix")]
    pub call_prefix: String,
}

fn default_request_prefix() -> String {
    "req".to_string()
}
fn default_call_prefix() -> String {
    "call".to_string()
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self {
            kind: IdKind::default(),
            request_prefix: default_request_prefix(),
            call_prefix: default_call_prefix(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sse: SseOptions,
    #[serde(default)]
    pub ndjson: NdjsonOptions,
    #[serde(default)]
    pub ids: IdsConfig,
}

impl StreamConfig {
    /// Parse and validate configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] when parsing fails or
    /// [`ConfigError::Validation`] when semantic validation fails.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a defaulted struct.
        let config: StreamConfig = if contents.trim().is_empty() {
            StreamConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        validate_config(&config)?;
        Ok(config)
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: impl AsRef<std::path::Path>) -> Result<StreamConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    StreamConfig::from_yaml_str(&contents)
}
