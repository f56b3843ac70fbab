//! Dispute service configuration
//!
//! Loaded from TOML or JSON, every field has a default. Environment
//! variables prefixed `ARBITER_` override the file.

use arbiter_core::SupportKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// Config path
        path: PathBuf,
        /// I/O error text
        message: String,
    },
    /// File could not be parsed
    #[error("invalid config: {message}")]
    Invalid {
        /// Parser or validation message
        message: String,
    },
}

/// System message texts inserted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemTexts {
    /// Opening message on the opener's record
    pub opened: String,
    /// Opening message on the mirrored record
    pub peer_opened: String,
    /// Message appended when a dispute is reopened
    pub reopened: String,
    /// Prefix of the agent-only prior mediation summary
    pub prior_mediator_summary: String,
}

impl Default for SystemTexts {
    fn default() -> Self {
        Self {
            opened: "You opened a dispute. The agent will contact you shortly.".to_string(),
            peer_opened: "Your trading peer opened a dispute. The agent will contact you shortly."
                .to_string(),
            reopened: "The dispute was reopened.".to_string(),
            prior_mediator_summary: "Summary of the prior mediation:".to_string(),
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSON file holding the dispute list; in-memory if unset
    pub path: Option<PathBuf>,
    /// Quiet period before a requested write is flushed
    pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            debounce_ms: 200,
        }
    }
}

impl PersistenceConfig {
    /// Debounce as a duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Dispute service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisputeConfig {
    /// Kind of dispute this node handles
    pub support_kind: SupportKind,
    /// Agent-side delay before the mirror is sent
    pub mirror_delay_ms: u64,
    /// Capacity of the single-writer command queue
    pub command_buffer: usize,
    /// Persistence settings
    pub persistence: PersistenceConfig,
    /// System message texts
    pub texts: SystemTexts,
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            support_kind: SupportKind::Arbitration,
            mirror_delay_ms: 100,
            command_buffer: 256,
            persistence: PersistenceConfig::default(),
            texts: SystemTexts::default(),
        }
    }
}

impl DisputeConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Invalid {
            message: format!("Invalid TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::Invalid {
                message: format!("Invalid TOML: {e}"),
            })?,
            Some("json") => serde_json::from_str(&content).map_err(|e| ConfigError::Invalid {
                message: format!("Invalid JSON: {e}"),
            })?,
            _ => {
                return Err(ConfigError::Invalid {
                    message: "Unsupported file format".to_string(),
                })
            }
        };
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ARBITER_MIRROR_DELAY_MS` and `ARBITER_STORE_PATH`
    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(delay) = std::env::var("ARBITER_MIRROR_DELAY_MS") {
            self.mirror_delay_ms = delay.parse().map_err(|_| ConfigError::Invalid {
                message: "Invalid number in ARBITER_MIRROR_DELAY_MS".to_string(),
            })?;
        }
        if let Ok(path) = std::env::var("ARBITER_STORE_PATH") {
            self.persistence.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_buffer == 0 {
            return Err(ConfigError::Invalid {
                message: "command_buffer must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Mirror delay as a duration
    pub fn mirror_delay(&self) -> Duration {
        Duration::from_millis(self.mirror_delay_ms)
    }

    /// Config with no artificial delays, for tests and simulations
    pub fn immediate() -> Self {
        Self {
            mirror_delay_ms: 0,
            persistence: PersistenceConfig {
                path: None,
                debounce_ms: 0,
            },
            ..Self::default()
        }
    }
}
