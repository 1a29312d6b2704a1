//! Engine configuration
//!
//! YAML file format (version 1):
//!
//! ```yaml
//! version: 1
//! core_version: "0.3.0"
//! strict_available: true
//! contract_mode: include   # or: match
//! log_filter: "searchkit_orchestration=debug"
//! ```
//!
//! Every field except `version` is optional. Environment overrides
//! (`SEARCHKIT_CORE_VERSION`, `SEARCHKIT_STRICT_AVAILABLE`) win over the file.

use crate::contract::ContractMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub const ENV_CORE_VERSION: &str = "SEARCHKIT_CORE_VERSION";
pub const ENV_STRICT_AVAILABLE: &str = "SEARCHKIT_STRICT_AVAILABLE";

const SUPPORTED_VERSIONS: [u32; 1] = [1];

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing version field in YAML
    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    /// Value that does not parse (environment overrides)
    #[error("Invalid value '{value}' for '{field}'. {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration result type
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// On-disk layout
#[derive(Debug, Deserialize)]
struct ConfigFileV1 {
    version: Option<u32>,
    #[serde(flatten)]
    engine: EngineConfig,
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Version checked against every `coreDependence`
    pub core_version: String,
    /// Unavailable extensions abort startup instead of being skipped
    pub strict_available: bool,
    pub contract_mode: ContractMode,
    /// `EnvFilter` directive; `RUST_LOG` applies when unset
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            core_version: env!("CARGO_PKG_VERSION").to_string(),
            strict_available: false,
            contract_mode: ContractMode::Include,
            log_filter: None,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        debug!("Loaded engine config from {}", path.as_ref().display());
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        // Version check
        let version = file.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        Ok(file.engine)
    }

    /// Defaults plus process environment overrides
    pub fn from_env() -> ConfigResult<Self> {
        Self::default().with_env()
    }

    /// Apply process environment overrides
    pub fn with_env(self) -> ConfigResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary `key -> value` lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(core) = lookup(ENV_CORE_VERSION) {
            self.core_version = core;
        }

        if let Some(raw) = lookup(ENV_STRICT_AVAILABLE) {
            self.strict_available = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: ENV_STRICT_AVAILABLE.to_string(),
                        value: raw,
                        hint: "Use true/false, 1/0, yes/no or on/off.".to_string(),
                    })
                }
            };
        }

        Ok(self)
    }
}
