//! Engine configuration.
//!
//! Loaded from TOML, e.g.
//!
//! ```toml
//! event_failure_strategy = "ContinueOnError"
//! suppress_prefixes = ["Get", "List"]
//!
//! [default_options]
//! is_read_only = false
//! isolation_level = "ReadCommitted"
//! timeout_ms = 30000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{UnitOfWorkError, UowResult};
use crate::lifecycle::EventFailureStrategy;
use crate::options::UnitOfWorkOptions;

/// Configuration shared by every unit of work of a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOfWorkConfig {
    /// Whether request scoping opens a unit of work when the action does not say.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How save hook failures are handled.
    #[serde(default)]
    pub event_failure_strategy: EventFailureStrategy,

    /// Action-name prefixes that force `Scope::Suppress`.
    #[serde(default)]
    pub suppress_prefixes: Vec<String>,

    /// Options used when a request declares none.
    #[serde(default)]
    pub default_options: UnitOfWorkOptions,
}

fn default_enabled() -> bool {
    true
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            event_failure_strategy: EventFailureStrategy::default(),
            suppress_prefixes: Vec::new(),
            default_options: UnitOfWorkOptions::default(),
        }
    }
}

impl UnitOfWorkConfig {
    pub fn from_toml_str(content: &str) -> UowResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> UowResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            UnitOfWorkError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml(&self) -> UowResult<String> {
        toml::to_string_pretty(self).map_err(|err| UnitOfWorkError::Config(err.to_string()))
    }

    pub fn validate(&self) -> UowResult<()> {
        if self.suppress_prefixes.iter().any(|prefix| prefix.is_empty()) {
            return Err(UnitOfWorkError::Config(
                "suppress_prefixes must not contain empty prefixes".to_string(),
            ));
        }
        if self.default_options.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(UnitOfWorkError::Config(
                "default_options.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// True when `action` starts with one of the suppression prefixes.
    pub fn is_suppressed_action(&self, action: &str) -> bool {
        self.suppress_prefixes
            .iter()
            .any(|prefix| action.starts_with(prefix.as_str()))
    }
}
