//! Session configuration
//!
//! All tunables live on an explicit [`SessionConfig`] constructed by the
//! embedding application and passed to the controller. There is no
//! process-wide configuration state.

pub mod defaults;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for one scheduling session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Default architecture tag used when `start` is given none
    #[serde(default = "default_arch")]
    pub arch: String,

    /// Milliseconds a node stays in the transitional busy state before
    /// reporting ready (simulated clusters only)
    #[serde(default = "default_ready_delay")]
    pub node_ready_delay_ms: u64,

    /// Build slots per host for simulated clusters
    #[serde(default = "default_slots")]
    pub slots_per_host: u32,
}

fn default_arch() -> String {
    defaults::DEFAULT_ARCH.to_string()
}

fn default_ready_delay() -> u64 {
    defaults::NODE_READY_DELAY_MS
}

fn default_slots() -> u32 {
    defaults::DEFAULT_SLOTS_PER_HOST
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            arch: default_arch(),
            node_ready_delay_ms: default_ready_delay(),
            slots_per_host: default_slots(),
        }
    }
}

impl SessionConfig {
    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arch.is_empty() {
            return Err(ConfigError::Invalid {
                message: "arch must not be empty".to_string(),
            });
        }
        if self.slots_per_host == 0 {
            return Err(ConfigError::Invalid {
                message: "slots_per_host must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
