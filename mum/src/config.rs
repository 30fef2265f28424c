///
/// # Context Configuration
///
/// Runtime knobs for a `Context`, loadable from a TOML file. Every key is
/// optional; missing keys fall back to `ContextConfig::default()`.
///
/// ## Example mum.toml
///
/// ```toml
/// thread_capacity = 16
/// mutex_capacity = 4
/// spinlock_capacity = 4
/// shrink_on_destroy = false
/// ```
///
/// Capacities are initial slot reservations for each registry; registries grow
/// past them on demand. With `shrink_on_destroy`, trailing inactive slots are
/// released after each destroy.
///

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    pub thread_capacity: usize,
    pub mutex_capacity: usize,
    pub spinlock_capacity: usize,
    pub shrink_on_destroy: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            thread_capacity: 8,
            mutex_capacity: 8,
            spinlock_capacity: 8,
            shrink_on_destroy: true,
        }
    }
}

impl ContextConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
