//! Cache configuration

use crate::driver::StatementSettings;
use crate::error::{CacheError, CacheResult};
use crate::mode::CacheMode;
use serde::Deserialize;

/// Statement cache configuration
///
/// ```toml
/// mode = "implicit"
/// capacity = 20
///
/// [defaults]
/// row_prefetch = 10
/// query_timeout_secs = 30
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Caching policy
    pub mode: CacheMode,

    /// Parked statements kept in implicit mode, 0 disables parking
    pub capacity: usize,

    /// Settings a freshly prepared statement starts with
    pub defaults: StatementSettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Implicit,
            capacity: 20,
            defaults: StatementSettings::default(),
        }
    }
}

impl CacheConfig {
    /// Implicit caching with the given capacity
    pub fn implicit(capacity: usize) -> Self {
        Self {
            mode: CacheMode::Implicit,
            capacity,
            ..Self::default()
        }
    }

    /// Explicit, caller-keyed caching
    pub fn explicit() -> Self {
        Self {
            mode: CacheMode::Explicit,
            ..Self::default()
        }
    }

    /// Set the implicit-mode capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the starting settings of new statements
    pub fn defaults(mut self, defaults: StatementSettings) -> Self {
        self.defaults = defaults;
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(input: &str) -> CacheResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| CacheError::Config(e.to_string()))?;
        if config.defaults.row_prefetch == 0 {
            return Err(CacheError::Config(
                "defaults.row_prefetch must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
