//! Error types for the statement cache.

use thiserror::Error;

/// Boxed failure reported by a [`Driver`](crate::driver::Driver) implementation.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by driver implementations.
pub type DriverResult<T> = Result<T, DriverError>;

/// The main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache was shut down.
    #[error("Statement cache is closed")]
    Closed,

    /// Two handles were parked under the same explicit key. Only ever logged;
    /// the newer handle replaces the older one.
    #[error("Cache key collision on '{key}', previous statement replaced")]
    KeyCollision { key: String },

    /// Failure reported by the underlying driver, propagated unchanged.
    #[error("Driver failure: {0}")]
    Driver(#[from] DriverError),

    /// A result set was read after its statement went back to the cache.
    #[error("Result set belongs to a previous use of this statement")]
    StaleResultSet,

    /// A keyed operation was used on a cache running in implicit mode.
    #[error("Explicit statement caching is not enabled")]
    ExplicitCachingDisabled,

    /// An explicit-mode operation was called without a cache key.
    #[error("Explicit statement caching requires a cache key")]
    ExplicitKeyRequired,

    /// A statement was executed with a parameter left unbound.
    #[error("Missing IN or OUT parameter at position {position}")]
    UnboundParameter { position: usize },

    /// Parameter positions are 1-based and limited by the statement.
    #[error("Invalid parameter index: {0}")]
    InvalidParameterIndex(usize),

    /// Column positions are 1-based and limited by the result set.
    #[error("Invalid column index: {0}")]
    InvalidColumnIndex(usize),

    /// Column access before `next()` or after the last row.
    #[error("Result set has no current row")]
    NoCurrentRow,

    /// A tuning setting was given a value the driver cannot honor.
    #[error("Invalid value {value} for setting '{name}'")]
    InvalidSetting { name: &'static str, value: u64 },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Create a key collision error for logging.
    pub fn collision(key: impl Into<String>) -> Self {
        Self::KeyCollision { key: key.into() }
    }

    /// Create an unbound parameter error.
    pub fn unbound(position: usize) -> Self {
        Self::UnboundParameter { position }
    }

    /// Whether this error came from the driver rather than the cache itself.
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
