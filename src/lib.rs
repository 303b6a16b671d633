//! # stmtcache
//!
//! Client-side prepared-statement cache.
//!
//! A [`StatementClient`] sits between application code and a [`Driver`] and
//! keeps prepared statements alive between uses, so a repeated statement
//! skips the prepare round trip and serves its descriptors from memory.
//!
//! ## Modes
//!
//! | Mode       | Key                        | Bound           | Reuse                      |
//! |------------|----------------------------|-----------------|----------------------------|
//! | `Implicit` | SQL text + statement shape | LRU, `capacity` | automatic on `prepare`     |
//! | `Explicit` | caller-chosen string       | unbounded       | `close_with_key` + lookups |
//!
//! ## Quick Example
//!
//! With the `memory-driver` feature:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stmtcache::{CacheConfig, MemoryDriver, StatementClient};
//!
//! let client = StatementClient::new(Arc::new(MemoryDriver::new()), CacheConfig::implicit(20));
//!
//! let mut stmt = client.prepare("select * from dual where dummy = ?").await?;
//! stmt.set_row_prefetch(1000)?;
//! stmt.bind(1, "X")?;
//! stmt.execute_query().await?;
//! stmt.close().await?;
//!
//! // Same statement, same settings, binds cleared.
//! let stmt = client.prepare("select * from dual where dummy = ?").await?;
//! assert_eq!(stmt.row_prefetch(), 1000);
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod key;
pub mod lifecycle;
pub mod mode;
pub mod result;

pub use cache::{CacheStats, ParkOutcome, StatementCache};
pub use client::{CachedStatement, StatementClient};
pub use config::CacheConfig;
pub use driver::{
    BindMode, Driver, DriverStatement, STREAM_BIND_THRESHOLD, StatementSettings, Value,
};
#[cfg(any(test, feature = "memory-driver"))]
pub use driver::{MemoryDriver, MemoryError};
pub use error::{CacheError, CacheResult, DriverError, DriverResult};
pub use handle::{HandleState, StatementHandle, UpdateCount};
pub use key::{CacheKey, Concurrency, ResultSetType, StatementKind, StatementShape};
pub use lifecycle::StatementLifecycle;
pub use mode::{CacheMode, Release};
pub use result::ResultSet;
