//! Driver interface consumed by the cache.
//!
//! The cache never talks to a database itself. Preparing, executing and
//! describing statements goes through [`Driver`] and [`DriverStatement`]; the
//! cache only decides which driver statement to hand out and what client-side
//! state travels with it.
//!
//! - `memory.rs` - In-memory reference driver (`memory-driver` feature)

#[cfg(any(test, feature = "memory-driver"))]
pub mod memory;

#[cfg(any(test, feature = "memory-driver"))]
pub use memory::{MemoryDriver, MemoryError};

use crate::error::DriverResult;
use crate::key::StatementShape;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Values longer than this are sent out of band (stream binding). Text is
/// measured in characters, binary payloads in bytes.
pub const STREAM_BIND_THRESHOLD: usize = 32_766;

/// A bind parameter or column value.
///
/// Payloads are reference counted so a large value can be handed to the driver
/// and recorded in a batch without being copied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Text(Arc<str>),
    Bytes(Arc<[u8]>),
}

impl Value {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Integer(_) => std::mem::size_of::<i64>(),
            Value::Text(s) => s.len(),
            Value::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How the driver has to transfer this value.
    pub fn bind_mode(&self) -> BindMode {
        let size = match self {
            Value::Text(s) => s.chars().count(),
            other => other.len(),
        };
        if size > STREAM_BIND_THRESHOLD {
            BindMode::Stream
        } else {
            BindMode::Direct
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(Arc::from(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Arc::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Transfer mode of a bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Sent inline with the execute call.
    Direct,
    /// Too large to inline, streamed separately.
    Stream,
}

/// Per-statement tuning passed through to the driver on every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatementSettings {
    /// Rows fetched per round trip.
    pub row_prefetch: u32,
    /// Bytes of LOB data prefetched with each row.
    pub lob_prefetch_size: u32,
    /// Truncation limit for character and binary columns, 0 for none.
    pub max_field_size: u32,
    /// Seconds before the driver cancels an execution, 0 for none.
    pub query_timeout_secs: u32,
}

impl Default for StatementSettings {
    fn default() -> Self {
        Self {
            row_prefetch: 10,
            lob_prefetch_size: 4000,
            max_field_size: 0,
            query_timeout_secs: 0,
        }
    }
}

impl StatementSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs as u64)
    }
}

/// Column descriptor of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub label: String,
    pub type_name: String,
}

impl ColumnDescriptor {
    pub fn new(label: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            type_name: type_name.into(),
        }
    }
}

/// Describes the columns a statement returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    pub columns: Vec<ColumnDescriptor>,
}

impl ResultMetadata {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Label of a 1-based column.
    pub fn column_label(&self, column: usize) -> Option<&str> {
        column
            .checked_sub(1)
            .and_then(|i| self.columns.get(i))
            .map(|c| c.label.as_str())
    }
}

/// Describes the parameters a statement accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMetadata {
    pub type_names: Vec<String>,
}

impl ParameterMetadata {
    pub fn parameter_count(&self) -> usize {
        self.type_names.len()
    }

    /// Type name of a 1-based parameter.
    pub fn parameter_type_name(&self, position: usize) -> Option<&str> {
        position
            .checked_sub(1)
            .and_then(|i| self.type_names.get(i))
            .map(String::as_str)
    }
}

/// Rows produced by a query or by generated-key retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a DML or call execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub rows_affected: u64,
    /// Populated when the statement was prepared with generated-key columns.
    pub generated_keys: Option<RowSet>,
}

/// A database connection able to prepare statements.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Prepare a statement with the requested cursor shape and key columns.
    async fn prepare(
        &self,
        sql: &str,
        shape: &StatementShape,
    ) -> DriverResult<Box<dyn DriverStatement>>;

    /// Prepare a stored-procedure call.
    async fn prepare_call(&self, sql: &str) -> DriverResult<Box<dyn DriverStatement>>;
}

/// A live, driver-level prepared statement.
///
/// Holds no client-side bind state; every execution receives its values and
/// tuning settings.
#[async_trait]
pub trait DriverStatement: Send + Sync {
    /// Number of placeholders, known once the statement is prepared.
    fn parameter_count(&self) -> usize;

    async fn execute_query(
        &mut self,
        binds: &[Value],
        settings: &StatementSettings,
    ) -> DriverResult<RowSet>;

    async fn execute_update(
        &mut self,
        binds: &[Value],
        settings: &StatementSettings,
    ) -> DriverResult<UpdateOutcome>;

    /// Execute once per row, returning the per-row update counts.
    async fn execute_batch(
        &mut self,
        rows: &[Vec<Value>],
        settings: &StatementSettings,
    ) -> DriverResult<Vec<u64>>;

    /// Describe the parameters. May cost a round trip.
    async fn parameter_metadata(&mut self) -> DriverResult<ParameterMetadata>;

    /// Describe the result columns. May cost a round trip.
    async fn result_metadata(&mut self) -> DriverResult<ResultMetadata>;

    /// Release the server-side cursor.
    async fn close(&mut self) -> DriverResult<()>;
}
