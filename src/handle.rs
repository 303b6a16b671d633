//! Cached statement handle.
//!
//! A [`StatementHandle`] owns one live driver statement plus all client-side
//! state that can ride along with it: binds, batches, tuning settings, update
//! count, generated keys, the current result set and cached descriptors.
//! What survives a trip through the cache is decided by
//! [`StatementLifecycle`](crate::lifecycle::StatementLifecycle); this module
//! only provides the state and the operations on it.

use crate::driver::{
    BindMode, DriverStatement, ParameterMetadata, ResultMetadata, RowSet, StatementSettings, Value,
};
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, Concurrency, ResultSetType, StatementKind, StatementShape};
use crate::result::ResultSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Position of a handle in its lifecycle.
///
/// `Created → Bound → Executed → {Parked | Destroyed}`, and
/// `Parked → CheckedOut → Bound → ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Created,
    Bound,
    Executed,
    Parked,
    CheckedOut,
    Destroyed,
}

/// Update count as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCount {
    /// Nothing executed on this handle yet (raw `0`).
    NotExecuted,
    /// Rows affected by the last execution, not yet reported (raw `n`).
    Rows(u64),
    /// Already reported, or the last execution was a query (raw `-1`).
    Consumed,
}

impl UpdateCount {
    /// JDBC-style integer form. Counts beyond `i64::MAX` saturate.
    pub fn as_raw(&self) -> i64 {
        match self {
            UpdateCount::NotExecuted => 0,
            UpdateCount::Rows(n) => i64::try_from(*n).unwrap_or(i64::MAX),
            UpdateCount::Consumed => -1,
        }
    }
}

/// A live driver statement plus cache bookkeeping.
pub struct StatementHandle {
    key: Option<CacheKey>,
    sql: Arc<str>,
    shape: StatementShape,
    statement: Box<dyn DriverStatement>,
    state: HandleState,
    settings: StatementSettings,
    binds: Vec<Option<Value>>,
    last_bound_parameter_count: usize,
    batch: Vec<Vec<Value>>,
    last_batch: Vec<Vec<Value>>,
    update_count: UpdateCount,
    generated_keys: Option<RowSet>,
    result: Option<ResultSet>,
    /// Bumped on every park; outstanding result sets compare against it.
    generation: Arc<AtomicU64>,
    parameter_metadata: Option<Arc<ParameterMetadata>>,
    result_metadata: Option<Arc<ResultMetadata>>,
    checkouts: u64,
}

impl fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("key", &self.key)
            .field("sql", &self.sql)
            .field("shape", &self.shape)
            .field("state", &self.state)
            .field("settings", &self.settings)
            .field("update_count", &self.update_count)
            .field("checkouts", &self.checkouts)
            .finish_non_exhaustive()
    }
}

impl StatementHandle {
    pub(crate) fn new(
        sql: &str,
        shape: StatementShape,
        statement: Box<dyn DriverStatement>,
        settings: StatementSettings,
    ) -> Self {
        Self {
            key: None,
            sql: Arc::from(sql),
            shape,
            statement,
            state: HandleState::Created,
            settings,
            binds: Vec::new(),
            last_bound_parameter_count: 0,
            batch: Vec::new(),
            last_batch: Vec::new(),
            update_count: UpdateCount::NotExecuted,
            generated_keys: None,
            result: None,
            generation: Arc::new(AtomicU64::new(0)),
            parameter_metadata: None,
            result_metadata: None,
            checkouts: 0,
        }
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn shape(&self) -> &StatementShape {
        &self.shape
    }

    pub fn kind(&self) -> StatementKind {
        self.shape.kind
    }

    pub fn result_set_type(&self) -> ResultSetType {
        self.shape.result_set_type
    }

    pub fn concurrency(&self) -> Concurrency {
        self.shape.concurrency
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != HandleState::Destroyed
    }

    /// Times this handle has been taken out of the cache.
    pub fn checkouts(&self) -> u64 {
        self.checkouts
    }

    pub fn parameter_count(&self) -> usize {
        self.statement.parameter_count()
    }

    /// Values sent with the most recent execution.
    pub fn last_bound_parameter_count(&self) -> usize {
        self.last_bound_parameter_count
    }

    // ---- tuning settings ----

    pub fn settings(&self) -> StatementSettings {
        self.settings
    }

    pub fn row_prefetch(&self) -> u32 {
        self.settings.row_prefetch
    }

    pub fn set_row_prefetch(&mut self, rows: u32) -> CacheResult<()> {
        if rows == 0 {
            return Err(CacheError::InvalidSetting {
                name: "row_prefetch",
                value: 0,
            });
        }
        self.settings.row_prefetch = rows;
        Ok(())
    }

    pub fn lob_prefetch_size(&self) -> u32 {
        self.settings.lob_prefetch_size
    }

    pub fn set_lob_prefetch_size(&mut self, bytes: u32) {
        self.settings.lob_prefetch_size = bytes;
    }

    pub fn max_field_size(&self) -> u32 {
        self.settings.max_field_size
    }

    pub fn set_max_field_size(&mut self, bytes: u32) {
        self.settings.max_field_size = bytes;
    }

    pub fn query_timeout(&self) -> Duration {
        self.settings.query_timeout()
    }

    /// Set the query timeout, whole seconds only.
    pub fn set_query_timeout(&mut self, timeout: Duration) -> CacheResult<()> {
        let secs = timeout.as_secs();
        self.settings.query_timeout_secs =
            u32::try_from(secs).map_err(|_| CacheError::InvalidSetting {
                name: "query_timeout",
                value: secs,
            })?;
        Ok(())
    }

    // ---- binding ----

    /// Bind a value to a 1-based parameter position.
    pub fn bind(&mut self, position: usize, value: impl Into<Value>) -> CacheResult<()> {
        let count = self.parameter_count();
        if position == 0 || position > count {
            return Err(CacheError::InvalidParameterIndex(position));
        }
        if self.binds.len() < count {
            self.binds.resize(count, None);
        }

        let value = value.into();
        if value.bind_mode() == BindMode::Stream {
            tracing::trace!(position, bytes = value.len(), "stream binding parameter");
        }
        self.binds[position - 1] = Some(value);
        self.state = HandleState::Bound;
        Ok(())
    }

    pub fn clear_parameters(&mut self) {
        self.binds.clear();
    }

    /// Whether a parameter is currently bound.
    pub fn is_bound(&self, position: usize) -> bool {
        position
            .checked_sub(1)
            .and_then(|i| self.binds.get(i))
            .is_some_and(Option::is_some)
    }

    /// Transfer mode of a bound parameter.
    pub fn bind_mode(&self, position: usize) -> Option<BindMode> {
        position
            .checked_sub(1)
            .and_then(|i| self.binds.get(i))
            .and_then(Option::as_ref)
            .map(Value::bind_mode)
    }

    fn bound_values(&self) -> CacheResult<Vec<Value>> {
        (0..self.parameter_count())
            .map(|i| {
                self.binds
                    .get(i)
                    .cloned()
                    .flatten()
                    .ok_or_else(|| CacheError::unbound(i + 1))
            })
            .collect()
    }

    // ---- execution ----

    /// Run the statement as a query. The cursor stays reachable through
    /// [`result_set`](Self::result_set) until the next execution or park.
    pub async fn execute_query(&mut self) -> CacheResult<&mut ResultSet> {
        let values = self.bound_values()?;
        let rows = self.statement.execute_query(&values, &self.settings).await?;

        if self.result_metadata.is_none() && !rows.columns.is_empty() {
            self.result_metadata = Some(Arc::new(ResultMetadata {
                columns: rows.columns.clone(),
            }));
        }

        self.last_bound_parameter_count = values.len();
        self.update_count = UpdateCount::Consumed;
        self.generated_keys = None;
        self.state = HandleState::Executed;
        Ok(self
            .result
            .insert(ResultSet::new(rows, self.generation.clone())))
    }

    /// Run the statement as DML and return the affected row count.
    pub async fn execute_update(&mut self) -> CacheResult<u64> {
        let values = self.bound_values()?;
        let outcome = self.statement.execute_update(&values, &self.settings).await?;

        self.last_bound_parameter_count = values.len();
        self.update_count = UpdateCount::Rows(outcome.rows_affected);
        self.generated_keys = outcome.generated_keys;
        self.result = None;
        self.state = HandleState::Executed;
        Ok(outcome.rows_affected)
    }

    /// Run a stored-procedure call (or any statement returning no rows).
    pub async fn execute(&mut self) -> CacheResult<u64> {
        self.execute_update().await
    }

    /// Queue the current binds as one batch row. Binds stay in place so only
    /// changed positions need rebinding.
    pub fn add_batch(&mut self) -> CacheResult<()> {
        let values = self.bound_values()?;
        self.batch.push(values);
        Ok(())
    }

    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    /// Rows queued for the next [`execute_batch`](Self::execute_batch).
    pub fn pending_batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Execute all queued rows. An empty batch is a no-op and costs no round trip.
    pub async fn execute_batch(&mut self) -> CacheResult<Vec<u64>> {
        if self.batch.is_empty() {
            return Ok(Vec::new());
        }

        let rows = std::mem::take(&mut self.batch);
        let counts = self.statement.execute_batch(&rows, &self.settings).await?;

        self.last_bound_parameter_count = rows.first().map_or(0, Vec::len);
        self.update_count = UpdateCount::Rows(counts.iter().sum());
        self.generated_keys = None;
        self.result = None;
        self.last_batch = rows;
        self.state = HandleState::Executed;
        Ok(counts)
    }

    // ---- results ----

    /// Report the update count. A pending count is reported once, after
    /// which it reads as [`UpdateCount::Consumed`].
    pub fn update_count(&mut self) -> UpdateCount {
        let current = self.update_count;
        if let UpdateCount::Rows(_) = current {
            self.update_count = UpdateCount::Consumed;
        }
        current
    }

    /// Keys generated by the last execution, empty when there are none.
    pub fn generated_keys(&self) -> ResultSet {
        ResultSet::new(
            self.generated_keys.clone().unwrap_or_default(),
            self.generation.clone(),
        )
    }

    /// Cursor of the last query, if any. After a park the cursor is stale.
    pub fn result_set(&mut self) -> Option<&mut ResultSet> {
        self.result.as_mut()
    }

    // ---- metadata ----

    /// Parameter descriptors, fetched once per handle and kept across reuse.
    pub async fn parameter_metadata(&mut self) -> CacheResult<Arc<ParameterMetadata>> {
        if let Some(meta) = &self.parameter_metadata {
            return Ok(meta.clone());
        }
        let meta = Arc::new(self.statement.parameter_metadata().await?);
        self.parameter_metadata = Some(meta.clone());
        Ok(meta)
    }

    /// Result column descriptors, fetched once per handle and kept across reuse.
    pub async fn metadata(&mut self) -> CacheResult<Arc<ResultMetadata>> {
        if let Some(meta) = &self.result_metadata {
            return Ok(meta.clone());
        }
        let meta = Arc::new(self.statement.result_metadata().await?);
        self.result_metadata = Some(meta.clone());
        Ok(meta)
    }

    // ---- lifecycle hooks ----

    pub(crate) fn set_key(&mut self, key: CacheKey) {
        self.key = Some(key);
    }

    pub(crate) fn mark_parked(&mut self) {
        self.state = HandleState::Parked;
    }

    pub(crate) fn mark_checked_out(&mut self) {
        self.checkouts += 1;
        self.state = HandleState::CheckedOut;
    }

    /// Make every cursor handed out so far stale and drop its rows.
    pub(crate) fn invalidate_results(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(rs) = self.result.as_mut() {
            rs.release_rows();
        }
    }

    pub(crate) fn reset_update_count(&mut self) {
        self.update_count = UpdateCount::NotExecuted;
    }

    pub(crate) fn forget_generated_keys(&mut self) {
        self.generated_keys = None;
    }

    pub(crate) fn discard_batches(&mut self) {
        self.batch.clear();
        self.last_batch.clear();
    }

    /// Queue the last executed batch again unless rows are already pending.
    /// Batches carrying stream-bound values are dropped instead. Returns the
    /// number of queued rows.
    pub(crate) fn rearm_batch(&mut self) -> usize {
        if self.batch.is_empty() {
            self.batch = std::mem::take(&mut self.last_batch);
        } else {
            self.last_batch.clear();
        }

        let streamed = self
            .batch
            .iter()
            .flatten()
            .any(|v| v.bind_mode() == BindMode::Stream);
        if streamed {
            tracing::debug!(
                sql = %self.sql,
                rows = self.batch.len(),
                "dropping stream-bound batch"
            );
            self.batch.clear();
        }
        self.batch.len()
    }

    /// Close the driver statement. The handle is gone afterwards whether or
    /// not the driver reports success.
    pub async fn destroy(mut self) -> CacheResult<()> {
        self.state = HandleState::Destroyed;
        self.invalidate_results();
        self.clear_parameters();
        self.discard_batches();
        self.statement.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, MemoryDriver};

    async fn handle(driver: &MemoryDriver, sql: &str) -> StatementHandle {
        let shape = StatementShape::default();
        let statement = driver.prepare(sql, &shape).await.unwrap();
        StatementHandle::new(sql, shape, statement, StatementSettings::default())
    }

    #[test]
    fn test_raw_update_count_saturates() {
        assert_eq!(UpdateCount::Rows(7).as_raw(), 7);
        assert_eq!(UpdateCount::Rows(u64::MAX).as_raw(), i64::MAX);
        assert_eq!(UpdateCount::Consumed.as_raw(), -1);
    }

    #[tokio::test]
    async fn test_bind_positions() {
        let driver = MemoryDriver::new();
        let mut h = handle(&driver, "select * from dual where dummy = ?").await;

        assert!(matches!(h.bind(0, "X"), Err(CacheError::InvalidParameterIndex(0))));
        assert!(matches!(h.bind(2, "X"), Err(CacheError::InvalidParameterIndex(2))));
        h.bind(1, "X").unwrap();
        assert!(h.is_bound(1));
        assert_eq!(h.bind_mode(1), Some(BindMode::Direct));
        assert_eq!(h.state(), HandleState::Bound);
    }

    #[tokio::test]
    async fn test_unbound_execution_fails_without_round_trip() {
        let driver = MemoryDriver::new();
        let mut h = handle(&driver, "select * from dual where dummy = ?").await;
        let before = driver.round_trips();

        let err = h.execute_query().await.unwrap_err();
        assert!(matches!(err, CacheError::UnboundParameter { position: 1 }));
        assert_eq!(driver.round_trips(), before);
    }

    #[tokio::test]
    async fn test_update_count_is_reported_once() {
        let driver = MemoryDriver::new();
        driver.create_table("t1", &["c1", "c2"]).await;
        let mut h = handle(&driver, "insert into t1(c2) values (?)").await;

        assert_eq!(h.update_count(), UpdateCount::NotExecuted);
        h.bind(1, "X").unwrap();
        assert_eq!(h.execute_update().await.unwrap(), 1);
        assert_eq!(h.update_count(), UpdateCount::Rows(1));
        assert_eq!(h.update_count().as_raw(), -1);
    }

    #[tokio::test]
    async fn test_settings_validation() {
        let driver = MemoryDriver::new();
        let mut h = handle(&driver, "select * from dual").await;

        assert!(h.set_row_prefetch(0).is_err());
        h.set_row_prefetch(1000).unwrap();
        h.set_query_timeout(Duration::from_secs(100)).unwrap();
        assert_eq!(h.row_prefetch(), 1000);
        assert_eq!(h.query_timeout(), Duration::from_secs(100));

        h.execute_query().await.unwrap();
        assert_eq!(driver.last_settings().await.unwrap().row_prefetch, 1000);
    }

    #[tokio::test]
    async fn test_metadata_is_fetched_once() {
        let driver = MemoryDriver::new();
        let mut h = handle(&driver, "select * from dual where dummy = ?").await;

        let first = h.parameter_metadata().await.unwrap();
        let trips = driver.round_trips();
        let second = h.parameter_metadata().await.unwrap();

        assert_eq!(driver.round_trips(), trips);
        assert_eq!(first, second);
        assert_eq!(second.parameter_type_name(1), Some("VARCHAR2"));
    }

    #[tokio::test]
    async fn test_query_populates_result_metadata() {
        let driver = MemoryDriver::new();
        let mut h = handle(&driver, "select * from dual").await;
        h.execute_query().await.unwrap();

        let trips = driver.round_trips();
        let meta = h.metadata().await.unwrap();
        assert_eq!(meta.column_label(1), Some("DUMMY"));
        assert_eq!(driver.round_trips(), trips);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let driver = MemoryDriver::new();
        driver.create_table("t1", &["c1", "c2"]).await;
        let mut h = handle(&driver, "insert into t1(c2) values (?)").await;
        let trips = driver.round_trips();

        assert!(h.execute_batch().await.unwrap().is_empty());
        assert_eq!(driver.round_trips(), trips);
    }

    #[tokio::test]
    async fn test_rearm_drops_streamed_batch() {
        let driver = MemoryDriver::new();
        driver.create_table("t1", &["c1", "c2"]).await;
        let mut h = handle(&driver, "insert into t1(c2) values (?)").await;

        h.bind(1, "b".repeat(crate::driver::STREAM_BIND_THRESHOLD + 1)).unwrap();
        h.add_batch().unwrap();
        h.execute_batch().await.unwrap();

        assert_eq!(h.rearm_batch(), 0);
    }
}
