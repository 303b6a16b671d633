//! Result set cursor.
//!
//! A [`ResultSet`] remembers the use generation of the statement that produced
//! it. Parking the statement bumps the generation, so every cursor handed out
//! before the park (including clones the caller kept) fails with
//! [`CacheError::StaleResultSet`] from then on.

use crate::driver::{ColumnDescriptor, RowSet, Value};
use crate::error::{CacheError, CacheResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Forward cursor over rows returned by the driver.
#[derive(Debug, Clone)]
pub struct ResultSet {
    rows: Arc<RowSet>,
    /// Index of the current row, `None` before the first `next()`.
    position: Option<usize>,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl ResultSet {
    pub(crate) fn new(rows: RowSet, current: Arc<AtomicU64>) -> Self {
        let generation = current.load(Ordering::Acquire);
        Self {
            rows: Arc::new(rows),
            position: None,
            generation,
            current,
        }
    }

    /// Whether the producing statement has been parked since this cursor was created.
    pub fn is_stale(&self) -> bool {
        self.current.load(Ordering::Acquire) != self.generation
    }

    fn ensure_live(&self) -> CacheResult<()> {
        if self.is_stale() {
            return Err(CacheError::StaleResultSet);
        }
        Ok(())
    }

    /// Drop the row data, keeping the cursor around so reads report staleness.
    pub(crate) fn release_rows(&mut self) {
        self.rows = Arc::new(RowSet::default());
        self.position = None;
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> CacheResult<bool> {
        self.ensure_live()?;
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            self.position = Some(self.rows.len());
            Ok(false)
        }
    }

    pub fn columns(&self) -> CacheResult<&[ColumnDescriptor]> {
        self.ensure_live()?;
        Ok(&self.rows.columns)
    }

    /// Total rows in the cursor.
    pub fn row_count(&self) -> CacheResult<usize> {
        self.ensure_live()?;
        Ok(self.rows.len())
    }

    /// Value of a 1-based column in the current row.
    pub fn get(&self, column: usize) -> CacheResult<&Value> {
        self.ensure_live()?;
        let row = self
            .position
            .and_then(|p| self.rows.rows.get(p))
            .ok_or(CacheError::NoCurrentRow)?;
        column
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .ok_or(CacheError::InvalidColumnIndex(column))
    }

    pub fn get_string(&self, column: usize) -> CacheResult<Option<String>> {
        Ok(match self.get(column)? {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Text(s) => Some(s.to_string()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        })
    }

    pub fn get_i64(&self, column: usize) -> CacheResult<Option<i64>> {
        Ok(self.get(column)?.as_i64())
    }
}
