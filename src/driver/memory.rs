//! In-memory reference driver.
//!
//! Understands just enough SQL to exercise a statement cache end to end:
//!
//! - `insert into <table> [(<columns>)] values (<?|literal>, ...)`
//! - `select count(*) from <table>` and `select ... from <table>` (no filtering)
//! - `begin <procedure>(...); end;` for procedures registered with
//!   [`MemoryDriver::register_procedure`]
//!
//! Every call that would reach a server is counted as a round trip, and
//! statement open/close counts are tracked so tests can observe eviction.

use super::{
    ColumnDescriptor, Driver, DriverStatement, ParameterMetadata, ResultMetadata, RowSet,
    StatementSettings, UpdateOutcome, Value,
};
use crate::error::DriverResult;
use crate::key::StatementShape;
use async_trait::async_trait;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while1},
    character::complete::{anychar, char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize, value, verify},
    multi::{fold_many0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by [`MemoryDriver`].
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("table or view does not exist: {0}")]
    TableNotFound(String),

    #[error("procedure does not exist: {0}")]
    ProcedureNotFound(String),

    #[error("invalid column name: {0}")]
    ColumnNotFound(String),

    #[error("missing IN or OUT parameter: expected {expected}, got {got}")]
    MissingParameter { expected: usize, got: usize },

    #[error("statement is closed")]
    StatementClosed,

    #[error("unsupported statement: {0}")]
    Unsupported(String),

    #[error("simulated close failure")]
    CloseFailed,
}

struct Table {
    columns: Vec<String>,
    identity: bool,
    rows: Vec<Vec<Value>>,
    next_identity: i64,
}

impl Table {
    fn new(columns: Vec<String>, identity: bool) -> Self {
        Self {
            columns,
            identity,
            rows: Vec::new(),
            next_identity: 1,
        }
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    fn descriptors(&self) -> Vec<ColumnDescriptor> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let type_name = if i == 0 && self.identity { "NUMBER" } else { "VARCHAR2" };
                ColumnDescriptor::new(c.to_uppercase(), type_name)
            })
            .collect()
    }

    /// Insert a row and return it as stored.
    fn insert(
        &mut self,
        columns: Option<&[String]>,
        values: Vec<Value>,
    ) -> Result<Vec<Value>, MemoryError> {
        let mut row = vec![Value::Null; self.columns.len()];
        let first_free = usize::from(self.identity);

        match columns {
            Some(names) => {
                for (name, value) in names.iter().zip(values) {
                    let idx = self
                        .column_index(name)
                        .ok_or_else(|| MemoryError::ColumnNotFound(name.clone()))?;
                    row[idx] = value;
                }
            }
            None => {
                for (slot, value) in row.iter_mut().skip(first_free).zip(values) {
                    *slot = value;
                }
            }
        }

        if self.identity && row[0].is_null() {
            row[0] = Value::Integer(self.next_identity);
            self.next_identity += 1;
        }

        self.rows.push(row.clone());
        Ok(row)
    }
}

#[derive(Default)]
struct Catalog {
    tables: HashMap<String, Table>,
    /// Procedure name to (table, column) it inserts into.
    procedures: HashMap<String, (String, String)>,
    last_settings: Option<StatementSettings>,
}

#[derive(Default)]
struct MemoryState {
    catalog: Mutex<Catalog>,
    round_trips: AtomicU64,
    prepared: AtomicU64,
    closed: AtomicU64,
    fail_close: AtomicBool,
}

impl MemoryState {
    fn round_trip(&self) {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
    }
}

/// A driver backed by in-process tables.
///
/// # Example
/// ```ignore
/// let driver = MemoryDriver::new();
/// driver.create_table("t1", &["c1", "c2"]).await;
/// let client = StatementClient::new(Arc::new(driver.clone()), CacheConfig::implicit(20));
/// ```
#[derive(Clone)]
pub struct MemoryDriver {
    state: Arc<MemoryState>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Create a driver with the single-row `dual` table.
    pub fn new() -> Self {
        let mut catalog = Catalog::default();
        let mut dual = Table::new(vec!["dummy".to_string()], false);
        dual.rows.push(vec![Value::from("X")]);
        catalog.tables.insert("dual".to_string(), dual);

        Self {
            state: Arc::new(MemoryState {
                catalog: Mutex::new(catalog),
                ..MemoryState::default()
            }),
        }
    }

    /// Create (or replace) a table. The first column is an identity column
    /// filled on insert when left null.
    pub async fn create_table(&self, name: &str, columns: &[&str]) {
        let columns = columns.iter().map(|c| c.to_lowercase()).collect();
        let mut catalog = self.state.catalog.lock().await;
        catalog
            .tables
            .insert(name.to_lowercase(), Table::new(columns, true));
    }

    /// Drop a table, returning whether it existed.
    pub async fn drop_table(&self, name: &str) -> bool {
        let mut catalog = self.state.catalog.lock().await;
        catalog.tables.remove(&name.to_lowercase()).is_some()
    }

    /// Register a procedure whose single argument is inserted into `table.column`.
    pub async fn register_procedure(&self, name: &str, table: &str, column: &str) {
        let mut catalog = self.state.catalog.lock().await;
        catalog.procedures.insert(
            name.to_lowercase(),
            (table.to_lowercase(), column.to_lowercase()),
        );
    }

    /// Snapshot of a table's rows.
    pub async fn rows(&self, table: &str) -> Option<Vec<Vec<Value>>> {
        let catalog = self.state.catalog.lock().await;
        catalog.tables.get(&table.to_lowercase()).map(|t| t.rows.clone())
    }

    pub async fn row_count(&self, table: &str) -> Option<usize> {
        let catalog = self.state.catalog.lock().await;
        catalog.tables.get(&table.to_lowercase()).map(|t| t.rows.len())
    }

    /// Settings received by the most recent execution.
    pub async fn last_settings(&self) -> Option<StatementSettings> {
        self.state.catalog.lock().await.last_settings
    }

    /// Calls that would have reached the server.
    pub fn round_trips(&self) -> u64 {
        self.state.round_trips.load(Ordering::Relaxed)
    }

    /// Statements prepared so far.
    pub fn prepared_statements(&self) -> u64 {
        self.state.prepared.load(Ordering::Relaxed)
    }

    /// Statements closed so far.
    pub fn closed_statements(&self) -> u64 {
        self.state.closed.load(Ordering::Relaxed)
    }

    /// Statements prepared and not yet closed.
    pub fn open_statements(&self) -> u64 {
        self.prepared_statements() - self.closed_statements()
    }

    /// Make every subsequent `close` fail (the statement still counts as closed).
    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::Relaxed);
    }

    fn open(&self, sql: &str, shape: &StatementShape) -> DriverResult<Box<dyn DriverStatement>> {
        self.state.round_trip();
        let command = Command::parse(sql)?;
        let param_count = placeholder_count(sql);
        self.state.prepared.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemoryStatement {
            state: self.state.clone(),
            command,
            param_count,
            generated_key_columns: shape.generated_key_columns.clone(),
            closed: false,
        }))
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn prepare(
        &self,
        sql: &str,
        shape: &StatementShape,
    ) -> DriverResult<Box<dyn DriverStatement>> {
        self.open(sql, shape)
    }

    async fn prepare_call(&self, sql: &str) -> DriverResult<Box<dyn DriverStatement>> {
        self.open(sql, &StatementShape::callable())
    }
}

/// Literal or placeholder in a VALUES list.
#[derive(Debug, Clone)]
enum Operand {
    Placeholder,
    Literal(Value),
}

#[derive(Debug, Clone)]
enum Command {
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        values: Vec<Operand>,
    },
    Select {
        table: String,
        count: bool,
    },
    Call {
        procedure: String,
    },
}

impl Command {
    fn parse(sql: &str) -> Result<Self, MemoryError> {
        alt((insert, select, call))(sql.trim())
            .map(|(_, command)| command)
            .map_err(|_| MemoryError::Unsupported(sql.to_string()))
    }
}

/// Table, column or procedure name; case-insensitive, stored lowercased.
fn name(input: &str) -> IResult<&str, String> {
    map(
        take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        |s: &str| s.to_lowercase(),
    )(input)
}

fn comma(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char(','), multispace0)(input)
}

/// `'...'` with `''` as an escaped quote. The text is kept verbatim.
fn string_literal(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        fold_many0(
            alt((is_not("'"), value("'", tag("''")))),
            String::new,
            |mut text: String, chunk: &str| {
                text.push_str(chunk);
                text
            },
        ),
        char('\''),
    )(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        value(Operand::Placeholder, char('?')),
        value(Operand::Literal(Value::Null), tag_no_case("null")),
        map(
            map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
                s.parse::<i64>()
            }),
            |i| Operand::Literal(Value::Integer(i)),
        ),
        map(string_literal, |s| Operand::Literal(Value::from(s))),
    ))(input)
}

/// `( item, item, ... )`
fn parenthesized<'a, O>(
    item: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<O>> {
    delimited(
        pair(char('('), multispace0),
        separated_list1(comma, item),
        pair(multispace0, char(')')),
    )
}

/// Parse: insert into <table> [(<columns>)] values (<operands>)
fn insert(input: &str) -> IResult<&str, Command> {
    let (input, _) = tuple((
        tag_no_case("insert"),
        multispace1,
        tag_no_case("into"),
        multispace1,
    ))(input)?;
    let (input, table) = name(input)?;
    let (input, columns) = opt(preceded(multispace0, parenthesized(name)))(input)?;
    let (input, _) = tuple((multispace0, tag_no_case("values"), multispace0))(input)?;
    let (input, values) = parenthesized(operand)(input)?;
    Ok((
        input,
        Command::Insert {
            table,
            columns,
            values,
        },
    ))
}

/// A bare word in the select list; `from` ends the list.
fn select_word(input: &str) -> IResult<&str, &str> {
    verify(
        take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        |s: &str| !s.eq_ignore_ascii_case("from"),
    )(input)
}

/// Select-list entry; `true` for `count(*)`.
fn projection_item(input: &str) -> IResult<&str, bool> {
    alt((
        value(
            true,
            pair(tag_no_case("count(*)"), opt(preceded(multispace1, select_word))),
        ),
        value(false, char('*')),
        value(false, select_word),
    ))(input)
}

/// Parse: select <items> from <table> ... (anything after the table is ignored)
fn select(input: &str) -> IResult<&str, Command> {
    let (input, _) = pair(tag_no_case("select"), multispace1)(input)?;
    let (input, items) = separated_list1(comma, projection_item)(input)?;
    let (input, _) = tuple((multispace1, tag_no_case("from"), multispace1))(input)?;
    let (input, table) = name(input)?;
    let count = items.contains(&true);
    Ok((input, Command::Select { table, count }))
}

/// Parse: begin <procedure>( ... ); end;
fn call(input: &str) -> IResult<&str, Command> {
    let (input, _) = pair(tag_no_case("begin"), multispace1)(input)?;
    let (input, procedure) = name(input)?;
    let (input, _) = pair(multispace0, char('('))(input)?;
    Ok((input, Command::Call { procedure }))
}

/// Number of `?` placeholders outside quoted literals.
fn placeholder_count(sql: &str) -> usize {
    let mut scan = fold_many0(
        alt((
            value(0usize, string_literal),
            value(1usize, char('?')),
            value(0usize, anychar),
        )),
        || 0,
        |count, n| count + n,
    );
    scan(sql).map_or(0, |(_, count)| count)
}

struct MemoryStatement {
    state: Arc<MemoryState>,
    command: Command,
    param_count: usize,
    generated_key_columns: Vec<String>,
    closed: bool,
}

impl MemoryStatement {
    fn check(&self, binds: &[Value]) -> Result<(), MemoryError> {
        if self.closed {
            return Err(MemoryError::StatementClosed);
        }
        if binds.len() != self.param_count {
            return Err(MemoryError::MissingParameter {
                expected: self.param_count,
                got: binds.len(),
            });
        }
        Ok(())
    }

    fn apply(&self, catalog: &mut Catalog, binds: &[Value]) -> Result<UpdateOutcome, MemoryError> {
        match &self.command {
            Command::Insert {
                table,
                columns,
                values,
            } => {
                let mut binds = binds.iter().cloned();
                let values = values
                    .iter()
                    .map(|operand| match operand {
                        Operand::Placeholder => binds.next().unwrap_or_default(),
                        Operand::Literal(v) => v.clone(),
                    })
                    .collect();

                let target = catalog
                    .tables
                    .get_mut(table)
                    .ok_or_else(|| MemoryError::TableNotFound(table.clone()))?;
                let row = target.insert(columns.as_deref(), values)?;

                let generated_keys = if self.generated_key_columns.is_empty() {
                    None
                } else {
                    let mut key_columns = Vec::with_capacity(self.generated_key_columns.len());
                    let mut key_row = Vec::with_capacity(self.generated_key_columns.len());
                    for name in &self.generated_key_columns {
                        let idx = target
                            .column_index(name)
                            .ok_or_else(|| MemoryError::ColumnNotFound(name.clone()))?;
                        key_columns.push(target.descriptors().swap_remove(idx));
                        key_row.push(row[idx].clone());
                    }
                    Some(RowSet::new(key_columns, vec![key_row]))
                };

                Ok(UpdateOutcome {
                    rows_affected: 1,
                    generated_keys,
                })
            }
            Command::Call { procedure } => {
                let (table, column) = catalog
                    .procedures
                    .get(procedure)
                    .cloned()
                    .ok_or_else(|| MemoryError::ProcedureNotFound(procedure.clone()))?;
                let target = catalog
                    .tables
                    .get_mut(&table)
                    .ok_or(MemoryError::TableNotFound(table))?;
                target.insert(Some(std::slice::from_ref(&column)), binds.to_vec())?;
                Ok(UpdateOutcome {
                    rows_affected: 1,
                    generated_keys: None,
                })
            }
            Command::Select { .. } => Err(MemoryError::Unsupported(
                "query executed as an update".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DriverStatement for MemoryStatement {
    fn parameter_count(&self) -> usize {
        self.param_count
    }

    async fn execute_query(
        &mut self,
        binds: &[Value],
        settings: &StatementSettings,
    ) -> DriverResult<RowSet> {
        self.state.round_trip();
        self.check(binds)?;

        let mut catalog = self.state.catalog.lock().await;
        catalog.last_settings = Some(*settings);

        let Command::Select { table, count } = &self.command else {
            return Err(MemoryError::Unsupported("update executed as a query".to_string()).into());
        };
        let source = catalog
            .tables
            .get(table)
            .ok_or_else(|| MemoryError::TableNotFound(table.clone()))?;

        if *count {
            return Ok(RowSet::new(
                vec![ColumnDescriptor::new("COUNT(*)", "NUMBER")],
                vec![vec![Value::Integer(source.rows.len() as i64)]],
            ));
        }

        let mut rows = source.rows.clone();
        if settings.max_field_size > 0 {
            let limit = settings.max_field_size as usize;
            for value in rows.iter_mut().flatten() {
                if let Value::Text(s) = value
                    && s.len() > limit
                {
                    let cut = (0..=limit).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
                    let truncated = Value::from(&s[..cut]);
                    *value = truncated;
                }
            }
        }
        Ok(RowSet::new(source.descriptors(), rows))
    }

    async fn execute_update(
        &mut self,
        binds: &[Value],
        settings: &StatementSettings,
    ) -> DriverResult<UpdateOutcome> {
        self.state.round_trip();
        self.check(binds)?;

        let mut catalog = self.state.catalog.lock().await;
        catalog.last_settings = Some(*settings);
        Ok(self.apply(&mut catalog, binds)?)
    }

    async fn execute_batch(
        &mut self,
        rows: &[Vec<Value>],
        settings: &StatementSettings,
    ) -> DriverResult<Vec<u64>> {
        self.state.round_trip();
        for binds in rows {
            self.check(binds)?;
        }

        let mut catalog = self.state.catalog.lock().await;
        catalog.last_settings = Some(*settings);
        let mut counts = Vec::with_capacity(rows.len());
        for binds in rows {
            counts.push(self.apply(&mut catalog, binds)?.rows_affected);
        }
        Ok(counts)
    }

    async fn parameter_metadata(&mut self) -> DriverResult<ParameterMetadata> {
        self.state.round_trip();
        if self.closed {
            return Err(MemoryError::StatementClosed.into());
        }
        Ok(ParameterMetadata {
            type_names: vec!["VARCHAR2".to_string(); self.param_count],
        })
    }

    async fn result_metadata(&mut self) -> DriverResult<ResultMetadata> {
        self.state.round_trip();
        if self.closed {
            return Err(MemoryError::StatementClosed.into());
        }

        let columns = match &self.command {
            Command::Select { count: true, .. } => {
                vec![ColumnDescriptor::new("COUNT(*)", "NUMBER")]
            }
            Command::Select { table, .. } => {
                let catalog = self.state.catalog.lock().await;
                catalog
                    .tables
                    .get(table)
                    .ok_or_else(|| MemoryError::TableNotFound(table.clone()))?
                    .descriptors()
            }
            _ => Vec::new(),
        };
        Ok(ResultMetadata { columns })
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }
        self.state.round_trip();
        self.closed = true;
        self.state.closed.fetch_add(1, Ordering::Relaxed);

        if self.state.fail_close.load(Ordering::Relaxed) {
            return Err(MemoryError::CloseFailed.into());
        }
        Ok(())
    }
}
