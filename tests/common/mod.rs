//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use stmtcache::{
    CacheConfig, CacheResult, CachedStatement, Concurrency, MemoryDriver, ResultSetType,
    StatementClient, StatementShape,
};

pub const QUERY: &str = "select * from dual where dummy = ? connect by rownum <= 10";
pub const INSERT: &str = "insert into t1(c2) values (?)";
pub const INSERT_CLOB: &str = "insert into t1 (c3) values (?)";
pub const CALL_INSERT_LOB: &str = "begin insertLob(pi_data => ?); end;";
pub const CACHE_KEY: &str = "junit-test";
pub const CACHE_SIZE: usize = 20;

/// Large enough to be stream bound.
pub const LOB_SIZE: usize = 100_000_000;
pub const CLOB_SIZE: usize = 1_000_000;

pub const PREFETCH_SIZE_MODIFIED: u32 = 1000;
pub const LOB_PREFETCH_SIZE_MODIFIED: u32 = 8000;
pub const MAX_FIELD_SIZE_MODIFIED: u32 = 100;
pub const QUERY_TIMEOUT_MODIFIED: Duration = Duration::from_secs(100);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Cursor shape every test statement is prepared with.
pub fn scroll_shape() -> StatementShape {
    StatementShape::cursor(ResultSetType::ScrollInsensitive, Concurrency::Updatable)
}

/// Driver with `t1(c1 identity, c2, c3, c4)` and the `insertLob` procedure.
pub async fn setup(config: CacheConfig) -> (MemoryDriver, StatementClient) {
    init_tracing();
    let driver = MemoryDriver::new();
    driver.create_table("t1", &["c1", "c2", "c3", "c4"]).await;
    driver.register_procedure("insertLob", "t1", "c3").await;
    let client = StatementClient::new(Arc::new(driver.clone()), config);
    (driver, client)
}

/// How a test gives a statement back and gets it again.
#[derive(Debug, Clone, Copy)]
pub enum Reuse {
    /// `close`, then prepare the same SQL and shape again.
    Implicit,
    /// `close_with_key`, then `get_statement_with_key`.
    Explicit(&'static str),
}

impl Reuse {
    pub async fn close(&self, stmt: CachedStatement) -> CacheResult<()> {
        match self {
            Reuse::Implicit => stmt.close().await,
            Reuse::Explicit(key) => stmt.close_with_key(key).await,
        }
    }

    pub async fn reacquire(
        &self,
        client: &StatementClient,
        sql: &str,
        shape: &StatementShape,
    ) -> CacheResult<CachedStatement> {
        match self {
            Reuse::Implicit => client.prepare_with_shape(sql, shape).await,
            Reuse::Explicit(key) => Ok(client
                .get_statement_with_key(key)
                .await?
                .expect("statement parked under key")),
        }
    }
}

/// Prepare [`QUERY`], change every tuning setting, execute it, give it back
/// and fetch it again.
pub async fn execute_and_get_cached(
    client: &StatementClient,
    reuse: Reuse,
) -> CacheResult<CachedStatement> {
    let shape = scroll_shape();
    let mut stmt = client.prepare_with_shape(QUERY, &shape).await?;

    stmt.set_row_prefetch(PREFETCH_SIZE_MODIFIED)?;
    stmt.set_lob_prefetch_size(LOB_PREFETCH_SIZE_MODIFIED);
    stmt.set_max_field_size(MAX_FIELD_SIZE_MODIFIED);
    stmt.set_query_timeout(QUERY_TIMEOUT_MODIFIED)?;

    stmt.bind(1, "X")?;
    let rs = stmt.execute_query().await?;
    rs.next()?;
    if let Some(rs) = stmt.result_set() {
        rs.next()?;
    }
    reuse.close(stmt).await?;

    reuse.reacquire(client, QUERY, &shape).await
}
