//! Driver failures surface as `CacheError::Driver` and leave the handle reusable.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use stmtcache::{CacheConfig, CacheError, CacheResult};

#[tokio::test]
async fn test_prepare_failure_is_a_driver_error() -> CacheResult<()> {
    let (driver, client) = setup(CacheConfig::implicit(CACHE_SIZE)).await;

    let err = client.prepare("drop table t1").await.unwrap_err();
    assert!(err.is_driver());
    assert!(err.to_string().contains("unsupported statement"));

    assert!(client.cache().is_empty().await);
    assert_eq!(driver.prepared_statements(), 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_update_still_parks() -> CacheResult<()> {
    let (driver, client) = setup(CacheConfig::implicit(CACHE_SIZE)).await;

    let mut stmt = client.prepare(INSERT).await?;
    driver.drop_table("t1").await;
    stmt.bind(1, "X")?;
    let err = stmt.execute_update().await.unwrap_err();
    assert!(matches!(err, CacheError::Driver(_)));
    stmt.close().await?;
    assert_eq!(client.cache().len().await, 1);

    driver.create_table("t1", &["c1", "c2", "c3", "c4"]).await;
    let mut stmt = client.prepare(INSERT).await?;
    stmt.bind(1, "X")?;
    assert_eq!(stmt.execute_update().await?, 1);
    assert_eq!(driver.prepared_statements(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_batch_is_a_driver_error() -> CacheResult<()> {
    let (driver, client) = setup(CacheConfig::implicit(CACHE_SIZE)).await;

    let mut stmt = client.prepare(INSERT).await?;
    stmt.bind(1, "X")?;
    stmt.add_batch()?;
    driver.drop_table("t1").await;

    assert!(stmt.execute_batch().await.unwrap_err().is_driver());
    assert_eq!(stmt.pending_batch_len(), 0);
    stmt.close().await?;
    assert_eq!(client.cache().len().await, 1);
    assert_eq!(driver.open_statements(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_update_parks_under_explicit_key() -> CacheResult<()> {
    let (driver, client) = setup(CacheConfig::explicit()).await;

    let mut stmt = client.prepare(INSERT).await?;
    driver.drop_table("t1").await;
    stmt.bind(1, "X")?;
    assert!(stmt.execute_update().await.unwrap_err().is_driver());
    stmt.close_with_key(CACHE_KEY).await?;

    driver.create_table("t1", &["c1", "c2", "c3", "c4"]).await;
    let mut stmt = client
        .get_statement_with_key(CACHE_KEY)
        .await?
        .expect("statement parked under key");
    stmt.bind(1, "X")?;
    assert_eq!(stmt.execute_update().await?, 1);
    assert_eq!(driver.row_count("t1").await, Some(1));
    Ok(())
}
