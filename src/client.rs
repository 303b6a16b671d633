//! Per-connection entry point and the checkout guard.

use crate::cache::{CacheStats, StatementCache};
use crate::config::CacheConfig;
use crate::driver::Driver;
use crate::error::{CacheError, CacheResult};
use crate::handle::StatementHandle;
use crate::key::{CacheKey, StatementKind, StatementShape};
use crate::lifecycle::StatementLifecycle;
use crate::mode::{CacheMode, Release};
use std::sync::Arc;

struct ClientInner {
    driver: Arc<dyn Driver>,
    cache: StatementCache,
    lifecycle: StatementLifecycle,
    config: CacheConfig,
}

impl ClientInner {
    async fn release(&self, handle: StatementHandle, key: Option<&str>) -> CacheResult<Release> {
        self.config
            .mode
            .release(&self.cache, &self.lifecycle, handle, key)
            .await
    }
}

/// Hands out cached statements for one database connection.
///
/// Cloning is cheap; clones share the cache.
///
/// # Example
/// ```ignore
/// let client = StatementClient::new(Arc::new(driver), CacheConfig::implicit(20));
/// let mut stmt = client.prepare("select * from dual where dummy = ?").await?;
/// stmt.bind(1, "X")?;
/// let rs = stmt.execute_query().await?;
/// while rs.next()? { /* ... */ }
/// stmt.close().await?;
/// ```
#[derive(Clone)]
pub struct StatementClient {
    inner: Arc<ClientInner>,
}

impl StatementClient {
    pub fn new(driver: Arc<dyn Driver>, config: CacheConfig) -> Self {
        let cache = StatementCache::new(config.mode, config.capacity);
        let lifecycle = StatementLifecycle::new(config.mode);
        tracing::debug!(
            mode = ?config.mode,
            capacity = config.capacity,
            "statement client created"
        );

        Self {
            inner: Arc::new(ClientInner {
                driver,
                cache,
                lifecycle,
                config,
            }),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.inner.config.mode
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The underlying store.
    pub fn cache(&self) -> &StatementCache {
        &self.inner.cache
    }

    /// Prepare a forward-only, read-only statement.
    pub async fn prepare(&self, sql: &str) -> CacheResult<CachedStatement> {
        self.prepare_with_shape(sql, &StatementShape::default()).await
    }

    /// Prepare a statement returning the named columns as generated keys.
    pub async fn prepare_returning<S: AsRef<str>>(
        &self,
        sql: &str,
        columns: &[S],
    ) -> CacheResult<CachedStatement> {
        self.prepare_with_shape(sql, &StatementShape::returning(columns)).await
    }

    /// Prepare a stored-procedure call.
    pub async fn prepare_call(&self, sql: &str) -> CacheResult<CachedStatement> {
        self.prepare_with_shape(sql, &StatementShape::callable()).await
    }

    pub async fn prepare_with_shape(
        &self,
        sql: &str,
        shape: &StatementShape,
    ) -> CacheResult<CachedStatement> {
        let inner = &self.inner;
        let handle = inner
            .config
            .mode
            .prepare(
                &inner.cache,
                inner.driver.as_ref(),
                &inner.lifecycle,
                sql,
                shape,
                inner.config.defaults,
            )
            .await?;
        Ok(self.guard(handle))
    }

    /// Check out the plain statement parked under `key`.
    pub async fn get_statement_with_key(&self, key: &str) -> CacheResult<Option<CachedStatement>> {
        self.checkout(key, StatementKind::Prepared).await
    }

    /// Check out the call parked under `key`.
    pub async fn get_call_with_key(&self, key: &str) -> CacheResult<Option<CachedStatement>> {
        self.checkout(key, StatementKind::Callable).await
    }

    async fn checkout(
        &self,
        key: &str,
        kind: StatementKind,
    ) -> CacheResult<Option<CachedStatement>> {
        let inner = &self.inner;
        let handle = inner
            .config
            .mode
            .checkout(&inner.cache, &inner.lifecycle, key, kind)
            .await?;
        Ok(handle.map(|handle| self.guard(handle)))
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Destroy all parked statements. Statements still checked out are
    /// destroyed when they come back.
    pub async fn shutdown(&self) -> usize {
        self.inner.cache.shutdown().await
    }

    fn guard(&self, handle: StatementHandle) -> CachedStatement {
        CachedStatement {
            handle: Some(handle),
            client: self.inner.clone(),
        }
    }
}

/// A statement checked out of the cache.
///
/// Give it back with [`close`](Self::close) or
/// [`close_with_key`](Self::close_with_key). A guard that is simply dropped
/// is released in the background on the current tokio runtime.
pub struct CachedStatement {
    handle: Option<StatementHandle>,
    client: Arc<ClientInner>,
}

impl CachedStatement {
    /// Release the statement. Implicit mode parks it for reuse; explicit mode
    /// closes it.
    pub async fn close(mut self) -> CacheResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.client.release(handle, None).await?;
        Ok(())
    }

    /// Park the statement under `key` for [`StatementClient::get_statement_with_key`].
    ///
    /// In implicit mode the statement is released as by [`close`](Self::close)
    /// and `ExplicitCachingDisabled` is returned.
    pub async fn close_with_key(mut self, key: &str) -> CacheResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match self.client.config.mode {
            CacheMode::Implicit => {
                self.client.release(handle, None).await?;
                Err(CacheError::ExplicitCachingDisabled)
            }
            CacheMode::Explicit => {
                self.client.release(handle, Some(key)).await?;
                Ok(())
            }
        }
    }

    /// Slot this statement returns to, once known.
    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.handle.as_ref().and_then(StatementHandle::key)
    }
}

impl Drop for CachedStatement {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let client = self.client.clone();
                    runtime.spawn(async move {
                        if let Err(e) = client.release(handle, None).await {
                            tracing::warn!(error = %e, "failed to release dropped statement");
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        sql = handle.sql(),
                        "statement dropped outside a tokio runtime, driver statement not closed"
                    );
                }
            }
        }
    }
}

impl std::ops::Deref for CachedStatement {
    type Target = StatementHandle;

    fn deref(&self) -> &Self::Target {
        self.handle
            .as_ref()
            .expect("Statement should always be present")
    }
}

impl std::ops::DerefMut for CachedStatement {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle
            .as_mut()
            .expect("Statement should always be present")
    }
}

impl std::fmt::Debug for CachedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStatement")
            .field("handle", &self.handle)
            .finish()
    }
}
