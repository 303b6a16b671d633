//! Implicit and explicit caching policies.

use crate::cache::{ParkOutcome, StatementCache};
use crate::driver::{Driver, StatementSettings};
use crate::error::{CacheError, CacheResult};
use crate::handle::StatementHandle;
use crate::key::{CacheKey, StatementKind, StatementShape};
use crate::lifecycle::StatementLifecycle;
use serde::Deserialize;

/// Caching policy, chosen once per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Automatic reuse keyed by SQL text and statement shape, LRU bounded.
    #[default]
    Implicit,
    /// Reuse only under keys the caller assigns when closing.
    Explicit,
}

/// How a released handle was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Parked(ParkOutcome),
    Destroyed,
}

impl CacheMode {
    /// Compute the slot a statement belongs to.
    pub fn key_for(
        &self,
        sql: &str,
        shape: &StatementShape,
        explicit_key: Option<&str>,
    ) -> CacheResult<CacheKey> {
        match self {
            CacheMode::Implicit => Ok(CacheKey::implicit(sql, shape)),
            CacheMode::Explicit => explicit_key
                .map(CacheKey::explicit)
                .ok_or(CacheError::ExplicitKeyRequired),
        }
    }

    /// Hand out a statement for `sql`: a parked one on an implicit hit,
    /// otherwise a freshly prepared one starting from `defaults`.
    pub async fn prepare(
        &self,
        cache: &StatementCache,
        driver: &dyn Driver,
        lifecycle: &StatementLifecycle,
        sql: &str,
        shape: &StatementShape,
        defaults: StatementSettings,
    ) -> CacheResult<StatementHandle> {
        match self {
            CacheMode::Implicit => {
                let key = self.key_for(sql, shape, None)?;
                if let Some(mut handle) = cache.get(&key).await? {
                    lifecycle.on_checkout(&mut handle);
                    return Ok(handle);
                }
                let mut handle = open(driver, sql, shape, defaults).await?;
                handle.set_key(key);
                Ok(handle)
            }
            CacheMode::Explicit => {
                cache.ensure_open().await?;
                open(driver, sql, shape, defaults).await
            }
        }
    }

    /// Take the statement of `kind` parked under an explicit key. A statement
    /// of the other kind stays parked and the lookup is a miss.
    pub async fn checkout(
        &self,
        cache: &StatementCache,
        lifecycle: &StatementLifecycle,
        key: &str,
        kind: StatementKind,
    ) -> CacheResult<Option<StatementHandle>> {
        if *self == CacheMode::Implicit {
            return Err(CacheError::ExplicitCachingDisabled);
        }
        let mut handle = cache
            .get_if(&CacheKey::explicit(key), |h| h.kind() == kind)
            .await?;
        if let Some(handle) = handle.as_mut() {
            lifecycle.on_checkout(handle);
        }
        Ok(handle)
    }

    /// Give a statement back. Implicit mode always re-parks under the derived
    /// key; explicit mode parks under `key`, or destroys the handle when no
    /// key is given.
    pub async fn release(
        &self,
        cache: &StatementCache,
        lifecycle: &StatementLifecycle,
        mut handle: StatementHandle,
        key: Option<&str>,
    ) -> CacheResult<Release> {
        let key = match self {
            CacheMode::Implicit => self.key_for(handle.sql(), handle.shape(), None)?,
            CacheMode::Explicit => match key {
                Some(key) => self.key_for(handle.sql(), handle.shape(), Some(key))?,
                None => {
                    handle.destroy().await?;
                    return Ok(Release::Destroyed);
                }
            },
        };

        lifecycle.on_release(&mut handle);
        let outcome = cache.put(key, handle).await?;
        Ok(Release::Parked(outcome))
    }
}

async fn open(
    driver: &dyn Driver,
    sql: &str,
    shape: &StatementShape,
    defaults: StatementSettings,
) -> CacheResult<StatementHandle> {
    let statement = if shape.is_callable() {
        driver.prepare_call(sql).await?
    } else {
        driver.prepare(sql, shape).await?
    };
    Ok(StatementHandle::new(sql, shape.clone(), statement, defaults))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    #[test]
    fn test_explicit_key_required() {
        let shape = StatementShape::default();
        assert!(matches!(
            CacheMode::Explicit.key_for("select 1", &shape, None),
            Err(CacheError::ExplicitKeyRequired)
        ));
        assert_eq!(
            CacheMode::Explicit.key_for("select 1", &shape, Some("k")).unwrap(),
            CacheKey::explicit("k")
        );
        assert_eq!(
            CacheMode::Implicit.key_for("select 1", &shape, Some("k")).unwrap(),
            CacheKey::implicit("select 1", &shape)
        );
    }

    #[tokio::test]
    async fn test_explicit_prepare_bypasses_cache() {
        let driver = MemoryDriver::new();
        let mode = CacheMode::Explicit;
        let cache = StatementCache::new(mode, 20);
        let lifecycle = StatementLifecycle::new(mode);
        let sql = "select * from dual";
        let shape = StatementShape::default();
        let defaults = StatementSettings::default();

        let handle = mode
            .prepare(&cache, &driver, &lifecycle, sql, &shape, defaults)
            .await
            .unwrap();
        mode.release(&cache, &lifecycle, handle, Some("k")).await.unwrap();
        let _second = mode
            .prepare(&cache, &driver, &lifecycle, sql, &shape, defaults)
            .await
            .unwrap();

        assert_eq!(driver.prepared_statements(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_explicit_release_without_key_destroys() {
        let driver = MemoryDriver::new();
        let mode = CacheMode::Explicit;
        let cache = StatementCache::new(mode, 20);
        let lifecycle = StatementLifecycle::new(mode);
        let shape = StatementShape::default();

        let defaults = StatementSettings::default();

        let handle = mode
            .prepare(&cache, &driver, &lifecycle, "select * from dual", &shape, defaults)
            .await
            .unwrap();
        let released = mode.release(&cache, &lifecycle, handle, None).await.unwrap();

        assert_eq!(released, Release::Destroyed);
        assert_eq!(driver.open_statements(), 0);
    }

    #[tokio::test]
    async fn test_checkout_requires_explicit_mode() {
        let mode = CacheMode::Implicit;
        let cache = StatementCache::new(mode, 20);
        let lifecycle = StatementLifecycle::new(mode);
        assert!(matches!(
            mode.checkout(&cache, &lifecycle, "k", StatementKind::Prepared).await,
            Err(CacheError::ExplicitCachingDisabled)
        ));
    }

    #[tokio::test]
    async fn test_checkout_of_other_kind_leaves_statement_parked() {
        let driver = MemoryDriver::new();
        let mode = CacheMode::Explicit;
        let cache = StatementCache::new(mode, 20);
        let lifecycle = StatementLifecycle::new(mode);
        let shape = StatementShape::default();
        let defaults = StatementSettings::default();

        let handle = mode
            .prepare(&cache, &driver, &lifecycle, "select * from dual", &shape, defaults)
            .await
            .unwrap();
        mode.release(&cache, &lifecycle, handle, Some("k")).await.unwrap();

        let call = mode
            .checkout(&cache, &lifecycle, "k", StatementKind::Callable)
            .await
            .unwrap();
        assert!(call.is_none());
        assert_eq!(cache.len().await, 1);

        let stmt = mode
            .checkout(&cache, &lifecycle, "k", StatementKind::Prepared)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stmt.checkouts(), 1);
    }
}
