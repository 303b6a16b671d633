//! Statement store.
//!
//! Implicit mode keeps parked handles in an [`LruCache`] bounded by the
//! configured capacity; explicit mode keeps them in an unbounded keyed map
//! where the caller owns replacement. Handles displaced by either are
//! collected under the lock and closed after it is released.

use crate::error::{CacheError, CacheResult};
use crate::handle::StatementHandle;
use crate::key::CacheKey;
use crate::mode::CacheMode;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// What happened to a handle handed to [`StatementCache::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    /// Parked in a free slot.
    Parked,
    /// Parked, replacing (and destroying) the previous occupant of the key.
    Replaced,
    /// Parked, evicting (and destroying) the least recently used entry.
    Evicted,
    /// Not parked because the cache has no room at all; the handle was destroyed.
    Discarded,
}

enum Slots {
    Lru(LruCache<CacheKey, StatementHandle>),
    Keyed(HashMap<CacheKey, StatementHandle>),
    /// Implicit mode with capacity 0.
    Disabled,
}

impl Slots {
    fn len(&self) -> usize {
        match self {
            Slots::Lru(lru) => lru.len(),
            Slots::Keyed(map) => map.len(),
            Slots::Disabled => 0,
        }
    }

    fn take(&mut self, key: &CacheKey) -> Option<StatementHandle> {
        match self {
            Slots::Lru(lru) => lru.pop(key),
            Slots::Keyed(map) => map.remove(key),
            Slots::Disabled => None,
        }
    }

    /// Take the handle under `key` only if `accept` approves it. A rejected
    /// handle stays where it is, LRU position included.
    fn take_if(
        &mut self,
        key: &CacheKey,
        accept: impl FnOnce(&StatementHandle) -> bool,
    ) -> Option<StatementHandle> {
        let accepted = match self {
            Slots::Lru(lru) => lru.peek(key).is_some_and(accept),
            Slots::Keyed(map) => map.get(key).is_some_and(accept),
            Slots::Disabled => false,
        };
        if accepted { self.take(key) } else { None }
    }

    fn drain(&mut self) -> Vec<StatementHandle> {
        match self {
            Slots::Lru(lru) => {
                let mut handles = Vec::with_capacity(lru.len());
                while let Some((_, handle)) = lru.pop_lru() {
                    handles.push(handle);
                }
                handles
            }
            Slots::Keyed(map) => map.drain().map(|(_, handle)| handle).collect(),
            Slots::Disabled => Vec::new(),
        }
    }
}

struct CacheInner {
    slots: Slots,
    closed: bool,
}

/// Point-in-time counters of a [`StatementCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Handles destroyed to make room or displaced by a same-key park.
    pub evictions: u64,
    /// Explicit keys overwritten by a later park.
    pub collisions: u64,
    pub resident: usize,
    /// `None` when the cache is unbounded (explicit mode).
    pub capacity: Option<usize>,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Parked statement handles of one client.
pub struct StatementCache {
    mode: CacheMode,
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    collisions: AtomicU64,
}

impl StatementCache {
    /// Create a cache. `capacity` bounds implicit mode and is ignored in
    /// explicit mode.
    pub fn new(mode: CacheMode, capacity: usize) -> Self {
        let slots = match mode {
            CacheMode::Implicit => match NonZeroUsize::new(capacity) {
                Some(cap) => Slots::Lru(LruCache::new(cap)),
                None => Slots::Disabled,
            },
            CacheMode::Explicit => Slots::Keyed(HashMap::new()),
        };

        Self {
            mode,
            capacity,
            inner: Mutex::new(CacheInner {
                slots,
                closed: false,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            collisions: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Configured bound, `None` in explicit mode.
    pub fn capacity(&self) -> Option<usize> {
        match self.mode {
            CacheMode::Implicit => Some(self.capacity),
            CacheMode::Explicit => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Fail with [`CacheError::Closed`] once the cache has been shut down.
    pub async fn ensure_open(&self) -> CacheResult<()> {
        if self.inner.lock().await.closed {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    /// Take the handle parked under `key`, if any. The handle leaves the
    /// cache, so a concurrent caller asking for the same key misses.
    pub async fn get(&self, key: &CacheKey) -> CacheResult<Option<StatementHandle>> {
        self.get_if(key, |_| true).await
    }

    /// Like [`get`](Self::get), but a handle `accept` rejects is left parked
    /// and the lookup counts as a miss.
    pub async fn get_if(
        &self,
        key: &CacheKey,
        accept: impl FnOnce(&StatementHandle) -> bool,
    ) -> CacheResult<Option<StatementHandle>> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(CacheError::Closed);
        }

        let handle = inner.slots.take_if(key, accept);
        if handle.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%key, "statement cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%key, "statement cache miss");
        }
        Ok(handle)
    }

    /// Park a handle under `key`.
    ///
    /// A handle parked into a closed cache is destroyed and `Closed` is
    /// returned.
    pub async fn put(
        &self,
        key: CacheKey,
        mut handle: StatementHandle,
    ) -> CacheResult<ParkOutcome> {
        handle.set_key(key.clone());

        let parked = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                Err(handle)
            } else {
                let (outcome, displaced) = match &mut inner.slots {
                    Slots::Disabled => (ParkOutcome::Discarded, Some(handle)),
                    Slots::Lru(lru) => match lru.push(key.clone(), handle) {
                        None => (ParkOutcome::Parked, None),
                        Some((old_key, old)) if old_key == key => {
                            (ParkOutcome::Replaced, Some(old))
                        }
                        Some((old_key, old)) => {
                            tracing::debug!(
                                evicted = %old_key,
                                "evicting least recently used statement"
                            );
                            (ParkOutcome::Evicted, Some(old))
                        }
                    },
                    Slots::Keyed(map) => match map.insert(key.clone(), handle) {
                        None => (ParkOutcome::Parked, None),
                        Some(old) => {
                            let collision = CacheError::collision(key.to_string());
                            tracing::debug!(%collision, "replacing parked statement");
                            (ParkOutcome::Replaced, Some(old))
                        }
                    },
                };
                Ok((outcome, displaced, inner.slots.len()))
            }
        };

        let (outcome, displaced, resident) = match parked {
            Ok(parked) => parked,
            Err(handle) => {
                destroy_all(vec![handle]).await;
                return Err(CacheError::Closed);
            }
        };

        match (outcome, self.mode) {
            (ParkOutcome::Replaced, CacheMode::Explicit) => {
                self.collisions.fetch_add(1, Ordering::Relaxed);
            }
            (ParkOutcome::Replaced | ParkOutcome::Evicted, _) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        tracing::trace!(%key, ?outcome, resident, "statement put");

        if let Some(old) = displaced {
            destroy_all(vec![old]).await;
        }
        Ok(outcome)
    }

    /// Remove the handle parked under `key` without counting a checkout.
    /// The caller decides whether to destroy it.
    pub async fn evict(&self, key: &CacheKey) -> CacheResult<Option<StatementHandle>> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(CacheError::Closed);
        }
        let handle = inner.slots.take(key);
        if handle.is_some() {
            tracing::debug!(%key, "statement evicted");
        }
        Ok(handle)
    }

    /// Close every parked handle and refuse further use. Returns the number
    /// of handles destroyed; a second call returns 0.
    pub async fn shutdown(&self) -> usize {
        let handles = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return 0;
            }
            inner.closed = true;
            inner.slots.drain()
        };

        let count = handles.len();
        destroy_all(handles).await;
        tracing::debug!(destroyed = count, "statement cache shut down");
        count
    }

    pub async fn stats(&self) -> CacheStats {
        let resident = self.len().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            resident,
            capacity: self.capacity(),
        }
    }
}

/// Close displaced handles. Failures are logged; the handles are gone either way.
async fn destroy_all(handles: Vec<StatementHandle>) {
    for handle in handles {
        let key = handle.key().map(ToString::to_string).unwrap_or_default();
        if let Err(e) = handle.destroy().await {
            tracing::warn!(%key, error = %e, "failed to close cached statement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, MemoryDriver, StatementSettings};
    use crate::key::{StatementKind, StatementShape};

    async fn handle(driver: &MemoryDriver, sql: &str) -> StatementHandle {
        let shape = StatementShape::default();
        let statement = driver.prepare(sql, &shape).await.unwrap();
        StatementHandle::new(sql, shape, statement, StatementSettings::default())
    }

    fn key(sql: &str) -> CacheKey {
        CacheKey::implicit(sql, &StatementShape::default())
    }

    #[tokio::test]
    async fn test_get_takes_the_handle() {
        let driver = MemoryDriver::new();
        let cache = StatementCache::new(CacheMode::Implicit, 2);
        let sql = "select * from dual";

        assert!(cache.get(&key(sql)).await.unwrap().is_none());
        let outcome = cache.put(key(sql), handle(&driver, sql).await).await.unwrap();
        assert_eq!(outcome, ParkOutcome::Parked);

        assert!(cache.get(&key(sql)).await.unwrap().is_some());
        assert!(cache.get(&key(sql)).await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 2));
        assert!((stats.hit_rate() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rejected_handle_stays_parked() {
        let driver = MemoryDriver::new();
        let cache = StatementCache::new(CacheMode::Implicit, 2);
        let (first, second) = ("select * from dual", "select 1 from dual");

        cache.put(key(first), handle(&driver, first).await).await.unwrap();
        cache.put(key(second), handle(&driver, second).await).await.unwrap();

        let rejected = cache
            .get_if(&key(first), |h| h.kind() == StatementKind::Callable)
            .await
            .unwrap();
        assert!(rejected.is_none());
        assert_eq!(cache.len().await, 2);

        // The rejected lookup did not refresh `first`, so it is still the oldest.
        let third = "select 2 from dual";
        let outcome = cache.put(key(third), handle(&driver, third).await).await.unwrap();
        assert_eq!(outcome, ParkOutcome::Evicted);
        assert!(cache.evict(&key(first)).await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (0, 1));
    }

    #[tokio::test]
    async fn test_same_key_replaces() {
        let driver = MemoryDriver::new();
        let cache = StatementCache::new(CacheMode::Implicit, 2);
        let sql = "select * from dual";

        cache.put(key(sql), handle(&driver, sql).await).await.unwrap();
        let outcome = cache.put(key(sql), handle(&driver, sql).await).await.unwrap();

        assert_eq!(outcome, ParkOutcome::Replaced);
        assert_eq!(cache.len().await, 1);
        assert_eq!(driver.open_statements(), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_discards() {
        let driver = MemoryDriver::new();
        let cache = StatementCache::new(CacheMode::Implicit, 0);
        let sql = "select * from dual";

        let outcome = cache.put(key(sql), handle(&driver, sql).await).await.unwrap();
        assert_eq!(outcome, ParkOutcome::Discarded);
        assert!(cache.is_empty().await);
        assert_eq!(driver.open_statements(), 0);
    }

    #[tokio::test]
    async fn test_explicit_capacity_is_unbounded() {
        let driver = MemoryDriver::new();
        let cache = StatementCache::new(CacheMode::Explicit, 1);
        let sql = "select * from dual";

        for name in ["a", "b", "c"] {
            let outcome = cache
                .put(CacheKey::explicit(name), handle(&driver, sql).await)
                .await
                .unwrap();
            assert_eq!(outcome, ParkOutcome::Parked);
        }
        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.capacity(), None);
    }
}
