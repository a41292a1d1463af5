//! Persistence boundary for encoded entries.
//!
//! The cache only needs `get`, `set` with a TTL, and `delete` over opaque byte
//! blobs. [`MemoryStorage`] is the in-process default; a Redis, disk or other
//! networked backend plugs in by implementing [`Storage`].

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};
use tracing::debug;

/// Boxed error type for wrapping backend-specific failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by [`Storage`] operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] BoxError),
}

/// Key/value byte store with per-key expiration.
///
/// Implementations must be safe for concurrent use; the cache calls them from
/// many tasks at once and never serializes access across keys. A `set` must
/// replace the stored value atomically: readers see either the old blob or the
/// new one.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use bytes::Bytes;
/// use rttp_cache::cache::{Storage, StorageError, StorageFuture};
///
/// /// Stores nothing; every lookup misses.
/// struct Discard;
///
/// impl Storage for Discard {
///     fn get<'a>(&'a self, _key: &'a str) -> StorageFuture<'a, Option<Bytes>> {
///         Box::pin(async { Ok(None) })
///     }
///     fn set<'a>(&'a self, _key: &'a str, _value: Bytes, _ttl: Duration) -> StorageFuture<'a, ()> {
///         Box::pin(async { Ok(()) })
///     }
///     fn delete<'a>(&'a self, _key: &'a str) -> StorageFuture<'a, ()> {
///         Box::pin(async { Ok(()) })
///     }
/// }
/// ```
pub trait Storage: Send + Sync {
    /// Returns the blob stored at `key`, or `None` if absent or expired.
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<Bytes>>;

    /// Stores `value` at `key`. A zero `ttl` means no expiry.
    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StorageFuture<'a, ()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;
}

#[derive(Debug)]
struct Slot {
    value: Bytes,
    deadline: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline.is_none_or(|deadline| now < deadline)
    }
}

/// In-process [`Storage`] backed by a sharded map.
///
/// Cloning is cheap and every clone shares the same entries. Expired entries
/// are invisible to [`get`](Storage::get) immediately and are removed either on
/// that lookup, by [`purge_expired`](Self::purge_expired), or by the sweeper
/// started with [`spawn_gc`](Self::spawn_gc).
///
/// Each [`Config`](super::Config) built without an explicit storage gets its
/// own `MemoryStorage`; share one by passing the same clone to several configs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: Arc<DashMap<String, Slot>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|slot| slot.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Removes expired entries now, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        purge(&self.slots)
    }

    /// Starts a Tokio task that purges expired entries every `interval`.
    ///
    /// The task holds only a weak reference and exits on the first tick after
    /// the last `MemoryStorage` handle is dropped. Abort the returned handle to
    /// stop it earlier. Must be called from within a Tokio runtime.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let slots = Arc::downgrade(&self.slots);
        let period = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(slots) = slots.upgrade() else {
                    debug!("memory storage dropped, stopping gc");
                    break;
                };
                let purged = purge(&slots);
                if purged > 0 {
                    debug!(purged, "purged expired cache entries");
                }
            }
        })
    }
}

fn purge(slots: &DashMap<String, Slot>) -> usize {
    let now = Instant::now();
    let mut purged = 0;
    slots.retain(|_, slot| {
        let live = slot.is_live(now);
        if !live {
            purged += 1;
        }
        live
    });
    purged
}

impl Storage for MemoryStorage {
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            let now = Instant::now();
            let expired = match self.slots.get(key) {
                Some(slot) if slot.is_live(now) => return Ok(Some(slot.value.clone())),
                Some(_) => true,
                None => false,
            };
            if expired {
                self.slots.remove_if(key, |_, slot| !slot.is_live(now));
            }
            Ok(None)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let deadline = if ttl.is_zero() {
                None
            } else {
                Instant::now().checked_add(ttl)
            };
            self.slots.insert(key.to_owned(), Slot { value, deadline });
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.slots.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").await.unwrap(), None);

        storage
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
        assert_eq!(storage.len(), 1);

        storage.delete("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
        storage.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage
            .set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .unwrap();
        assert!(other.get("k").await.unwrap().is_some());
        other.clear();
        assert!(storage.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let storage = MemoryStorage::new();
        storage
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert!(storage.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(storage.get("k").await.unwrap(), None);
        // The expired lookup removed the slot.
        assert!(storage.slots.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let storage = MemoryStorage::new();
        storage
            .set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(storage.get("k").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let storage = MemoryStorage::new();
        storage
            .set("short", Bytes::from_static(b"1"), Duration::from_secs(1))
            .await
            .unwrap();
        storage
            .set("long", Bytes::from_static(b"2"), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.purge_expired(), 1);
        assert_eq!(storage.slots.len(), 1);
        assert!(storage.get("long").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn gc_task_sweeps_and_stops() {
        let storage = MemoryStorage::new();
        storage
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(1))
            .await
            .unwrap();
        let gc = storage.spawn_gc(Duration::from_millis(500));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(storage.slots.is_empty());

        drop(storage);
        gc.await.unwrap();
    }
}
