use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-fingerprint mutual exclusion.
///
/// Each live key owns an async mutex in a sharded map. The map shard is only
/// locked while a slot is looked up, inserted or removed, never while the
/// holder does its work, so distinct keys proceed independently. A slot is
/// dropped from the map when its last holder or waiter lets go.
#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other guard for `key` is alive, then returns one.
    pub async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        // The shard guard returned by `or_default` is a temporary and is released
        // before awaiting the slot.
        let slot = self.slots.entry(key.to_owned()).or_default().value().clone();
        let guard = Arc::clone(&slot).lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_owned(),
            slot,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive hold on one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    slot: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Two references left means the map and this guard: nobody is waiting.
        // Waiters clone the slot under the same shard lock `remove_if` takes.
        self.locks.slots.remove_if(&self.key, |_, slot| {
            Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn slot_is_removed_after_release() {
        let locks = KeyLocks::new();
        {
            let guard = locks.acquire("/a").await;
            assert_eq!(guard.key(), "/a");
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.acquire("/a").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.acquire("/b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn same_key_waits_for_holder() {
        let locks = KeyLocks::new();
        let held = locks.acquire("/a").await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire("/a")).await;
        assert!(blocked.is_err());
        drop(held);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(200), locks.acquire("/a")).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn holders_never_overlap() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                tokio::spawn(async move {
                    let _guard = locks.acquire("/shared").await;
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(locks.is_empty());
    }
}
