//! Per-key mutual exclusion for intake runs.
//!
//! Two submissions for the same `(accession, application)` would otherwise
//! race between the record upsert and the object upload. Holding a
//! [`KeyGuard`] for the whole run keeps at most one run in flight per key;
//! runs for different keys never wait on each other.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Releases the key when dropped.
pub struct KeyGuard {
    key: String,
    locks: KeyedLocks,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other guard holds `key`, then take it.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            locks: self.clone(),
            _guard: guard,
        }
    }

    /// Number of keys currently tracked (held or awaited).
    pub fn tracked_keys(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut map = self
            .locks
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map and one in our own guard: nobody is waiting.
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test]
    async fn same_key_runs_one_at_a_time() {
        let locks = KeyedLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire("123_456").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _first = locks.acquire("1_1").await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.acquire("2_2")).await;
        assert!(second.is_ok());
        assert_eq!(locks.tracked_keys(), 2);
    }

    #[tokio::test]
    async fn waiter_keeps_entry_alive() {
        let locks = KeyedLocks::new();
        let first = locks.acquire("k").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("k").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);
        assert_eq!(locks.tracked_keys(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.tracked_keys(), 0);
    }
}
