//! Per-key mutual exclusion
//!
//! Unrelated keys never contend. Entries are created lazily when a key is
//! first locked and removed again once the last holder or waiter is gone, so
//! the map only ever contains keys that are currently in use.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type KeyMutex = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, KeyMutex>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting for any current holder.
    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };

        let guard = mutex.lock_owned().await;

        KeyedGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys that are currently held or waited on
    pub fn active_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Guard returned by [`KeyedLocks::lock`]; releases the key on drop.
pub struct KeyedGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    owner: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        let mut locks = self
            .owner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Waiters clone the mutex under the map lock, so the count is stable here.
        drop(self.guard.take());

        if locks
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
