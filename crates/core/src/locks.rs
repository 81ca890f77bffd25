//! Per-key serialization of read-modify-write sequences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per canonical key.
///
/// Holding the guard returned by [`KeyLocks::lock`] orders every other
/// operation on the same key behind the current one. Unrelated keys never
/// contend.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            // Nobody else holds or waits on a lock whose only owner is the map.
            locks.retain(|k, slot| k == key || Arc::strong_count(slot) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of keys currently tracked.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock("oasis-wonderwall").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("oasis-wonderwall").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = KeyLocks::new();
        let _a = locks.lock("oasis-wonderwall").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("blur-song_2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let locks = KeyLocks::new();
        for key in ["a-b", "c-d", "e-f"] {
            let _guard = locks.lock(key).await;
        }
        let _guard = locks.lock("g-h").await;
        assert_eq!(locks.len(), 1);
    }
}
