//! # Keyed Async Locks
//!
//! A table of async mutexes created on first use. The allocator keys it by
//! `(spot type, ranking gate)` so that two arrivals competing for the same
//! "nearest spot" serialize, while unrelated searches run in parallel.
//!
//! Acquisition is bounded: waiting longer than the timeout fails with a
//! retryable `ContentionTimeout` instead of hanging.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Held for as long as the lease lives.
pub type LockLease = OwnedMutexGuard<()>;

#[derive(Debug)]
pub struct LockTable<K> {
    name: &'static str,
    locks: parking_lot::Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: &'static str) -> Self {
        LockTable {
            name,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Waits up to `timeout` for exclusive access to `key`.
    pub async fn acquire(&self, key: K, timeout: Duration) -> EngineResult<LockLease> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(lease) => Ok(lease),
            Err(_) => {
                let waited_ms = timeout.as_millis() as u64;
                warn!(table = self.name, ?key, waited_ms, "Lock acquisition timed out");
                Err(EngineError::contention(
                    format!("{} {:?}", self.name, key),
                    waited_ms,
                ))
            }
        }
    }

    /// Drops locks nobody holds or waits for. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let table: LockTable<u32> = LockTable::new("test window");
        let lease = table.acquire(1, Duration::from_millis(50)).await.unwrap();

        let err = table
            .acquire(1, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("test window 1"));

        drop(lease);
        assert!(table.acquire(1, Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let table: LockTable<(u8, u8)> = LockTable::new("window");
        let _a = table.acquire((1, 1), Duration::from_millis(20)).await.unwrap();
        let _b = table.acquire((1, 2), Duration::from_millis(20)).await.unwrap();
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let table: LockTable<&str> = LockTable::new("ticket");
        let held = table.acquire("a", Duration::from_millis(20)).await.unwrap();
        drop(table.acquire("b", Duration::from_millis(20)).await.unwrap());

        assert_eq!(table.prune(), 1);
        assert_eq!(table.len(), 1);

        drop(held);
        assert_eq!(table.prune(), 1);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_proceeds_after_release() {
        let table = Arc::new(LockTable::<u32>::new("window"));
        let lease = table.acquire(7, Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.acquire(7, Duration::from_secs(5)).await.is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(lease);
        assert!(waiter.await.unwrap());
    }
}
