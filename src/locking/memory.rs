//! Process-local run lock backed by one `tokio::sync::Mutex` per key.
//!
//! Waiters are served in FIFO order by the tokio mutex. Entries are removed
//! from the map once nobody holds or waits on them.

use super::{HeldLock, LockError, LockResult, RunLock};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type KeyTable = DashMap<String, Arc<Mutex<()>>>;

#[derive(Debug, Default, Clone)]
pub struct InMemoryRunLock {
    locks: Arc<KeyTable>,
}

impl InMemoryRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }

    fn mutex_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().value().clone()
    }
}

#[async_trait]
impl RunLock for InMemoryRunLock {
    async fn acquire(&self, keys: &[String], timeout: Duration) -> LockResult<Box<dyn HeldLock>> {
        let mutexes: Vec<Arc<Mutex<()>>> = keys.iter().map(|key| self.mutex_for(key)).collect();

        // Sorted keys give every caller the same acquisition order
        let acquire_all = async move {
            let mut guards = Vec::with_capacity(mutexes.len());
            for mutex in mutexes {
                guards.push(mutex.lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(timeout, acquire_all).await {
            Ok(guards) => Ok(Box::new(InMemoryHeldLock {
                keys: keys.to_vec(),
                guards,
                table: Arc::clone(&self.locks),
            })),
            Err(_) => {
                prune(&self.locks, keys);
                Err(LockError::timeout(keys, timeout))
            }
        }
    }

    fn lock_type(&self) -> &'static str {
        "in_memory"
    }
}

struct InMemoryHeldLock {
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
    table: Arc<KeyTable>,
}

impl Drop for InMemoryHeldLock {
    fn drop(&mut self) {
        self.guards.clear();
        prune(&self.table, &self.keys);
    }
}

#[async_trait]
impl HeldLock for InMemoryHeldLock {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    async fn release(self: Box<Self>) -> LockResult<()> {
        // Drop frees the guards and prunes the table
        Ok(())
    }
}

fn prune(table: &KeyTable, keys: &[String]) {
    for key in keys {
        table.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
