//! # Run Locking
//!
//! Per-key mutual exclusion with a bounded wait. Every state-affecting
//! operation on a run executes while holding the lock keyed by the run id.
//!
//! ## Key Components
//!
//! - [`RunLock`] / [`HeldLock`] - the backend capability
//! - [`RunLocker`] - front end that normalises keys and guarantees release
//! - [`memory::InMemoryRunLock`] - process-local backend
//! - [`postgres::PgAdvisoryRunLock`] - PostgreSQL session advisory locks
//!
//! ## Reentrancy
//!
//! Locks are not reentrant. Requesting a key that the current task already
//! holds waits for itself and fails with [`LockError::Timeout`] once the
//! timeout elapses.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRunLock;
pub use postgres::PgAdvisoryRunLock;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("Timed out after {timeout_ms}ms waiting for lock on {keys:?}")]
    Timeout { keys: Vec<String>, timeout_ms: u64 },

    #[error("Lock backend error for {keys:?}: {message}")]
    Backend { keys: Vec<String>, message: String },

    #[error("At least one lock key is required")]
    NoKeys,
}

impl LockError {
    pub fn timeout(keys: &[String], timeout: Duration) -> Self {
        Self::Timeout {
            keys: keys.to_vec(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn backend(keys: &[String], message: impl ToString) -> Self {
        Self::Backend {
            keys: keys.to_vec(),
            message: message.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type LockResult<T> = Result<T, LockError>;

/// Backend capability: acquire exclusive ownership of every key or none.
#[async_trait]
pub trait RunLock: Send + Sync {
    /// `keys` arrive sorted and deduplicated.
    async fn acquire(&self, keys: &[String], timeout: Duration) -> LockResult<Box<dyn HeldLock>>;

    fn lock_type(&self) -> &'static str;
}

/// Ownership of a set of keys. Dropping it without [`release`](Self::release)
/// still frees the keys, though a backend may do so lazily.
#[async_trait]
pub trait HeldLock: Send {
    fn keys(&self) -> &[String];

    async fn release(self: Box<Self>) -> LockResult<()>;
}

/// Cloneable front end over a [`RunLock`] backend.
#[derive(Clone)]
pub struct RunLocker {
    backend: Arc<dyn RunLock>,
}

impl std::fmt::Debug for RunLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLocker")
            .field("backend", &self.backend.lock_type())
            .finish()
    }
}

impl RunLocker {
    pub fn new(backend: Arc<dyn RunLock>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRunLock::new()))
    }

    pub fn lock_type(&self) -> &'static str {
        self.backend.lock_type()
    }

    /// Acquire every key within `timeout`. The returned guard must be released
    /// with [`RunLockGuard::release`]; dropping it also frees the keys.
    pub async fn acquire(&self, keys: &[String], timeout: Duration) -> LockResult<RunLockGuard> {
        let keys = normalize_keys(keys)?;
        debug!(keys = ?keys, timeout_ms = timeout.as_millis() as u64, "Acquiring run lock");

        let held = self.backend.acquire(&keys, timeout).await?;
        debug!(keys = ?keys, "Run lock acquired");
        Ok(RunLockGuard { held: Some(held) })
    }

    /// Run `body` while holding every key. The keys are released on every
    /// exit path before this returns. Lock failures surface through
    /// `E: From<LockError>` and are distinguishable from errors of `body`.
    pub async fn lock<F, Fut, T, E>(&self, keys: &[String], timeout: Duration, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire(keys, timeout).await?;
        let result = body().await;
        guard.release().await;
        result
    }
}

fn normalize_keys(keys: &[String]) -> LockResult<Vec<String>> {
    let mut keys = keys.to_vec();
    keys.sort();
    keys.dedup();
    if keys.is_empty() {
        return Err(LockError::NoKeys);
    }
    Ok(keys)
}

/// Held run lock.
pub struct RunLockGuard {
    held: Option<Box<dyn HeldLock>>,
}

impl std::fmt::Debug for RunLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLockGuard")
            .field("keys", &self.keys())
            .finish()
    }
}

impl RunLockGuard {
    pub fn keys(&self) -> &[String] {
        self.held.as_ref().map(|held| held.keys()).unwrap_or(&[])
    }

    /// Release the keys. A backend failure is logged; the keys are freed
    /// regardless once the backend connection goes away.
    pub async fn release(mut self) {
        if let Some(held) = self.held.take() {
            let keys = held.keys().to_vec();
            match held.release().await {
                Ok(()) => debug!(keys = ?keys, "Run lock released"),
                Err(e) => warn!(keys = ?keys, error = %e, "Run lock release failed"),
            }
        }
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if let Some(held) = self.held.as_ref() {
            debug!(keys = ?held.keys(), "Run lock guard dropped without explicit release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_keys_sorts_and_dedupes() {
        assert_eq!(
            normalize_keys(&keys(&["run_b", "run_a", "run_b"])).unwrap(),
            keys(&["run_a", "run_b"])
        );
        assert_eq!(normalize_keys(&[]), Err(LockError::NoKeys));
    }

    #[tokio::test]
    async fn test_lock_releases_after_body_error() {
        let locker = RunLocker::in_memory();
        let run = keys(&["run_1"]);

        let result: Result<(), LockError> = locker
            .lock(&run, Duration::from_millis(100), || async {
                Err(LockError::backend(&["body".to_string()], "body failed"))
            })
            .await;
        assert!(matches!(result, Err(LockError::Backend { .. })));

        // Free again
        let guard = locker.acquire(&run, Duration::from_millis(100)).await.unwrap();
        assert_eq!(guard.keys(), run.as_slice());
        guard.release().await;
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable_from_body_errors() {
        let locker = RunLocker::in_memory();
        let run = keys(&["run_1"]);
        let held = locker.acquire(&run, Duration::from_millis(100)).await.unwrap();

        let result: Result<(), LockError> = locker
            .lock(&run, Duration::from_millis(30), || async { Ok(()) })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            err,
            LockError::Timeout {
                keys: run.clone(),
                timeout_ms: 30
            }
        );

        held.release().await;
    }

    #[tokio::test]
    async fn test_nested_lock_on_same_key_times_out() {
        let locker = RunLocker::in_memory();
        let run = keys(&["run_1"]);
        let inner = locker.clone();
        let inner_keys = run.clone();

        let result: Result<Result<(), LockError>, LockError> = locker
            .lock(&run, Duration::from_millis(100), || async move {
                Ok(inner
                    .lock(&inner_keys, Duration::from_millis(20), || async { Ok(()) })
                    .await)
            })
            .await;

        assert!(result.unwrap().unwrap_err().is_timeout());
    }
}
