//! Error types for the run engine.
//!
//! Each capability has its own error enum ([`StoreError`], [`LockError`],
//! [`MessagingError`], [`ConfigurationError`]). [`EnqueueError`] is the
//! surface callers of `enqueue_run` match on, and [`RunEngineError`] wraps
//! everything for callers that only need to propagate.

use crate::config::ConfigurationError;
use crate::database::StoreError;
use crate::gateway::GatewayError;
use crate::locking::LockError;
use crate::messaging::MessagingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunEngineError {
    #[error("Enqueue error: {0}")]
    Enqueue(#[from] EnqueueError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type RunEngineResult<T> = anyhow::Result<T, RunEngineError>;
pub type EnqueueResult<T> = anyhow::Result<T, EnqueueError>;

/// Failure modes of `EnqueueSystem::enqueue_run`.
///
/// The variants map onto the points of the enqueue sequence where the
/// operation stopped:
///
/// | variant | snapshot written | message published |
/// |---|---|---|
/// | `Validation` | no | no |
/// | `LockTimeout` / `Lock` | no | no |
/// | `SnapshotPersistence` | no | no |
/// | `DispatchPublish` | yes | no |
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnqueueError {
    /// The run lock was not acquired within the timeout. Nothing was written.
    #[error("Timed out after {timeout_ms}ms waiting for run lock on {run_id}")]
    LockTimeout { run_id: String, timeout_ms: u64 },

    /// The lock backend failed for a reason other than contention.
    #[error("Run lock backend failed for {run_id}: {reason}")]
    Lock { run_id: String, reason: String },

    /// Writing or committing the execution snapshot failed. Nothing was published.
    #[error("Failed to persist execution snapshot for run {run_id}: {reason}")]
    SnapshotPersistence { run_id: String, reason: String },

    /// The snapshot is committed but the dispatch message never reached the queue.
    ///
    /// Calling `enqueue_run` again would record a second queued snapshot.
    /// Use `republish_run` or leave it to reconciliation.
    #[error(
        "Snapshot {snapshot_id} committed for run {run_id} but publish to {master_queues:?} failed: {reason}"
    )]
    DispatchPublish {
        run_id: String,
        snapshot_id: String,
        master_queues: Vec<String>,
        reason: String,
    },

    /// The request was rejected before the lock was requested.
    #[error("Invalid enqueue request: {0}")]
    Validation(String),

    /// The detached critical section stopped without producing a result.
    #[error("Enqueue for run {run_id} was interrupted: {reason}")]
    Interrupted { run_id: String, reason: String },
}

impl EnqueueError {
    pub fn lock_timeout(run_id: impl Into<String>, timeout_ms: u64) -> Self {
        Self::LockTimeout {
            run_id: run_id.into(),
            timeout_ms,
        }
    }

    pub fn snapshot_persistence(run_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SnapshotPersistence {
            run_id: run_id.into(),
            reason: reason.into(),
        }
    }

    pub fn dispatch_publish(
        run_id: impl Into<String>,
        snapshot_id: impl Into<String>,
        master_queues: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::DispatchPublish {
            run_id: run_id.into(),
            snapshot_id: snapshot_id.into(),
            master_queues,
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether calling `enqueue_run` again with the same arguments is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::Lock { .. } | Self::SnapshotPersistence { .. }
        )
    }

    /// Whether a snapshot may exist without a matching queue message.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, Self::DispatchPublish { .. } | Self::Interrupted { .. })
    }

    /// Stable label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Lock { .. } => "lock_backend",
            Self::SnapshotPersistence { .. } => "snapshot_persistence",
            Self::DispatchPublish { .. } => "dispatch_publish",
            Self::Validation(_) => "validation",
            Self::Interrupted { .. } => "interrupted",
        }
    }
}

impl From<LockError> for EnqueueError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { keys, timeout_ms } => Self::LockTimeout {
                run_id: keys.join(","),
                timeout_ms,
            },
            LockError::Backend { keys, message } => Self::Lock {
                run_id: keys.join(","),
                reason: message,
            },
            LockError::NoKeys => Self::Validation("run lock requires a run id".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_errors_map_to_enqueue_errors() {
        let err: EnqueueError = LockError::Timeout {
            keys: vec!["run_1".to_string()],
            timeout_ms: 5000,
        }
        .into();
        assert_eq!(err, EnqueueError::lock_timeout("run_1", 5000));

        let err: EnqueueError = LockError::NoKeys.into();
        assert!(matches!(err, EnqueueError::Validation(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EnqueueError::lock_timeout("run_1", 5000).is_retryable());
        assert!(EnqueueError::snapshot_persistence("run_1", "boom").is_retryable());
        assert!(!EnqueueError::dispatch_publish(
            "run_1",
            "snapshot_1",
            vec!["mq-1".to_string()],
            "broker down"
        )
        .is_retryable());
        assert!(!EnqueueError::validation("empty run id").is_retryable());
    }

    #[test]
    fn test_only_dispatch_failures_need_reconciliation() {
        let publish =
            EnqueueError::dispatch_publish("run_1", "snapshot_1", vec!["mq-1".to_string()], "x");
        assert!(publish.requires_reconciliation());
        assert!(!EnqueueError::lock_timeout("run_1", 10).requires_reconciliation());
        assert_eq!(publish.kind(), "dispatch_publish");
    }

    #[test]
    fn test_display_mentions_run_and_timeout() {
        let err = EnqueueError::lock_timeout("run_42", 5000);
        let message = err.to_string();
        assert!(message.contains("run_42"));
        assert!(message.contains("5000ms"));
    }

    #[test]
    fn test_engine_error_wraps_enqueue_error() {
        let err: RunEngineError = EnqueueError::validation("bad").into();
        assert!(matches!(err, RunEngineError::Enqueue(EnqueueError::Validation(_))));
    }
}
