//! # Execution Snapshot System
//!
//! The single writer of run-state history. A run's history is an append-only
//! log of [`ExecutionSnapshot`]s; its current status is the status of the
//! latest one by `(created_at, sequence)`.
//!
//! Writes always happen inside a transaction supplied by the caller so they
//! commit or roll back together with the caller's other work. No transition
//! legality is checked here; callers decide when a transition is allowed.

use crate::constants::ExecutionStatus;
use crate::database::{ScopedTransaction, StoreResult, StoreTransaction, TransactionalStore};
use crate::models::execution_snapshot::generate_snapshot_id;
use crate::models::{CompletedWaitpoint, ExecutionSnapshot, NewExecutionSnapshot, RuntimeEnvironmentType};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Fields of a new snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateExecutionSnapshot {
    pub run_id: String,
    pub execution_status: ExecutionStatus,
    pub description: String,
    pub batch_id: Option<String>,
    pub environment_id: String,
    pub environment_type: RuntimeEnvironmentType,
    pub checkpoint_id: Option<String>,
    pub completed_waitpoints: Vec<CompletedWaitpoint>,
    pub worker_id: Option<String>,
    pub runner_id: Option<String>,
}

#[derive(Clone)]
pub struct ExecutionSnapshotSystem {
    store: Arc<dyn TransactionalStore>,
}

impl std::fmt::Debug for ExecutionSnapshotSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSnapshotSystem")
            .field("store", &self.store.store_type())
            .finish()
    }
}

impl ExecutionSnapshotSystem {
    pub fn new(store: Arc<dyn TransactionalStore>) -> Self {
        Self { store }
    }

    /// Append a snapshot inside `tx`. Never opens, commits or rolls back a
    /// transaction of its own.
    pub async fn create_execution_snapshot(
        &self,
        tx: &mut dyn StoreTransaction,
        params: CreateExecutionSnapshot,
    ) -> StoreResult<ExecutionSnapshot> {
        let new_snapshot = NewExecutionSnapshot {
            id: generate_snapshot_id(),
            run_id: params.run_id,
            execution_status: params.execution_status,
            description: params.description,
            created_at: Utc::now(),
            batch_id: params.batch_id,
            checkpoint_id: params.checkpoint_id,
            completed_waitpoints: params.completed_waitpoints,
            worker_id: params.worker_id,
            runner_id: params.runner_id,
            environment_id: params.environment_id,
            environment_type: params.environment_type,
        };

        let snapshot = tx.insert_execution_snapshot(new_snapshot).await?;
        debug!(
            run_id = %snapshot.run_id,
            snapshot_id = %snapshot.id,
            sequence = snapshot.sequence,
            status = %snapshot.execution_status,
            "Execution snapshot created"
        );
        Ok(snapshot)
    }

    /// Latest snapshot of `run_id`, read through `tx` when given, otherwise
    /// through a short-lived transaction of its own.
    pub async fn get_latest_execution_snapshot(
        &self,
        tx: Option<&mut dyn StoreTransaction>,
        run_id: &str,
    ) -> StoreResult<Option<ExecutionSnapshot>> {
        let mut scoped = ScopedTransaction::resolve(self.store.as_ref(), tx).await?;
        let result = scoped.transaction().latest_execution_snapshot(run_id).await;
        scoped.finish(result).await
    }

    /// Status of the latest snapshot, `None` for a run without history.
    pub async fn current_status(
        &self,
        tx: Option<&mut dyn StoreTransaction>,
        run_id: &str,
    ) -> StoreResult<Option<ExecutionStatus>> {
        Ok(self
            .get_latest_execution_snapshot(tx, run_id)
            .await?
            .map(|snapshot| snapshot.execution_status))
    }

    /// Every snapshot of `run_id`, oldest first.
    pub async fn snapshot_history(
        &self,
        tx: Option<&mut dyn StoreTransaction>,
        run_id: &str,
    ) -> StoreResult<Vec<ExecutionSnapshot>> {
        let mut scoped = ScopedTransaction::resolve(self.store.as_ref(), tx).await?;
        let result = scoped.transaction().execution_snapshots(run_id).await;
        scoped.finish(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryStore;

    fn params(run_id: &str, status: ExecutionStatus) -> CreateExecutionSnapshot {
        CreateExecutionSnapshot {
            run_id: run_id.to_string(),
            execution_status: status,
            description: format!("Run was {status}"),
            batch_id: None,
            environment_id: "env_1".to_string(),
            environment_type: RuntimeEnvironmentType::Development,
            checkpoint_id: None,
            completed_waitpoints: vec![],
            worker_id: None,
            runner_id: None,
        }
    }

    fn system() -> (InMemoryStore, ExecutionSnapshotSystem) {
        let store = InMemoryStore::new();
        let system = ExecutionSnapshotSystem::new(Arc::new(store.clone()));
        (store, system)
    }

    #[tokio::test]
    async fn test_create_does_not_commit() {
        let (store, system) = system();
        let mut tx = store.begin().await.unwrap();
        system
            .create_execution_snapshot(tx.as_mut(), params("run_1", ExecutionStatus::Queued))
            .await
            .unwrap();
        assert_eq!(store.snapshot_count(), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_current_status_follows_latest_snapshot() {
        let (store, system) = system();
        let mut tx = store.begin().await.unwrap();
        for status in [
            ExecutionStatus::Queued,
            ExecutionStatus::Executing,
            ExecutionStatus::Suspended,
            ExecutionStatus::QueuedExecuting,
        ] {
            system
                .create_execution_snapshot(tx.as_mut(), params("run_1", status))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        assert_eq!(
            system.current_status(None, "run_1").await.unwrap(),
            Some(ExecutionStatus::QueuedExecuting)
        );
        assert_eq!(system.current_status(None, "run_missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_history_is_totally_ordered() {
        let (store, system) = system();
        let mut tx = store.begin().await.unwrap();
        for _ in 0..20 {
            system
                .create_execution_snapshot(tx.as_mut(), params("run_1", ExecutionStatus::Queued))
                .await
                .unwrap();
        }

        let history = system
            .snapshot_history(Some(tx.as_mut()), "run_1")
            .await
            .unwrap();
        assert_eq!(history.len(), 20);
        assert!(history.windows(2).all(|pair| pair[1].is_newer_than(&pair[0])));
    }

    #[tokio::test]
    async fn test_waitpoints_and_links_are_recorded() {
        let (store, system) = system();
        let mut tx = store.begin().await.unwrap();
        let mut request = params("run_1", ExecutionStatus::QueuedExecuting);
        request.checkpoint_id = Some("checkpoint_1".to_string());
        request.batch_id = Some("batch_1".to_string());
        request.completed_waitpoints = vec![
            CompletedWaitpoint::new("waitpoint_a"),
            CompletedWaitpoint::with_index("waitpoint_b", 2),
        ];

        let snapshot = system
            .create_execution_snapshot(tx.as_mut(), request)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let latest = system
            .get_latest_execution_snapshot(None, "run_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest, snapshot);
        assert_eq!(latest.completed_waitpoints.len(), 2);
        assert_eq!(latest.completed_waitpoints[1].index, Some(2));
    }
}
