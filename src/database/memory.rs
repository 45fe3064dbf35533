//! # In-Memory Store
//!
//! Process-local [`TransactionalStore`] used by tests, benchmarks and
//! embedders that do not need durability.
//!
//! Transactions buffer their writes and apply them atomically on commit.
//! Reads inside a transaction see committed rows plus the transaction's own
//! pending rows. Snapshot sequences come from one shared counter, so they
//! increase across all runs and all transactions.
//!
//! Faults can be injected to exercise the enqueue failure paths:
//! failing snapshot writes, failing commits, and an artificial write delay.

use super::store::{StoreTransaction, TransactionalStore};
use super::{StoreError, StoreResult};
use crate::models::{ExecutionSnapshot, NewExecutionSnapshot, TaskRun};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    runs: HashMap<String, TaskRun>,
    snapshots: HashMap<String, Vec<ExecutionSnapshot>>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    fail_snapshot_writes: AtomicBool,
    fail_commits: AtomicBool,
    write_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<MemoryState>,
    sequence: AtomicI64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    faults: FaultPlan,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent snapshot insert fail until reset.
    pub fn fail_snapshot_writes(&self, fail: bool) {
        self.inner
            .faults
            .fail_snapshot_writes
            .store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent commit fail until reset.
    pub fn fail_commits(&self, fail: bool) {
        self.inner.faults.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every snapshot insert.
    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner
            .faults
            .write_delay_ms
            .store(millis, Ordering::SeqCst);
    }

    /// Committed snapshots of `run_id`, oldest first.
    pub fn snapshots_for(&self, run_id: &str) -> Vec<ExecutionSnapshot> {
        let state = self.inner.state.read();
        let mut snapshots = state.snapshots.get(run_id).cloned().unwrap_or_default();
        snapshots.sort_by_key(ExecutionSnapshot::ordering_key);
        snapshots
    }

    /// Number of committed snapshots across every run.
    pub fn snapshot_count(&self) -> usize {
        self.inner.state.read().snapshots.values().map(Vec::len).sum()
    }

    pub fn task_run(&self, run_id: &str) -> Option<TaskRun> {
        self.inner.state.read().runs.get(run_id).cloned()
    }

    pub fn committed_transactions(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rolled_back_transactions(&self) -> u64 {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            inner: Arc::clone(&self.inner),
            pending_runs: Vec::new(),
            pending_snapshots: Vec::new(),
        }))
    }

    fn store_type(&self) -> &'static str {
        "in_memory"
    }
}

struct InMemoryTransaction {
    inner: Arc<Inner>,
    pending_runs: Vec<TaskRun>,
    pending_snapshots: Vec<ExecutionSnapshot>,
}

impl InMemoryTransaction {
    fn visible_snapshots(&self, run_id: &str) -> Vec<ExecutionSnapshot> {
        let state = self.inner.state.read();
        let mut snapshots: Vec<ExecutionSnapshot> = state
            .snapshots
            .get(run_id)
            .into_iter()
            .flatten()
            .chain(self.pending_snapshots.iter().filter(|s| s.run_id == run_id))
            .cloned()
            .collect();
        snapshots.sort_by_key(ExecutionSnapshot::ordering_key);
        snapshots
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_task_run(&mut self, run: &TaskRun) -> StoreResult<()> {
        let exists = self.inner.state.read().runs.contains_key(&run.id)
            || self.pending_runs.iter().any(|r| r.id == run.id);
        if exists {
            return Err(StoreError::duplicate("task_run", run.id.clone()));
        }
        self.pending_runs.push(run.clone());
        Ok(())
    }

    async fn find_task_run(&mut self, run_id: &str) -> StoreResult<Option<TaskRun>> {
        if let Some(run) = self.pending_runs.iter().find(|r| r.id == run_id) {
            return Ok(Some(run.clone()));
        }
        Ok(self.inner.state.read().runs.get(run_id).cloned())
    }

    async fn insert_execution_snapshot(
        &mut self,
        snapshot: NewExecutionSnapshot,
    ) -> StoreResult<ExecutionSnapshot> {
        let delay_ms = self.inner.faults.write_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.inner.faults.fail_snapshot_writes.load(Ordering::SeqCst) {
            return Err(StoreError::injected("insert_execution_snapshot"));
        }

        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = ExecutionSnapshot::from_new(snapshot, sequence);
        self.pending_snapshots.push(stored.clone());
        Ok(stored)
    }

    async fn latest_execution_snapshot(
        &mut self,
        run_id: &str,
    ) -> StoreResult<Option<ExecutionSnapshot>> {
        Ok(self.visible_snapshots(run_id).pop())
    }

    async fn execution_snapshots(&mut self, run_id: &str) -> StoreResult<Vec<ExecutionSnapshot>> {
        Ok(self.visible_snapshots(run_id))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.inner.faults.fail_commits.load(Ordering::SeqCst) {
            self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::injected("commit"));
        }

        let this = *self;
        {
            let mut state = this.inner.state.write();
            for run in this.pending_runs {
                state.runs.insert(run.id.clone(), run);
            }
            for snapshot in this.pending_snapshots {
                state
                    .snapshots
                    .entry(snapshot.run_id.clone())
                    .or_default()
                    .push(snapshot);
            }
        }
        this.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ExecutionStatus;
    use crate::models::execution_snapshot::generate_snapshot_id;
    use crate::models::RuntimeEnvironmentType;
    use chrono::Utc;

    fn new_snapshot(run_id: &str, status: ExecutionStatus) -> NewExecutionSnapshot {
        NewExecutionSnapshot {
            id: generate_snapshot_id(),
            run_id: run_id.to_string(),
            execution_status: status,
            description: status.to_string(),
            created_at: Utc::now(),
            batch_id: None,
            checkpoint_id: None,
            completed_waitpoints: vec![],
            worker_id: None,
            runner_id: None,
            environment_id: "env_1".to_string(),
            environment_type: RuntimeEnvironmentType::Development,
        }
    }

    #[tokio::test]
    async fn test_pending_snapshots_visible_inside_transaction_only() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_execution_snapshot(new_snapshot("run_1", ExecutionStatus::Queued))
            .await
            .unwrap();

        let latest = tx.latest_execution_snapshot("run_1").await.unwrap();
        assert_eq!(latest.map(|s| s.execution_status), Some(ExecutionStatus::Queued));
        assert!(store.snapshots_for("run_1").is_empty());

        tx.commit().await.unwrap();
        assert_eq!(store.snapshots_for("run_1").len(), 1);
        assert_eq!(store.committed_transactions(), 1);
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic_across_transactions() {
        let store = InMemoryStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let a = first
            .insert_execution_snapshot(new_snapshot("run_1", ExecutionStatus::Queued))
            .await
            .unwrap();
        let b = second
            .insert_execution_snapshot(new_snapshot("run_2", ExecutionStatus::Queued))
            .await
            .unwrap();
        assert!(b.sequence > a.sequence);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = InMemoryStore::new();
        store.fail_snapshot_writes(true);
        let mut tx = store.begin().await.unwrap();
        let result = tx
            .insert_execution_snapshot(new_snapshot("run_1", ExecutionStatus::Queued))
            .await;
        assert!(matches!(result, Err(StoreError::Injected { .. })));
    }

    #[tokio::test]
    async fn test_failed_commit_discards_writes() {
        let store = InMemoryStore::new();
        store.fail_commits(true);
        let mut tx = store.begin().await.unwrap();
        tx.insert_execution_snapshot(new_snapshot("run_1", ExecutionStatus::Queued))
            .await
            .unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_run_rejected() {
        let store = InMemoryStore::new();
        let run = TaskRun::new("run_1", "env_1", "org_1", "proj_1", "t", "default", "mq-1");
        let mut tx = store.begin().await.unwrap();
        tx.insert_task_run(&run).await.unwrap();
        assert!(matches!(
            tx.insert_task_run(&run).await,
            Err(StoreError::Duplicate { .. })
        ));
    }
}
