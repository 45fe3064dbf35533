//! # Enqueue System
//!
//! Makes a run eligible for execution: records a queued execution snapshot
//! and publishes one dispatch message to each of the run's master queues, as
//! one operation serialised per run.
//!
//! ## Sequence
//!
//! ```text
//! validate ──▶ acquire run lock ──▶ write snapshot ──▶ commit ──▶ publish ──▶ release
//!                   │                     │                          │
//!              LockTimeout       SnapshotPersistence          DispatchPublish
//!            (nothing written)    (nothing published)      (snapshot committed)
//! ```
//!
//! The snapshot is always durable before the message is visible on a queue.
//! The reverse gap exists: a committed snapshot whose publish failed is
//! reported as [`EnqueueError::DispatchPublish`] and can be repaired with
//! [`EnqueueSystem::republish_run`].
//!
//! ## Transactions
//!
//! Without a caller transaction the system opens one after the lock is held
//! and commits it before publishing. With a caller transaction the snapshot
//! is written into it, the message is published, and committing stays with
//! the caller.
//!
//! ## Cancellation
//!
//! Dropping the `enqueue_run` future while it waits for the lock has no
//! side effects. Once the lock is held, a self-owned transaction runs to
//! completion on a spawned task, so the lock and the transaction are never
//! abandoned midway.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use run_engine::config::EngineConfig;
//! use run_engine::models::{AuthenticatedEnvironment, RuntimeEnvironmentType, TaskRun};
//! use run_engine::orchestration::{EnqueueRunOptions, EnqueueSystem, SystemResources};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let system = EnqueueSystem::new(SystemResources::in_memory(), &EngineConfig::default());
//! let env = AuthenticatedEnvironment::new("env_1", RuntimeEnvironmentType::Production, "org_1", "proj_1");
//! let run = TaskRun::new("run_1", "env_1", "org_1", "proj_1", "send-email", "default", "mq-1");
//!
//! let snapshot = system
//!     .enqueue_run(&run, &env, chrono::Utc::now(), EnqueueRunOptions::new())
//!     .await?;
//! assert!(snapshot.execution_status.is_queued());
//! # Ok(())
//! # }
//! ```

use crate::config::{EngineConfig, EnqueueConfig, QueueBackend};
use crate::constants::QueuedStatus;
use crate::database::{
    DatabaseConnection, InMemoryStore, PgStore, ScopedTransaction, StoreError, StoreResult,
    StoreTransaction, TransactionalStore,
};
use crate::error::{EnqueueError, EnqueueResult, RunEngineResult};
use crate::locking::{PgAdvisoryRunLock, RunLockGuard, RunLocker};
use crate::logging::log_run_operation;
use crate::messaging::{InMemoryRunQueue, PgmqRunQueue, QueueMessage, RunQueue};
use crate::models::{AuthenticatedEnvironment, CompletedWaitpoint, ExecutionSnapshot, TaskRun};
use crate::orchestration::execution_snapshot_system::{
    CreateExecutionSnapshot, ExecutionSnapshotSystem,
};
use crate::validation::{validate_enqueue_request, validate_run_routing};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn, Instrument, Span};

/// Capabilities the enqueue system coordinates.
#[derive(Clone)]
pub struct SystemResources {
    pub store: Arc<dyn TransactionalStore>,
    pub run_lock: RunLocker,
    pub run_queue: Arc<dyn RunQueue>,
}

impl SystemResources {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        run_lock: RunLocker,
        run_queue: Arc<dyn RunQueue>,
    ) -> Self {
        Self {
            store,
            run_lock,
            run_queue,
        }
    }

    /// Process-local store, lock and queue.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            RunLocker::in_memory(),
            Arc::new(InMemoryRunQueue::new()),
        )
    }

    /// Resources for the configured backend. `pgmq` puts the store and the
    /// queue on one PostgreSQL pool. The run lock gets a separate pool sized
    /// by `run_lock.max_connections`; lock holders never compete with the
    /// snapshot transaction for a connection.
    pub async fn connect(config: &EngineConfig) -> RunEngineResult<Self> {
        match config.queue.backend {
            QueueBackend::Memory => Ok(Self::in_memory()),
            QueueBackend::Pgmq => {
                let connection = DatabaseConnection::connect(&config.database)
                    .await
                    .map_err(StoreError::from)?;
                let lock_connection =
                    DatabaseConnection::connect(&config.run_lock.pool_config(&config.database))
                        .await
                        .map_err(StoreError::from)?;
                let pool = connection.pool().clone();
                info!(
                    store = "postgres",
                    queue = "pgmq",
                    lock_pool_size = config.run_lock.max_connections,
                    "Run engine resources connected"
                );

                Ok(Self::new(
                    Arc::new(PgStore::new(pool.clone())),
                    RunLocker::new(Arc::new(PgAdvisoryRunLock::new(
                        lock_connection.pool().clone(),
                        &config.run_lock,
                    ))),
                    Arc::new(PgmqRunQueue::new(pool)),
                ))
            }
        }
    }
}

/// Caller overrides for the recorded snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOverrides {
    /// Defaults to [`QueuedStatus::Queued`]
    pub status: Option<QueuedStatus>,
    /// Defaults to the configured description, `"Run was QUEUED"`
    pub description: Option<String>,
}

/// Options of one `enqueue_run` call.
#[derive(Default)]
pub struct EnqueueRunOptions<'a> {
    /// Caller transaction to write the snapshot into
    pub tx: Option<&'a mut dyn StoreTransaction>,
    pub snapshot: SnapshotOverrides,
    pub batch_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub completed_waitpoints: Vec<CompletedWaitpoint>,
    /// Set when the re-enqueue originates from a worker
    pub worker_id: Option<String>,
    pub runner_id: Option<String>,
}

impl std::fmt::Debug for EnqueueRunOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueueRunOptions")
            .field("tx", &self.tx.is_some())
            .field("snapshot", &self.snapshot)
            .field("batch_id", &self.batch_id)
            .field("checkpoint_id", &self.checkpoint_id)
            .field("completed_waitpoints", &self.completed_waitpoints)
            .field("worker_id", &self.worker_id)
            .field("runner_id", &self.runner_id)
            .finish()
    }
}

impl<'a> EnqueueRunOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction(mut self, tx: &'a mut dyn StoreTransaction) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn with_status(mut self, status: QueuedStatus) -> Self {
        self.snapshot.status = Some(status);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.snapshot.description = Some(description.into());
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_completed_waitpoints(mut self, waitpoints: Vec<CompletedWaitpoint>) -> Self {
        self.completed_waitpoints = waitpoints;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_runner_id(mut self, runner_id: impl Into<String>) -> Self {
        self.runner_id = Some(runner_id.into());
        self
    }
}

/// Everything the critical section needs, owned so it can move to a task.
struct Transition {
    run: TaskRun,
    env: AuthenticatedEnvironment,
    timestamp: DateTime<Utc>,
    snapshot: CreateExecutionSnapshot,
}

#[derive(Clone)]
pub struct EnqueueSystem {
    store: Arc<dyn TransactionalStore>,
    snapshots: ExecutionSnapshotSystem,
    run_lock: RunLocker,
    run_queue: Arc<dyn RunQueue>,
    config: EnqueueConfig,
    lock_timeout: Duration,
}

impl std::fmt::Debug for EnqueueSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueueSystem")
            .field("store", &self.store.store_type())
            .field("run_lock", &self.run_lock)
            .field("run_queue", &self.run_queue.queue_type())
            .field("config", &self.config)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl EnqueueSystem {
    pub fn new(resources: SystemResources, config: &EngineConfig) -> Self {
        Self {
            snapshots: ExecutionSnapshotSystem::new(Arc::clone(&resources.store)),
            store: resources.store,
            run_lock: resources.run_lock,
            run_queue: resources.run_queue,
            config: config.enqueue.clone(),
            lock_timeout: config.run_lock.timeout(),
        }
    }

    /// Override the run lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn snapshot_system(&self) -> &ExecutionSnapshotSystem {
        &self.snapshots
    }

    pub fn run_lock(&self) -> &RunLocker {
        &self.run_lock
    }

    /// Record a queued snapshot for `run` and publish it to every master
    /// queue of the run, primary first. Returns the recorded snapshot.
    #[instrument(skip_all, fields(run_id = %run.id, environment_id = %env.id))]
    pub async fn enqueue_run(
        &self,
        run: &TaskRun,
        env: &AuthenticatedEnvironment,
        timestamp: DateTime<Utc>,
        options: EnqueueRunOptions<'_>,
    ) -> EnqueueResult<ExecutionSnapshot> {
        validate_enqueue_request(run, env, &options).map_err(|e| {
            warn!(error = %e, "Enqueue request rejected");
            e
        })?;

        let EnqueueRunOptions {
            tx,
            snapshot,
            batch_id,
            checkpoint_id,
            completed_waitpoints,
            worker_id,
            runner_id,
        } = options;

        let transition = Transition {
            run: run.clone(),
            env: env.clone(),
            timestamp,
            snapshot: CreateExecutionSnapshot {
                run_id: run.id.clone(),
                execution_status: snapshot.status.unwrap_or_default().into(),
                description: snapshot
                    .description
                    .unwrap_or_else(|| self.config.default_description.clone()),
                batch_id,
                environment_id: env.id.clone(),
                environment_type: env.environment_type,
                checkpoint_id,
                completed_waitpoints,
                worker_id,
                runner_id,
            },
        };

        let guard = self.acquire_run_lock(&run.id).await?;

        let result = match tx {
            Some(tx) => {
                let result = self.critical_section(Some(tx), &transition).await;
                guard.release().await;
                result
            }
            None => self.spawn_critical_section(guard, transition).await,
        };

        match &result {
            Ok(snapshot) => log_run_operation(
                "enqueue_run",
                &run.id,
                snapshot.execution_status.as_str(),
                Some(&snapshot.id),
            ),
            Err(e) => warn!(kind = e.kind(), error = %e, "Enqueue failed"),
        }
        result
    }

    /// Publish the dispatch message again for a run whose latest snapshot is
    /// queued. Writes no snapshot. Used to repair a
    /// [`EnqueueError::DispatchPublish`].
    #[instrument(skip_all, fields(run_id = %run.id, environment_id = %env.id))]
    pub async fn republish_run(
        &self,
        run: &TaskRun,
        env: &AuthenticatedEnvironment,
        timestamp: DateTime<Utc>,
    ) -> EnqueueResult<ExecutionSnapshot> {
        validate_run_routing(run, env)?;

        let keys = [run.id.clone()];
        self.run_lock
            .lock(&keys, self.lock_timeout, || async {
                let latest = self
                    .snapshots
                    .get_latest_execution_snapshot(None, &run.id)
                    .await
                    .map_err(|e| {
                        EnqueueError::snapshot_persistence(
                            &run.id,
                            format!("failed to read latest snapshot: {e}"),
                        )
                    })?
                    .ok_or_else(|| {
                        EnqueueError::validation(format!(
                            "run {} has no execution snapshot to republish",
                            run.id
                        ))
                    })?;

                if !latest.execution_status.is_queued() {
                    return Err(EnqueueError::validation(format!(
                        "run {} is {}, only queued runs can be republished",
                        run.id, latest.execution_status
                    )));
                }

                self.publish(run, env, timestamp, &latest).await?;
                log_run_operation("republish_run", &run.id, "republished", Some(&latest.id));
                Ok(latest)
            })
            .await
    }

    async fn acquire_run_lock(&self, run_id: &str) -> EnqueueResult<RunLockGuard> {
        let keys = [run_id.to_string()];
        self.run_lock
            .acquire(&keys, self.lock_timeout)
            .await
            .map_err(|e| {
                let err = EnqueueError::from(e);
                warn!(kind = err.kind(), error = %err, "Run lock not acquired");
                err
            })
    }

    /// Run the owned-transaction critical section on its own task. The lock
    /// guard moves with it and is released there.
    async fn spawn_critical_section(
        &self,
        guard: RunLockGuard,
        transition: Transition,
    ) -> EnqueueResult<ExecutionSnapshot> {
        let run_id = transition.run.id.clone();
        let system = self.clone();

        let handle = tokio::spawn(
            async move {
                let result = system.critical_section(None, &transition).await;
                guard.release().await;
                result
            }
            .instrument(Span::current()),
        );

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                error!(error = %e, "Enqueue critical section was cancelled");
                Err(EnqueueError::Interrupted {
                    run_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn critical_section(
        &self,
        tx: Option<&mut dyn StoreTransaction>,
        transition: &Transition,
    ) -> EnqueueResult<ExecutionSnapshot> {
        let run_id = &transition.run.id;
        let write_timeout = self.config.snapshot_write_timeout();

        let snapshot = match tokio::time::timeout(write_timeout, self.persist_snapshot(tx, transition))
            .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return Err(EnqueueError::snapshot_persistence(run_id, e.to_string())),
            Err(_) => {
                return Err(EnqueueError::snapshot_persistence(
                    run_id,
                    format!(
                        "snapshot write did not finish within {}ms",
                        self.config.snapshot_write_timeout_ms
                    ),
                ))
            }
        };

        self.publish(&transition.run, &transition.env, transition.timestamp, &snapshot)
            .await?;
        Ok(snapshot)
    }

    /// Write the snapshot. An owned transaction is committed here; dropping
    /// this future (timeout) rolls it back.
    async fn persist_snapshot(
        &self,
        tx: Option<&mut dyn StoreTransaction>,
        transition: &Transition,
    ) -> StoreResult<ExecutionSnapshot> {
        let mut scoped = ScopedTransaction::resolve(self.store.as_ref(), tx).await?;
        let written = self
            .snapshots
            .create_execution_snapshot(scoped.transaction(), transition.snapshot.clone())
            .await;
        let owned = scoped.is_owned();
        let snapshot = scoped.finish(written).await?;

        debug!(
            snapshot_id = %snapshot.id,
            sequence = snapshot.sequence,
            committed = owned,
            "Execution snapshot persisted"
        );
        Ok(snapshot)
    }

    async fn publish(
        &self,
        run: &TaskRun,
        env: &AuthenticatedEnvironment,
        timestamp: DateTime<Utc>,
        snapshot: &ExecutionSnapshot,
    ) -> EnqueueResult<()> {
        let master_queues = run.master_queues();
        let message = QueueMessage::for_run(run, env, timestamp);

        let outcome = tokio::time::timeout(
            self.config.publish_timeout(),
            self.run_queue.enqueue_message(env, &master_queues, &message),
        )
        .await;

        let reason = match outcome {
            Ok(Ok(())) => {
                debug!(master_queues = ?master_queues, "Dispatch message published");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "publish did not finish within {}ms",
                self.config.publish_timeout_ms
            ),
        };

        error!(
            snapshot_id = %snapshot.id,
            master_queues = ?master_queues,
            reason = %reason,
            "Snapshot committed but dispatch publish failed; run needs republish"
        );
        Err(EnqueueError::dispatch_publish(
            &run.id,
            &snapshot.id,
            master_queues,
            reason,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ExecutionStatus;
    use crate::models::RuntimeEnvironmentType;

    struct Harness {
        store: InMemoryStore,
        queue: InMemoryRunQueue,
        system: EnqueueSystem,
    }

    fn harness() -> Harness {
        let store = InMemoryStore::new();
        let queue = InMemoryRunQueue::new();
        let resources = SystemResources::new(
            Arc::new(store.clone()),
            RunLocker::in_memory(),
            Arc::new(queue.clone()),
        );
        Harness {
            store,
            queue,
            system: EnqueueSystem::new(resources, &EngineConfig::default()),
        }
    }

    fn env() -> AuthenticatedEnvironment {
        AuthenticatedEnvironment::new("env_1", RuntimeEnvironmentType::Production, "org_1", "proj_1")
    }

    fn run() -> TaskRun {
        TaskRun::new("run_1", "env_1", "org_1", "proj_1", "send-email", "default", "mq-1")
    }

    #[tokio::test]
    async fn test_enqueue_defaults_to_queued() {
        let h = harness();
        let snapshot = h
            .system
            .enqueue_run(&run(), &env(), Utc::now(), EnqueueRunOptions::new())
            .await
            .unwrap();

        assert_eq!(snapshot.execution_status, ExecutionStatus::Queued);
        assert_eq!(snapshot.description, "Run was QUEUED");
        assert_eq!(h.store.snapshots_for("run_1"), vec![snapshot]);
        assert_eq!(h.queue.depth("mq-1"), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_touches_nothing() {
        let h = harness();
        let mut bad = run();
        bad.master_queue = String::new();

        let err = h
            .system
            .enqueue_run(&bad, &env(), Utc::now(), EnqueueRunOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Validation(_)));
        assert_eq!(h.store.snapshot_count(), 0);
        assert_eq!(h.store.committed_transactions(), 0);
        assert_eq!(h.queue.total_published(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_snapshot_persistence() {
        let h = harness();
        h.store.fail_commits(true);

        let err = h
            .system
            .enqueue_run(&run(), &env(), Utc::now(), EnqueueRunOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::SnapshotPersistence { .. }));
        assert!(err.is_retryable());
        assert_eq!(h.queue.total_published(), 0);
    }

    #[tokio::test]
    async fn test_slow_snapshot_write_times_out_and_rolls_back() {
        let h = harness();
        let mut config = EngineConfig::default();
        config.enqueue.snapshot_write_timeout_ms = 20;
        let system = EnqueueSystem::new(
            SystemResources::new(
                Arc::new(h.store.clone()),
                RunLocker::in_memory(),
                Arc::new(h.queue.clone()),
            ),
            &config,
        );
        h.store.set_write_delay(Duration::from_millis(200));

        let err = system
            .enqueue_run(&run(), &env(), Utc::now(), EnqueueRunOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::SnapshotPersistence { .. }));
        assert_eq!(h.store.snapshot_count(), 0);
        assert_eq!(h.queue.total_published(), 0);
    }

    #[tokio::test]
    async fn test_publish_timeout_is_dispatch_publish() {
        let h = harness();
        let mut config = EngineConfig::default();
        config.enqueue.publish_timeout_ms = 20;
        let system = EnqueueSystem::new(
            SystemResources::new(
                Arc::new(h.store.clone()),
                RunLocker::in_memory(),
                Arc::new(h.queue.clone()),
            ),
            &config,
        );
        h.queue.set_publish_delay(Duration::from_millis(200));

        let err = system
            .enqueue_run(&run(), &env(), Utc::now(), EnqueueRunOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::DispatchPublish { .. }));
        assert!(err.requires_reconciliation());
        assert_eq!(h.store.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_republish_requires_a_queued_snapshot() {
        let h = harness();
        let err = h
            .system
            .republish_run(&run(), &env(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Validation(_)));
        assert_eq!(h.queue.total_published(), 0);
    }

    #[test]
    fn test_options_builder() {
        let options = EnqueueRunOptions::new()
            .with_status(QueuedStatus::QueuedExecuting)
            .with_description("Resumed from checkpoint")
            .with_checkpoint_id("checkpoint_1")
            .with_worker_id("worker_1")
            .with_runner_id("runner_1");

        assert!(options.tx.is_none());
        assert_eq!(options.snapshot.status, Some(QueuedStatus::QueuedExecuting));
        assert_eq!(options.worker_id.as_deref(), Some("worker_1"));
        assert!(format!("{options:?}").contains("checkpoint_1"));
    }
}
