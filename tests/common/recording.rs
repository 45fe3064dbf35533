//! Instrumented store and queue wrappers.
//!
//! `RecordingStore` counts, per run, how many transactions hold an
//! uncommitted snapshot write at once. `ObservingRunQueue` records how many
//! committed snapshots each run had at the moment its message was published.

use async_trait::async_trait;
use parking_lot::Mutex;
use run_engine::database::{InMemoryStore, StoreError, StoreResult, StoreTransaction, TransactionalStore};
use run_engine::messaging::{InMemoryRunQueue, MessagingResult, QueueMessage, RunQueue};
use run_engine::models::{AuthenticatedEnvironment, ExecutionSnapshot, NewExecutionSnapshot, TaskRun};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Recording {
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
    writes: AtomicUsize,
}

impl Recording {
    fn enter(&self, run_id: &str) {
        let mut in_flight = self.in_flight.lock();
        let count = in_flight.entry(run_id.to_string()).or_insert(0);
        *count += 1;
        self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
    }

    fn exit(&self, run_id: &str) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(run_id) {
            *count = count.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordingStore {
    inner: InMemoryStore,
    recording: Arc<Recording>,
}

impl RecordingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            recording: Arc::new(Recording::default()),
        }
    }

    /// Highest number of concurrent uncommitted snapshot writes for any one run.
    pub fn max_concurrent_writes_per_run(&self) -> usize {
        self.recording.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot_writes(&self) -> usize {
        self.recording.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionalStore for RecordingStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(RecordingTransaction {
            inner: Some(self.inner.begin().await?),
            recording: Arc::clone(&self.recording),
            touched: Vec::new(),
        }))
    }

    fn store_type(&self) -> &'static str {
        "recording"
    }
}

struct RecordingTransaction {
    inner: Option<Box<dyn StoreTransaction>>,
    recording: Arc<Recording>,
    touched: Vec<String>,
}

impl RecordingTransaction {
    fn inner(&mut self) -> StoreResult<&mut Box<dyn StoreTransaction>> {
        self.inner
            .as_mut()
            .ok_or_else(|| StoreError::injected("transaction already finished"))
    }
}

impl Drop for RecordingTransaction {
    fn drop(&mut self) {
        for run_id in &self.touched {
            self.recording.exit(run_id);
        }
    }
}

#[async_trait]
impl StoreTransaction for RecordingTransaction {
    async fn insert_task_run(&mut self, run: &TaskRun) -> StoreResult<()> {
        self.inner()?.insert_task_run(run).await
    }

    async fn find_task_run(&mut self, run_id: &str) -> StoreResult<Option<TaskRun>> {
        self.inner()?.find_task_run(run_id).await
    }

    async fn insert_execution_snapshot(
        &mut self,
        snapshot: NewExecutionSnapshot,
    ) -> StoreResult<ExecutionSnapshot> {
        let run_id = snapshot.run_id.clone();
        self.recording.enter(&run_id);
        self.touched.push(run_id);
        self.recording.writes.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which an overlapping writer would be observed
        tokio::task::yield_now().await;
        self.inner()?.insert_execution_snapshot(snapshot).await
    }

    async fn latest_execution_snapshot(
        &mut self,
        run_id: &str,
    ) -> StoreResult<Option<ExecutionSnapshot>> {
        self.inner()?.latest_execution_snapshot(run_id).await
    }

    async fn execution_snapshots(&mut self, run_id: &str) -> StoreResult<Vec<ExecutionSnapshot>> {
        self.inner()?.execution_snapshots(run_id).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        match this.inner.take() {
            Some(inner) => inner.commit().await,
            None => Err(StoreError::injected("transaction already finished")),
        }
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        match this.inner.take() {
            Some(inner) => inner.rollback().await,
            None => Ok(()),
        }
    }
}

/// Publish observation: run id and committed snapshot count at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishObservation {
    pub run_id: String,
    pub master_queues: Vec<String>,
    pub committed_snapshots: usize,
}

#[derive(Debug, Clone)]
pub struct ObservingRunQueue {
    inner: InMemoryRunQueue,
    store: InMemoryStore,
    observations: Arc<Mutex<Vec<PublishObservation>>>,
}

impl ObservingRunQueue {
    pub fn new(inner: InMemoryRunQueue, store: InMemoryStore) -> Self {
        Self {
            inner,
            store,
            observations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn observations(&self) -> Vec<PublishObservation> {
        self.observations.lock().clone()
    }
}

#[async_trait]
impl RunQueue for ObservingRunQueue {
    async fn enqueue_message(
        &self,
        env: &AuthenticatedEnvironment,
        master_queues: &[String],
        message: &QueueMessage,
    ) -> MessagingResult<()> {
        self.observations.lock().push(PublishObservation {
            run_id: message.run_id.clone(),
            master_queues: master_queues.to_vec(),
            committed_snapshots: self.store.snapshots_for(&message.run_id).len(),
        });
        self.inner.enqueue_message(env, master_queues, message).await
    }

    fn queue_type(&self) -> &'static str {
        "observing"
    }
}
