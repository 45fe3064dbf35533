//! # In-Memory Run Queue
//!
//! FIFO queue per master queue, kept in process. Used by tests, benchmarks
//! and single-process embedders. Supports injected publish failures and an
//! artificial publish delay.

use super::{MessagingError, MessagingResult, QueueMessage, RunQueue};
use crate::models::AuthenticatedEnvironment;
use crate::orchestration::pause_service::PauseService;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    queues: Mutex<HashMap<String, VecDeque<QueueMessage>>>,
    published: AtomicUsize,
    failures_remaining: AtomicUsize,
    publish_delay_ms: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRunQueue {
    inner: Arc<Inner>,
}

impl InMemoryRunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls to `enqueue_message`.
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Sleep this long before every publish.
    pub fn set_publish_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.publish_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Messages waiting on `master_queue`, oldest first.
    pub fn messages(&self, master_queue: &str) -> Vec<QueueMessage> {
        self.inner
            .queues
            .lock()
            .get(master_queue)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn depth(&self, master_queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(master_queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Messages published across every master queue since creation.
    pub fn total_published(&self) -> usize {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Pop the oldest message whose environment and queue are not paused.
    /// Paused messages stay where they are.
    pub fn dequeue(&self, master_queue: &str, pauses: &PauseService) -> Option<QueueMessage> {
        let mut queues = self.inner.queues.lock();
        let queue = queues.get_mut(master_queue)?;
        let position = queue
            .iter()
            .position(|message| pauses.is_dequeue_allowed(message))?;
        queue.remove(position)
    }
}

#[async_trait]
impl RunQueue for InMemoryRunQueue {
    async fn enqueue_message(
        &self,
        env: &AuthenticatedEnvironment,
        master_queues: &[String],
        message: &QueueMessage,
    ) -> MessagingResult<()> {
        if master_queues.is_empty() {
            return Err(MessagingError::no_master_queues(&message.run_id));
        }

        let delay_ms = self.inner.publish_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let injected = self
            .inner
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(MessagingError::Injected {
                run_id: message.run_id.clone(),
            });
        }

        let mut queues = self.inner.queues.lock();
        for master_queue in master_queues {
            queues
                .entry(master_queue.clone())
                .or_default()
                .push_back(message.clone());
            self.inner.published.fetch_add(1, Ordering::SeqCst);
        }

        debug!(
            run_id = %message.run_id,
            environment_id = %env.id,
            master_queues = ?master_queues,
            "Message published to in-memory run queue"
        );
        Ok(())
    }

    fn queue_type(&self) -> &'static str {
        "in_memory"
    }
}
