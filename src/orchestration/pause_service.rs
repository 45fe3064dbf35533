//! # Pause Service
//!
//! Paused environments and paused `(environment, queue)` pairs.
//!
//! Enqueueing never consults this: a paused run is still recorded and
//! published. The dispatch side checks [`PauseService::is_dequeue_allowed`]
//! before handing a message to a worker.

use crate::messaging::QueueMessage;
use dashmap::DashSet;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused,
    Resumed,
    /// The target was already in the requested state
    Unchanged,
}

#[derive(Debug, Default)]
struct PauseState {
    environments: DashSet<String>,
    queues: DashSet<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct PauseService {
    state: Arc<PauseState>,
}

impl PauseService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause_environment(&self, environment_id: &str) -> PauseOutcome {
        if self.state.environments.insert(environment_id.to_string()) {
            info!(environment_id = %environment_id, "Environment paused");
            PauseOutcome::Paused
        } else {
            PauseOutcome::Unchanged
        }
    }

    pub fn resume_environment(&self, environment_id: &str) -> PauseOutcome {
        if self.state.environments.remove(environment_id).is_some() {
            info!(environment_id = %environment_id, "Environment resumed");
            PauseOutcome::Resumed
        } else {
            PauseOutcome::Unchanged
        }
    }

    pub fn pause_queue(&self, environment_id: &str, queue: &str) -> PauseOutcome {
        let key = (environment_id.to_string(), queue.to_string());
        if self.state.queues.insert(key) {
            info!(environment_id = %environment_id, queue = %queue, "Queue paused");
            PauseOutcome::Paused
        } else {
            PauseOutcome::Unchanged
        }
    }

    pub fn resume_queue(&self, environment_id: &str, queue: &str) -> PauseOutcome {
        let key = (environment_id.to_string(), queue.to_string());
        if self.state.queues.remove(&key).is_some() {
            info!(environment_id = %environment_id, queue = %queue, "Queue resumed");
            PauseOutcome::Resumed
        } else {
            PauseOutcome::Unchanged
        }
    }

    pub fn is_environment_paused(&self, environment_id: &str) -> bool {
        self.state.environments.contains(environment_id)
    }

    pub fn is_queue_paused(&self, environment_id: &str, queue: &str) -> bool {
        self.state
            .queues
            .contains(&(environment_id.to_string(), queue.to_string()))
    }

    pub fn is_dequeue_allowed(&self, message: &QueueMessage) -> bool {
        !self.is_environment_paused(&message.environment_id)
            && !self.is_queue_paused(&message.environment_id, &message.queue)
    }
}
