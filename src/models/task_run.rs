//! # Task Run Model
//!
//! A unit of schedulable work. The run-creation path owns this record; the
//! enqueue path only reads its identity and routing fields.
//!
//! ## Database Schema
//!
//! Maps to the `task_runs` table:
//! ```sql
//! CREATE TABLE task_runs (
//!   id TEXT PRIMARY KEY,
//!   runtime_environment_id TEXT NOT NULL,
//!   organization_id TEXT NOT NULL,
//!   project_id TEXT NOT NULL,
//!   task_identifier TEXT NOT NULL,
//!   queue TEXT NOT NULL,
//!   master_queue TEXT NOT NULL,
//!   secondary_master_queue TEXT,
//!   concurrency_key TEXT,
//!   attempt_number INTEGER NOT NULL DEFAULT 0,
//!   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TaskRun {
    pub id: String,
    pub runtime_environment_id: String,
    pub organization_id: String,
    pub project_id: String,
    /// Name of the task handler
    pub task_identifier: String,
    /// Logical work queue chosen by the run's author
    pub queue: String,
    /// Physical routing key workers poll
    pub master_queue: String,
    /// Alternate routing target, published to after the primary
    pub secondary_master_queue: Option<String>,
    pub concurrency_key: Option<String>,
    pub attempt_number: i32,
    pub created_at: DateTime<Utc>,
}

impl TaskRun {
    /// Minimal run with a single master queue and no concurrency key.
    pub fn new(
        id: impl Into<String>,
        runtime_environment_id: impl Into<String>,
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        task_identifier: impl Into<String>,
        queue: impl Into<String>,
        master_queue: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            runtime_environment_id: runtime_environment_id.into(),
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            task_identifier: task_identifier.into(),
            queue: queue.into(),
            master_queue: master_queue.into(),
            secondary_master_queue: None,
            concurrency_key: None,
            attempt_number: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_secondary_master_queue(mut self, master_queue: impl Into<String>) -> Self {
        self.secondary_master_queue = Some(master_queue.into());
        self
    }

    pub fn with_concurrency_key(mut self, concurrency_key: impl Into<String>) -> Self {
        self.concurrency_key = Some(concurrency_key.into());
        self
    }

    /// Fan-out targets for one dispatch, primary first.
    pub fn master_queues(&self) -> Vec<String> {
        let mut master_queues = vec![self.master_queue.clone()];
        if let Some(secondary) = &self.secondary_master_queue {
            master_queues.push(secondary.clone());
        }
        master_queues
    }
}
