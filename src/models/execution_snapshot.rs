//! # Execution Snapshot Model
//!
//! Append-only execution log for runs. Each snapshot is an immutable fact
//! recording the run's execution status at one point in time; the current
//! status of a run is the status of its latest snapshot.
//!
//! ## Ordering
//!
//! Snapshots of one run are totally ordered by `(created_at, sequence)`.
//! `sequence` is assigned by the store and only ever increases, so two
//! snapshots created within the same clock tick still have a defined order.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE task_run_execution_snapshots (
//!   id TEXT PRIMARY KEY,
//!   sequence BIGSERIAL NOT NULL UNIQUE,
//!   run_id TEXT NOT NULL,
//!   execution_status TEXT NOT NULL,
//!   description TEXT NOT NULL,
//!   -- optional links and denormalised environment fields
//!   created_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use crate::constants::ExecutionStatus;
use crate::models::RuntimeEnvironmentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A waitpoint considered completed by the transition that recorded it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletedWaitpoint {
    pub id: String,
    /// Position of the waitpoint within a batch, when it belongs to one
    pub index: Option<i32>,
}

impl CompletedWaitpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index: None,
        }
    }

    pub fn with_index(id: impl Into<String>, index: i32) -> Self {
        Self {
            id: id.into(),
            index: Some(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub id: String,
    pub sequence: i64,
    pub run_id: String,
    pub execution_status: ExecutionStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub batch_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub completed_waitpoints: Vec<CompletedWaitpoint>,
    pub worker_id: Option<String>,
    pub runner_id: Option<String>,
    pub environment_id: String,
    pub environment_type: RuntimeEnvironmentType,
}

impl ExecutionSnapshot {
    /// Materialise a stored snapshot from its insert payload.
    pub fn from_new(new: NewExecutionSnapshot, sequence: i64) -> Self {
        Self {
            id: new.id,
            sequence,
            run_id: new.run_id,
            execution_status: new.execution_status,
            description: new.description,
            created_at: new.created_at,
            batch_id: new.batch_id,
            checkpoint_id: new.checkpoint_id,
            completed_waitpoints: new.completed_waitpoints,
            worker_id: new.worker_id,
            runner_id: new.runner_id,
            environment_id: new.environment_id,
            environment_type: new.environment_type,
        }
    }

    /// Total-order key within one run's history.
    pub fn ordering_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.sequence)
    }

    pub fn is_newer_than(&self, other: &ExecutionSnapshot) -> bool {
        self.ordering_key() > other.ordering_key()
    }
}

/// Insert payload for a new snapshot. The store assigns `sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExecutionSnapshot {
    pub id: String,
    pub run_id: String,
    pub execution_status: ExecutionStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub batch_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub completed_waitpoints: Vec<CompletedWaitpoint>,
    pub worker_id: Option<String>,
    pub runner_id: Option<String>,
    pub environment_id: String,
    pub environment_type: RuntimeEnvironmentType,
}

/// Generate a fresh snapshot identifier.
pub fn generate_snapshot_id() -> String {
    format!("snapshot_{}", Uuid::new_v4().simple())
}
