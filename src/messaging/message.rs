//! Dispatch message handed to the run queue.
//!
//! The payload repeats the routing fields of the run so a consumer can make
//! dispatch decisions without reading the run back.

use crate::constants::INITIAL_ATTEMPT;
use crate::models::{AuthenticatedEnvironment, RuntimeEnvironmentType, TaskRun};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub run_id: String,
    pub task_identifier: String,
    pub org_id: String,
    pub project_id: String,
    pub environment_id: String,
    pub environment_type: RuntimeEnvironmentType,
    pub queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_key: Option<String>,
    /// Milliseconds since the epoch on the wire
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
}

impl QueueMessage {
    /// Message for a first enqueue of `run`. The attempt is always
    /// [`INITIAL_ATTEMPT`]; retries carry their state upstream.
    pub fn for_run(run: &TaskRun, env: &AuthenticatedEnvironment, timestamp: DateTime<Utc>) -> Self {
        Self {
            run_id: run.id.clone(),
            task_identifier: run.task_identifier.clone(),
            org_id: env.organization_id.clone(),
            project_id: env.project_id.clone(),
            environment_id: env.id.clone(),
            environment_type: env.environment_type,
            queue: run.queue.clone(),
            concurrency_key: run.concurrency_key.clone(),
            timestamp,
            attempt: INITIAL_ATTEMPT,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
