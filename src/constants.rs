//! # Execution Status Vocabulary
//!
//! The execution status enum shared by every part of the engine, plus the
//! narrower [`QueuedStatus`] that `enqueue_run` is allowed to produce.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Description recorded on a queued snapshot when the caller supplies none.
pub const DEFAULT_QUEUED_DESCRIPTION: &str = "Run was QUEUED";

/// Default bound on run lock acquisition, in milliseconds.
pub const DEFAULT_RUN_LOCK_TIMEOUT_MS: u64 = 5000;

/// Attempt number carried by a dispatch message produced by `enqueue_run`.
pub const INITIAL_ATTEMPT: u32 = 0;

/// Execution status recorded on an execution snapshot.
///
/// `enqueue_run` only ever writes [`ExecutionStatus::Queued`] or
/// [`ExecutionStatus::QueuedExecuting`]; every status is a valid prior state.
/// `Finished` covers completed, failed and canceled runs: the outcome itself
/// lives on the run, not in the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    RunCreated,
    Delayed,
    /// Eligible for dispatch, not yet claimed by a worker
    Queued,
    /// Re-queued while a prior execution context is still considered active
    QueuedExecuting,
    PendingExecuting,
    Executing,
    ExecutingWithWaitpoints,
    /// Suspended awaiting one or more waitpoints
    Suspended,
    PendingCancel,
    Finished,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 10] = [
        Self::RunCreated,
        Self::Delayed,
        Self::Queued,
        Self::QueuedExecuting,
        Self::PendingExecuting,
        Self::Executing,
        Self::ExecutingWithWaitpoints,
        Self::Suspended,
        Self::PendingCancel,
        Self::Finished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunCreated => "RUN_CREATED",
            Self::Delayed => "DELAYED",
            Self::Queued => "QUEUED",
            Self::QueuedExecuting => "QUEUED_EXECUTING",
            Self::PendingExecuting => "PENDING_EXECUTING",
            Self::Executing => "EXECUTING",
            Self::ExecutingWithWaitpoints => "EXECUTING_WITH_WAITPOINTS",
            Self::Suspended => "SUSPENDED",
            Self::PendingCancel => "PENDING_CANCEL",
            Self::Finished => "FINISHED",
        }
    }

    /// Check if the run is waiting on a master queue
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued | Self::QueuedExecuting)
    }

    /// Check if a worker currently holds the run
    pub fn is_executing(&self) -> bool {
        matches!(
            self,
            Self::PendingExecuting | Self::Executing | Self::ExecutingWithWaitpoints
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid execution status: {s}"))
    }
}

/// The queued family of statuses a caller may request from `enqueue_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueuedStatus {
    #[default]
    Queued,
    QueuedExecuting,
}

impl From<QueuedStatus> for ExecutionStatus {
    fn from(status: QueuedStatus) -> Self {
        match status {
            QueuedStatus::Queued => ExecutionStatus::Queued,
            QueuedStatus::QueuedExecuting => ExecutionStatus::QueuedExecuting,
        }
    }
}

impl TryFrom<ExecutionStatus> for QueuedStatus {
    type Error = String;

    fn try_from(status: ExecutionStatus) -> Result<Self, Self::Error> {
        match status {
            ExecutionStatus::Queued => Ok(Self::Queued),
            ExecutionStatus::QueuedExecuting => Ok(Self::QueuedExecuting),
            other => Err(format!("{other} is not a queued status")),
        }
    }
}
