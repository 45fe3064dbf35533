//! # Orchestration
//!
//! The enqueue/state-transition core.
//!
//! ## Core Components
//!
//! - **EnqueueSystem**: locks a run, records a queued execution snapshot and
//!   publishes the dispatch message to the run's master queues
//! - **ExecutionSnapshotSystem**: single writer and reader of run-state history
//! - **PauseService**: paused environments and queues, consulted on dequeue only

pub mod enqueue_system;
pub mod execution_snapshot_system;
pub mod pause_service;

pub use enqueue_system::{EnqueueRunOptions, EnqueueSystem, SnapshotOverrides, SystemResources};
pub use execution_snapshot_system::{CreateExecutionSnapshot, ExecutionSnapshotSystem};
pub use pause_service::{PauseOutcome, PauseService};
