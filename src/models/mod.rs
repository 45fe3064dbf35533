//! # Models
//!
//! Records the run engine reads and writes:
//!
//! - [`TaskRun`] - routing and identity fields of a schedulable run (read-only here)
//! - [`AuthenticatedEnvironment`] - the tenant environment a run belongs to
//! - [`ExecutionSnapshot`] - one immutable entry in a run's execution log

pub mod environment;
pub mod execution_snapshot;
pub mod task_run;

pub use environment::{AuthenticatedEnvironment, RuntimeEnvironmentType};
pub use execution_snapshot::{CompletedWaitpoint, ExecutionSnapshot, NewExecutionSnapshot};
pub use task_run::TaskRun;
