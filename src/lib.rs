#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Run Engine
//!
//! Execution core of a multi-tenant task-run orchestrator.
//!
//! ## Overview
//!
//! A run becomes eligible for execution through one operation,
//! [`EnqueueSystem::enqueue_run`]. It serialises on a per-run lock, appends a
//! queued execution snapshot to the run's history, and publishes a dispatch
//! message to each of the run's master queues. Workers poll those queues.
//!
//! ## Guarantees
//!
//! - Two enqueues of the same run never overlap; each produces its own snapshot
//! - A message is never visible on a queue before its snapshot is committed
//! - A committed snapshot whose publish failed is reported, never silent
//!
//! ## Module Organization
//!
//! - [`models`] - runs, environments and execution snapshots
//! - [`database`] - transactional store capability with in-memory and PostgreSQL adapters
//! - [`locking`] - per-run lock capability with in-memory and advisory-lock adapters
//! - [`messaging`] - dispatch message and run queue capability (in-memory, pgmq)
//! - [`orchestration`] - enqueue system, execution snapshot system, pause service
//! - [`gateway`] - registry of live worker sessions
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup
//! - [`error`] - error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use run_engine::config::ConfigManager;
//! use run_engine::models::{AuthenticatedEnvironment, RuntimeEnvironmentType, TaskRun};
//! use run_engine::{EnqueueRunOptions, EnqueueSystem, SystemResources};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! run_engine::logging::init_structured_logging(&manager.config().logging);
//!
//! let resources = SystemResources::connect(manager.config()).await?;
//! let system = EnqueueSystem::new(resources, manager.config());
//!
//! let env = AuthenticatedEnvironment::new("env_1", RuntimeEnvironmentType::Production, "org_1", "proj_1");
//! let run = TaskRun::new("run_1", "env_1", "org_1", "proj_1", "send-email", "default", "mq-1");
//! system
//!     .enqueue_run(&run, &env, chrono::Utc::now(), EnqueueRunOptions::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib                 # Unit tests
//! cargo test                       # Unit and integration tests
//! cargo test -- --ignored          # PostgreSQL tests (needs DATABASE_URL)
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod gateway;
pub mod locking;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod validation;

pub use config::{ConfigManager, EngineConfig};
pub use constants::{ExecutionStatus, QueuedStatus};
pub use error::{EnqueueError, EnqueueResult, RunEngineError, RunEngineResult};
pub use models::{AuthenticatedEnvironment, ExecutionSnapshot, TaskRun};
pub use orchestration::{
    EnqueueRunOptions, EnqueueSystem, ExecutionSnapshotSystem, PauseService, SystemResources,
};
