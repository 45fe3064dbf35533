//! Builders for runs, environments and a fully wired in-memory engine.

use super::recording::{ObservingRunQueue, RecordingStore};
use super::unique_id;
use run_engine::config::EngineConfig;
use run_engine::database::InMemoryStore;
use run_engine::locking::RunLocker;
use run_engine::messaging::InMemoryRunQueue;
use run_engine::models::{AuthenticatedEnvironment, RuntimeEnvironmentType, TaskRun};
use run_engine::orchestration::{EnqueueSystem, SystemResources};
use std::sync::Arc;
use std::time::Duration;

/// Builder pattern for test environments
pub struct EnvironmentBuilder {
    id: String,
    environment_type: RuntimeEnvironmentType,
    organization_id: String,
    project_id: String,
}

impl EnvironmentBuilder {
    pub fn new() -> Self {
        Self {
            id: "env_1".to_string(),
            environment_type: RuntimeEnvironmentType::Production,
            organization_id: "org_1".to_string(),
            project_id: "proj_1".to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_type(mut self, environment_type: RuntimeEnvironmentType) -> Self {
        self.environment_type = environment_type;
        self
    }

    pub fn build(self) -> AuthenticatedEnvironment {
        AuthenticatedEnvironment::new(
            self.id,
            self.environment_type,
            self.organization_id,
            self.project_id,
        )
    }
}

/// Builder pattern for test runs. Identity fields follow the environment.
pub struct RunBuilder {
    id: Option<String>,
    task_identifier: String,
    queue: String,
    master_queue: String,
    secondary_master_queue: Option<String>,
    concurrency_key: Option<String>,
}

impl RunBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            task_identifier: "send-email".to_string(),
            queue: "default".to_string(),
            master_queue: "mq-1".to_string(),
            secondary_master_queue: None,
            concurrency_key: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_task_identifier(mut self, task_identifier: &str) -> Self {
        self.task_identifier = task_identifier.to_string();
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    pub fn with_master_queue(mut self, master_queue: &str) -> Self {
        self.master_queue = master_queue.to_string();
        self
    }

    pub fn with_secondary_master_queue(mut self, master_queue: &str) -> Self {
        self.secondary_master_queue = Some(master_queue.to_string());
        self
    }

    pub fn with_concurrency_key(mut self, concurrency_key: &str) -> Self {
        self.concurrency_key = Some(concurrency_key.to_string());
        self
    }

    pub fn build(self, env: &AuthenticatedEnvironment) -> TaskRun {
        let mut run = TaskRun::new(
            self.id.unwrap_or_else(|| unique_id("run")),
            env.id.clone(),
            env.organization_id.clone(),
            env.project_id.clone(),
            self.task_identifier,
            self.queue,
            self.master_queue,
        );
        run.secondary_master_queue = self.secondary_master_queue;
        run.concurrency_key = self.concurrency_key;
        run
    }
}

/// An enqueue system over in-memory adapters, with handles for inspection.
pub struct TestEngine {
    pub store: InMemoryStore,
    pub recording: RecordingStore,
    pub queue: InMemoryRunQueue,
    pub observing: ObservingRunQueue,
    pub locker: RunLocker,
    pub system: EnqueueSystem,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_lock_timeout(timeout: Duration) -> Self {
        let mut config = EngineConfig::default();
        config.run_lock.timeout_ms = u64::try_from(timeout.as_millis()).unwrap();
        Self::with_config(config)
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = InMemoryStore::new();
        let recording = RecordingStore::new(store.clone());
        let queue = InMemoryRunQueue::new();
        let observing = ObservingRunQueue::new(queue.clone(), store.clone());
        let locker = RunLocker::in_memory();

        let resources = SystemResources::new(
            Arc::new(recording.clone()),
            locker.clone(),
            Arc::new(observing.clone()),
        );
        let system = EnqueueSystem::new(resources, &config);

        Self {
            store,
            recording,
            queue,
            observing,
            locker,
            system,
        }
    }
}
