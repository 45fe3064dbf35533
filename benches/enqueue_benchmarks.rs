use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use run_engine::config::EngineConfig;
use run_engine::messaging::QueueMessage;
use run_engine::models::{AuthenticatedEnvironment, RuntimeEnvironmentType, TaskRun};
use run_engine::{EnqueueRunOptions, EnqueueSystem, SystemResources};

fn env() -> AuthenticatedEnvironment {
    AuthenticatedEnvironment::new("env_1", RuntimeEnvironmentType::Production, "org_1", "proj_1")
}

fn run(id: &str) -> TaskRun {
    TaskRun::new(id, "env_1", "org_1", "proj_1", "send-email", "default", "mq-1")
        .with_secondary_master_queue("mq-2")
}

fn benchmark_enqueue_same_run(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let system = EnqueueSystem::new(SystemResources::in_memory(), &EngineConfig::default());
    let env = env();
    let run = run("run_bench");

    c.bench_function("enqueue_run_same_run", |b| {
        b.iter(|| {
            runtime
                .block_on(system.enqueue_run(&run, &env, Utc::now(), EnqueueRunOptions::new()))
                .unwrap()
        })
    });
}

fn benchmark_enqueue_distinct_runs(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let system = EnqueueSystem::new(SystemResources::in_memory(), &EngineConfig::default());
    let env = env();
    let mut counter = 0u64;

    c.bench_function("enqueue_run_distinct_runs", |b| {
        b.iter(|| {
            counter += 1;
            let run = run(&format!("run_{counter}"));
            runtime
                .block_on(system.enqueue_run(&run, &env, Utc::now(), EnqueueRunOptions::new()))
                .unwrap()
        })
    });
}

fn benchmark_message_serialization(c: &mut Criterion) {
    let message = QueueMessage::for_run(&run("run_bench"), &env(), Utc::now());

    c.bench_function("queue_message_to_json", |b| {
        b.iter(|| black_box(&message).to_json().unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_enqueue_same_run,
    benchmark_enqueue_distinct_runs,
    benchmark_message_serialization
);
criterion_main!(benches);
