use proptest::prelude::*;
use proptest::strategy::Just;
use run_engine::constants::{ExecutionStatus, QueuedStatus};
use run_engine::models::RuntimeEnvironmentType;

/// Strategy for generating identifier-shaped strings
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,31}"
}

/// Strategy for generating master queue names
pub fn master_queue_strategy() -> impl Strategy<Value = String> {
    "mq-[a-z0-9]{1,12}"
}

/// Strategy for generating an optional secondary master queue
pub fn secondary_master_queue_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(master_queue_strategy())
}

pub fn environment_type_strategy() -> impl Strategy<Value = RuntimeEnvironmentType> {
    prop_oneof![
        Just(RuntimeEnvironmentType::Production),
        Just(RuntimeEnvironmentType::Staging),
        Just(RuntimeEnvironmentType::Development),
        Just(RuntimeEnvironmentType::Preview),
    ]
}

pub fn queued_status_strategy() -> impl Strategy<Value = QueuedStatus> {
    prop_oneof![Just(QueuedStatus::Queued), Just(QueuedStatus::QueuedExecuting)]
}

/// Strategy for any execution status a run may hold before a re-enqueue
pub fn prior_status_strategy() -> impl Strategy<Value = ExecutionStatus> {
    prop::sample::select(ExecutionStatus::ALL.to_vec())
}

/// Strategy for a millisecond-precision timestamp, as it travels on the wire
pub fn timestamp_millis_strategy() -> impl Strategy<Value = i64> {
    1_600_000_000_000i64..1_900_000_000_000i64
}
