//! Input validation for the run engine
//!
//! Misuse checks that run before any lock is requested, so a rejected
//! request never leaves partial state behind.

use crate::error::{EnqueueError, EnqueueResult};
use crate::models::{AuthenticatedEnvironment, CompletedWaitpoint, TaskRun};
use crate::orchestration::enqueue_system::EnqueueRunOptions;

/// Maximum length of any identifier accepted by the engine
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Validate a full `enqueue_run` request.
pub fn validate_enqueue_request(
    run: &TaskRun,
    env: &AuthenticatedEnvironment,
    options: &EnqueueRunOptions<'_>,
) -> EnqueueResult<()> {
    validate_run_routing(run, env)?;

    validate_optional_identifier("batch_id", options.batch_id.as_deref())?;
    validate_optional_identifier("checkpoint_id", options.checkpoint_id.as_deref())?;
    validate_optional_identifier("worker_id", options.worker_id.as_deref())?;
    validate_optional_identifier("runner_id", options.runner_id.as_deref())?;
    validate_completed_waitpoints(&options.completed_waitpoints)?;

    Ok(())
}

/// Validate the identity and routing fields of `run` against `env`.
pub fn validate_run_routing(run: &TaskRun, env: &AuthenticatedEnvironment) -> EnqueueResult<()> {
    validate_identifier("run.id", &run.id)?;
    validate_identifier("run.task_identifier", &run.task_identifier)?;
    validate_identifier("run.queue", &run.queue)?;
    validate_identifier("run.master_queue", &run.master_queue)?;
    validate_optional_identifier(
        "run.secondary_master_queue",
        run.secondary_master_queue.as_deref(),
    )?;
    validate_identifier("environment.id", &env.id)?;

    if run.runtime_environment_id != env.id {
        return Err(EnqueueError::validation(format!(
            "run {} belongs to environment {}, not {}",
            run.id, run.runtime_environment_id, env.id
        )));
    }
    if run.organization_id != env.organization_id || run.project_id != env.project_id {
        return Err(EnqueueError::validation(format!(
            "run {} organization/project does not match environment {}",
            run.id, env.id
        )));
    }
    if run.attempt_number < 0 {
        return Err(EnqueueError::validation(format!(
            "run {} has negative attempt number {}",
            run.id, run.attempt_number
        )));
    }

    Ok(())
}

fn validate_completed_waitpoints(waitpoints: &[CompletedWaitpoint]) -> EnqueueResult<()> {
    for waitpoint in waitpoints {
        validate_identifier("completed_waitpoints.id", &waitpoint.id)?;
        if let Some(index) = waitpoint.index {
            if index < 0 {
                return Err(EnqueueError::validation(format!(
                    "waitpoint {} has negative index {index}",
                    waitpoint.id
                )));
            }
        }
    }
    Ok(())
}

fn validate_identifier(field: &str, value: &str) -> EnqueueResult<()> {
    if value.trim().is_empty() {
        return Err(EnqueueError::validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(EnqueueError::validation(format!(
            "{field} too long: {} chars (max: {MAX_IDENTIFIER_LENGTH})",
            value.len()
        )));
    }
    Ok(())
}

fn validate_optional_identifier(field: &str, value: Option<&str>) -> EnqueueResult<()> {
    match value {
        Some(value) => validate_identifier(field, value),
        None => Ok(()),
    }
}
