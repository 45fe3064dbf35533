//! # Structured Logging Module
//!
//! Environment-aware structured logging for the run engine. Console output
//! is either human readable or JSON lines, selected by [`LoggingConfig`].

use crate::config::{LogFormat, LoggingConfig};
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging. Safe to call more than once.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = resolve_filter(config, &environment);

        let registry = tracing_subscriber::registry().with(filter);
        // An embedding application may already own the global subscriber
        let result = match config.format {
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_current_span(true),
                )
                .try_init(),
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            format = ?config.format,
            "Structured logging initialized"
        );
    });
}

fn resolve_filter(config: &LoggingConfig, environment: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(environment).to_string());
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

fn get_environment() -> String {
    std::env::var("RUN_ENGINE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log the outcome of one run-level operation with a consistent field set.
pub fn log_run_operation(
    operation: &str,
    run_id: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        run_id = %run_id,
        status = %status,
        details = details,
        "RUN_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
        log_run_operation("enqueue", "run_1", "ok", None);
    }
}
