//! # Messaging Error Types
//!
//! Structured errors for the run queue capability.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("No master queues given for run {run_id}")]
    NoMasterQueues { run_id: String },

    #[error("Database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Injected publish failure for run {run_id}")]
    Injected { run_id: String },
}

impl MessagingError {
    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a message serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn no_master_queues(run_id: impl Into<String>) -> Self {
        Self::NoMasterQueues {
            run_id: run_id.into(),
        }
    }

    pub fn database(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        Self::database("query", err)
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
