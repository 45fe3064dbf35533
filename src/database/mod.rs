//! # Database Operations
//!
//! The transactional store capability used by the execution snapshot system.
//!
//! ## Key Components
//!
//! - [`store`] - `TransactionalStore` / `StoreTransaction` traits and the
//!   [`ScopedTransaction`] wrapper for "reuse the caller's transaction or own one"
//! - [`memory`] - in-process store with fault injection, used by tests and embedders
//! - [`postgres`] - SQLx-backed PostgreSQL store
//! - [`connection`] - pool construction from [`DatabaseConfig`](crate::config::DatabaseConfig)
//! - [`migrations`] - schema migration runner guarded by an advisory lock

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod store;

pub use connection::DatabaseConnection;
pub use memory::InMemoryStore;
pub use migrations::DatabaseMigrations;
pub use postgres::PgStore;
pub use store::{ScopedTransaction, StoreTransaction, TransactionalStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error during {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Failed to decode {entity} row: {message}")]
    Decode { entity: String, message: String },

    #[error("Duplicate {entity} with id {id}")]
    Duplicate { entity: String, id: String },

    #[error("Injected store failure during {operation}")]
    Injected { operation: String },
}

impl StoreError {
    pub fn database(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn duplicate(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn injected(operation: impl Into<String>) -> Self {
        Self::Injected {
            operation: operation.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::database("query", err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
