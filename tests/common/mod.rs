//! Shared helpers for the run engine integration tests.

#![allow(dead_code)] // Each test binary uses a different subset

pub mod builders;
pub mod recording;
pub mod strategies;

pub use builders::*;
pub use recording::*;

/// Generate a unique identifier for test data
pub fn unique_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}
