//! # Worker Gateway
//!
//! Bookkeeping for live worker sessions. The transport (websocket, pub/sub)
//! lives outside this crate and plugs in through [`GatewaySession`].

pub mod session_registry;

pub use session_registry::{
    parse_bearer_credential, GatewaySession, Registration, SessionLease, SessionRegistry,
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("Invalid credential: {reason}")]
    InvalidCredential { reason: String },
}

impl GatewayError {
    pub fn invalid_credential(reason: impl Into<String>) -> Self {
        Self::InvalidCredential {
            reason: reason.into(),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
