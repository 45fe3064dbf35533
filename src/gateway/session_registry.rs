//! Registry of live worker sessions keyed by credential.
//!
//! Lifecycle: [`SessionRegistry::register`] on connect, and
//! [`SessionRegistry::on_close`] when the transport reports the session
//! closed. Removal is driven only by that close event. A reconnect under the
//! same credential replaces the old entry, and the old session's late close
//! event leaves the new entry alone because the lease no longer matches.

use super::{GatewayError, GatewayResult};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// One live connection, as seen by the registry.
#[async_trait]
pub trait GatewaySession: Send + Sync + 'static {
    /// Close the underlying transport.
    async fn close(&self, reason: &str);
}

/// Proof of one registration. Hand it back to [`SessionRegistry::on_close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLease {
    credential: String,
    lease_id: u64,
}

impl SessionLease {
    pub fn credential(&self) -> &str {
        &self.credential
    }
}

pub struct Registration<S> {
    pub lease: SessionLease,
    /// Session previously registered under the same credential. It is not
    /// closed by the registry.
    pub replaced: Option<Arc<S>>,
}

struct Entry<S> {
    lease_id: u64,
    session: Arc<S>,
}

pub struct SessionRegistry<S: GatewaySession> {
    sessions: RwLock<HashMap<String, Entry<S>>>,
    shutting_down: AtomicBool,
    next_lease: AtomicU64,
}

impl<S: GatewaySession> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            next_lease: AtomicU64::new(1),
        }
    }
}

impl<S: GatewaySession> SessionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, credential: &str, session: S) -> GatewayResult<Registration<S>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(GatewayError::ShuttingDown);
        }
        if credential.trim().is_empty() {
            return Err(GatewayError::invalid_credential("credential is empty"));
        }

        let lease_id = self.next_lease.fetch_add(1, Ordering::SeqCst);
        let entry = Entry {
            lease_id,
            session: Arc::new(session),
        };

        let replaced = {
            let mut sessions = self.sessions.write();
            // Re-checked under the lock so shutdown cannot miss a late insert
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(GatewayError::ShuttingDown);
            }
            sessions.insert(credential.to_string(), entry)
        };

        debug!(
            lease_id,
            replaced = replaced.is_some(),
            "Gateway session registered"
        );
        Ok(Registration {
            lease: SessionLease {
                credential: credential.to_string(),
                lease_id,
            },
            replaced: replaced.map(|old| old.session),
        })
    }

    /// Remove the session registered under `lease`, if it is still the
    /// current one for its credential. Returns whether anything was removed.
    pub fn on_close(&self, lease: &SessionLease) -> bool {
        let mut sessions = self.sessions.write();
        let current = sessions
            .get(&lease.credential)
            .map(|entry| entry.lease_id == lease.lease_id)
            .unwrap_or(false);
        if current {
            sessions.remove(&lease.credential);
            debug!(lease_id = lease.lease_id, "Gateway session removed on close");
        }
        current
    }

    pub fn get(&self, credential: &str) -> Option<Arc<S>> {
        self.sessions
            .read()
            .get(credential)
            .map(|entry| Arc::clone(&entry.session))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Refuse new registrations, then close every live session concurrently.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<S>> = {
            let mut sessions = self.sessions.write();
            self.shutting_down.store(true, Ordering::SeqCst);
            sessions.drain().map(|(_, entry)| entry.session).collect()
        };

        info!(sessions = drained.len(), "Shutting down gateway sessions");
        join_all(drained.iter().map(|session| session.close("server shutting down"))).await;
    }
}

/// Credential from an `Authorization` header value of the form `Bearer <token>`.
pub fn parse_bearer_credential(header: &str) -> GatewayResult<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(GatewayError::invalid_credential(
            "expected `Bearer <credential>`",
        )),
    }
}
