//! PostgreSQL session advisory locks.
//!
//! Session advisory locks belong to the connection that took them, so a held
//! lock pins one pooled connection until release. Waiting pins nothing: each
//! attempt borrows a connection, tries every key, and on a miss unlocks what
//! it took and hands the connection back before sleeping `retry_interval`.
//! A connection that may still hold a key (failed unlock, future dropped
//! mid-attempt) is closed instead of returned to the pool, which frees its
//! keys server-side.
//!
//! Keys map to the 64-bit `hashtextextended(key, namespace)`. Two run ids that
//! collide only serialize each other.

use super::{HeldLock, LockError, LockResult, RunLock};
use crate::config::RunLockConfig;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Hash seed for run id lock keys.
pub const RUN_LOCK_NAMESPACE: i64 = 0x5255_4e00;

#[derive(Debug, Clone)]
pub struct PgAdvisoryRunLock {
    pool: PgPool,
    namespace: i64,
    retry_interval: Duration,
}

impl PgAdvisoryRunLock {
    /// `pool` should be reserved for locking; see `run_lock.max_connections`.
    pub fn new(pool: PgPool, config: &RunLockConfig) -> Self {
        Self {
            pool,
            namespace: RUN_LOCK_NAMESPACE,
            retry_interval: config.retry_interval(),
        }
    }

    pub fn with_namespace(mut self, namespace: i64) -> Self {
        self.namespace = namespace;
        self
    }

    async fn session(
        &self,
        keys: &[String],
        timeout: Duration,
        deadline: Instant,
    ) -> LockResult<AdvisorySession> {
        let conn = tokio::time::timeout_at(deadline, self.pool.acquire())
            .await
            .map_err(|_| LockError::timeout(keys, timeout))?
            .map_err(|e| LockError::backend(keys, e))?;
        Ok(AdvisorySession::new(conn, self.namespace))
    }
}

#[async_trait]
impl RunLock for PgAdvisoryRunLock {
    async fn acquire(&self, keys: &[String], timeout: Duration) -> LockResult<Box<dyn HeldLock>> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut session = self.session(keys, timeout, deadline).await?;
            match session.try_lock_all(keys).await {
                Ok(true) => {
                    return Ok(Box::new(PgHeldLock {
                        keys: keys.to_vec(),
                        session: Some(session),
                    }))
                }
                // Back to the pool before sleeping
                Ok(false) => drop(session),
                Err(e) => return Err(LockError::backend(keys, e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::timeout(keys, timeout));
            }
            // The final attempt lands on the deadline
            tokio::time::sleep_until((now + self.retry_interval).min(deadline)).await;
        }
    }

    fn lock_type(&self) -> &'static str {
        "postgres_advisory"
    }
}

/// A pooled connection that may hold advisory locks. Dropped while `dirty`,
/// the connection is closed rather than returned to the pool.
struct AdvisorySession {
    conn: PoolConnection<Postgres>,
    namespace: i64,
    dirty: bool,
}

impl AdvisorySession {
    fn new(conn: PoolConnection<Postgres>, namespace: i64) -> Self {
        Self {
            conn,
            namespace,
            dirty: false,
        }
    }

    /// Take every key or none. On a miss the keys taken so far are unlocked.
    async fn try_lock_all(&mut self, keys: &[String]) -> Result<bool, sqlx::Error> {
        self.dirty = true;
        for (taken, key) in keys.iter().enumerate() {
            let acquired = sqlx::query_scalar::<_, bool>(
                "SELECT pg_try_advisory_lock(hashtextextended($2, $1))",
            )
            .bind(self.namespace)
            .bind(key)
            .fetch_one(&mut *self.conn)
            .await?;

            if !acquired {
                debug!(key = %key, "Advisory lock busy");
                self.unlock_all(&keys[..taken]).await?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn unlock_all(&mut self, keys: &[String]) -> Result<(), sqlx::Error> {
        self.dirty = true;
        for key in keys.iter().rev() {
            let released = sqlx::query_scalar::<_, bool>(
                "SELECT pg_advisory_unlock(hashtextextended($2, $1))",
            )
            .bind(self.namespace)
            .bind(key)
            .fetch_one(&mut *self.conn)
            .await?;

            if !released {
                warn!(key = %key, "Advisory unlock found no lock held by this session");
            }
        }
        self.dirty = false;
        Ok(())
    }
}

impl Drop for AdvisorySession {
    fn drop(&mut self) {
        if self.dirty {
            self.conn.close_on_drop();
        }
    }
}

struct PgHeldLock {
    keys: Vec<String>,
    session: Option<AdvisorySession>,
}

#[async_trait]
impl HeldLock for PgHeldLock {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    async fn release(self: Box<Self>) -> LockResult<()> {
        let mut this = self;
        let Some(mut session) = this.session.take() else {
            return Ok(());
        };
        session
            .unlock_all(&this.keys)
            .await
            .map_err(|e| LockError::backend(&this.keys, e))
    }
}
