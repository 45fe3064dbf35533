//! # Transactional Store Capability
//!
//! The engine never talks to a database directly. It asks a
//! [`TransactionalStore`] for a [`StoreTransaction`] and performs all reads and
//! writes through it.
//!
//! ## Scoped transactions
//!
//! Several entry points accept an optional, already-open transaction from
//! their caller. [`ScopedTransaction`] makes the ownership explicit:
//!
//! - `Borrowed`: the caller's transaction. Never committed or rolled back here.
//! - `Owned`: opened here. Committed on success, rolled back on failure, and
//!   rolled back implicitly if dropped unfinished.

use super::StoreResult;
use crate::models::{ExecutionSnapshot, NewExecutionSnapshot, TaskRun};
use async_trait::async_trait;
use tracing::warn;

/// A store that can open atomic transactions.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Store type for debugging/observability
    fn store_type(&self) -> &'static str;
}

/// Reads and writes performed atomically inside one transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_task_run(&mut self, run: &TaskRun) -> StoreResult<()>;

    async fn find_task_run(&mut self, run_id: &str) -> StoreResult<Option<TaskRun>>;

    /// Append a snapshot. The store assigns its `sequence`.
    async fn insert_execution_snapshot(
        &mut self,
        snapshot: NewExecutionSnapshot,
    ) -> StoreResult<ExecutionSnapshot>;

    /// Latest snapshot by `(created_at, sequence)`.
    async fn latest_execution_snapshot(
        &mut self,
        run_id: &str,
    ) -> StoreResult<Option<ExecutionSnapshot>>;

    /// Every snapshot of the run, oldest first.
    async fn execution_snapshots(&mut self, run_id: &str) -> StoreResult<Vec<ExecutionSnapshot>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// A transaction that is either borrowed from the caller or owned end-to-end.
pub enum ScopedTransaction<'a> {
    Borrowed(&'a mut dyn StoreTransaction),
    Owned(Box<dyn StoreTransaction>),
}

impl<'a> ScopedTransaction<'a> {
    /// Reuse `existing` when given, otherwise open a new transaction on `store`.
    pub async fn resolve(
        store: &dyn TransactionalStore,
        existing: Option<&'a mut dyn StoreTransaction>,
    ) -> StoreResult<Self> {
        match existing {
            Some(tx) => Ok(Self::Borrowed(tx)),
            None => Ok(Self::Owned(store.begin().await?)),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    pub fn transaction(&mut self) -> &mut dyn StoreTransaction {
        match self {
            Self::Borrowed(tx) => &mut **tx,
            Self::Owned(tx) => tx.as_mut(),
        }
    }

    /// Commit an owned transaction. A borrowed one is left to its owner.
    pub async fn commit(self) -> StoreResult<()> {
        match self {
            Self::Borrowed(_) => Ok(()),
            Self::Owned(tx) => tx.commit().await,
        }
    }

    /// Roll back an owned transaction. A borrowed one is left to its owner.
    pub async fn rollback(self) -> StoreResult<()> {
        match self {
            Self::Borrowed(_) => Ok(()),
            Self::Owned(tx) => tx.rollback().await,
        }
    }

    /// Commit on `Ok`, roll back on `Err`, and hand `result` back.
    ///
    /// A commit failure replaces an `Ok` result. A rollback failure is logged
    /// and the original error is kept.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<super::StoreError>,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed after error");
                }
                Err(err)
            }
        }
    }
}
