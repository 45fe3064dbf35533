//! # pgmq Run Queue
//!
//! Publishes dispatch messages through the PostgreSQL `pgmq` extension using
//! runtime SQLx queries. The fan-out to every master queue happens in one
//! database transaction, so either every master queue receives the message
//! or none does.

use super::{MessagingError, MessagingResult, QueueMessage, RunQueue};
use crate::models::AuthenticatedEnvironment;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const QUEUE_NAME_MAX_LEN: usize = 47;
const QUEUE_NAME_DIGEST_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct PgmqRunQueue {
    pool: PgPool,
}

impl PgmqRunQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// pgmq queue names are lowercase identifiers; master queue names are not.
    ///
    /// A name that is already a short lowercase identifier maps to itself.
    /// Any other name is sanitized, truncated, and suffixed with a digest of
    /// the original, so distinct master queues never share a pgmq queue.
    pub fn physical_queue_name(master_queue: &str) -> MessagingResult<String> {
        if master_queue.is_empty() {
            return Err(MessagingError::queue_operation(
                master_queue,
                "resolve_name",
                "queue name must not be empty",
            ));
        }

        let sanitized: String = master_queue
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();

        if sanitized == master_queue && sanitized.len() <= QUEUE_NAME_MAX_LEN {
            return Ok(sanitized);
        }

        let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, master_queue.as_bytes())
            .simple()
            .to_string();
        let stem: String = sanitized
            .chars()
            .take(QUEUE_NAME_MAX_LEN - QUEUE_NAME_DIGEST_LEN - 1)
            .collect();
        Ok(format!("{stem}_{}", &digest[..QUEUE_NAME_DIGEST_LEN]))
    }

    /// Create the pgmq queue backing `master_queue` if it does not exist.
    #[instrument(skip(self))]
    pub async fn create_master_queue(&self, master_queue: &str) -> MessagingResult<()> {
        let name = Self::physical_queue_name(master_queue)?;
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(&name, "create", e.to_string()))?;

        info!(master_queue = %master_queue, queue = %name, "Master queue ready");
        Ok(())
    }
}

#[async_trait]
impl RunQueue for PgmqRunQueue {
    async fn enqueue_message(
        &self,
        env: &AuthenticatedEnvironment,
        master_queues: &[String],
        message: &QueueMessage,
    ) -> MessagingResult<()> {
        if master_queues.is_empty() {
            return Err(MessagingError::no_master_queues(&message.run_id));
        }

        let payload = message.to_json()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MessagingError::database("begin", e))?;

        for master_queue in master_queues {
            let name = Self::physical_queue_name(master_queue)?;
            let message_id = sqlx::query_scalar::<_, i64>("SELECT pgmq.send($1, $2::jsonb)")
                .bind(&name)
                .bind(&payload)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| MessagingError::queue_operation(&name, "send", e.to_string()))?;

            debug!(
                run_id = %message.run_id,
                queue = %name,
                message_id,
                "Dispatch message sent"
            );
        }

        tx.commit()
            .await
            .map_err(|e| MessagingError::database("commit", e))?;

        debug!(
            run_id = %message.run_id,
            environment_id = %env.id,
            fan_out = master_queues.len(),
            "Dispatch message published"
        );
        Ok(())
    }

    fn queue_type(&self) -> &'static str {
        "pgmq"
    }
}
