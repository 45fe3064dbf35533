//! Run queue capability.

use super::{MessagingResult, QueueMessage};
use crate::models::AuthenticatedEnvironment;
use async_trait::async_trait;

/// At-least-once, priority-ordered queue keyed by master queue name.
///
/// One call publishes the same message to every master queue in order.
/// Ordering holds within a master queue, not across the list.
#[async_trait]
pub trait RunQueue: Send + Sync {
    async fn enqueue_message(
        &self,
        env: &AuthenticatedEnvironment,
        master_queues: &[String],
        message: &QueueMessage,
    ) -> MessagingResult<()>;

    /// Queue type for debugging/observability
    fn queue_type(&self) -> &'static str;
}
