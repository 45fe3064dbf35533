//! # Messaging Module
//!
//! The run queue capability: the dispatch message format and the queues it
//! is published to. Workers poll master queues; this crate only publishes.

pub mod errors;
pub mod in_memory;
pub mod message;
pub mod pgmq;
pub mod run_queue;

pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemoryRunQueue;
pub use message::QueueMessage;
pub use pgmq::PgmqRunQueue;
pub use run_queue::RunQueue;
