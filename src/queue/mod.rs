//! Durable task queue access.
//!
//! [`MessageQueueClient`] implements the consumption protocol on top of a
//! [`QueueBackend`]:
//!
//! - `pop_next` long-polls for exactly one message and decodes its task
//! - `write` serializes a body, enqueues it with attributes and verifies the
//!   backend's acknowledgement
//! - `delete` acknowledges a message; an undeleted message is redelivered
//!   after its visibility timeout
//!
//! Backends: [`SqsQueue`] for production, [`InMemoryQueue`] for tests and
//! local runs.

mod backend;
mod client;
mod error;
mod memory;
mod message;
mod sqs;

pub use backend::{QueueBackend, RawMessage, ReceiveRequest, SendReceipt};
pub use client::{DEFAULT_VISIBILITY_TIMEOUT, DEFAULT_WAIT_TIME, MessageQueueClient, md5_hex};
pub use error::QueueError;
pub use memory::InMemoryQueue;
pub use message::{MessageAttributes, QueuedMessage};
pub use sqs::SqsQueue;
