//! # batchline-queue: queue transports for `Batchline`
//!
//! The consumer talks to its broker only through the [`Transport`] trait and
//! the producer only through [`Publisher`]. Both follow AMQP semantics:
//!
//! - `declare` is idempotent and creates the queue if absent
//! - `set_prefetch` bounds the number of unacknowledged deliveries; once the
//!   bound is reached the broker stops delivering until something is resolved
//! - every [`Delivery`] carries a [`DeliveryTag`] that must be resolved exactly
//!   once with `ack` or `nack`
//! - deliveries left unresolved when a connection goes away are requeued and
//!   redelivered with `redelivered = true`
//!
//! ## Implementations
//!
//! - [`MemoryBroker`]: in-process broker used by tests and `batchline demo`
//! - `AmqpTransport` / `AmqpPublisher`: RabbitMQ via `lapin` (feature `amqp`)

use async_trait::async_trait;
use batchline_types::{DeliveryTag, QueueName};
use bytes::Bytes;

mod error;
mod memory;

#[cfg(feature = "amqp")]
mod amqp;

pub use error::{AckError, TransportError};
pub use memory::{MemoryBroker, MemoryConnection, MemoryPublisher};

#[cfg(feature = "amqp")]
pub use amqp::{AmqpPublisher, AmqpTransport};

/// A message handed to the consumer.
#[derive(Debug)]
pub struct Delivery {
    /// Handle used to resolve this delivery.
    pub tag: DeliveryTag,
    /// Raw message body.
    pub payload: Bytes,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
}

/// Receiving side of a queue connection.
#[async_trait]
pub trait Transport: Send {
    /// Creates the queue if it does not exist.
    async fn declare(&mut self, queue: &QueueName) -> Result<(), TransportError>;

    /// Limits the number of unacknowledged deliveries on this connection.
    async fn set_prefetch(&mut self, limit: u16) -> Result<(), TransportError>;

    /// Starts receiving from `queue`.
    async fn consume(&mut self, queue: &QueueName) -> Result<(), TransportError>;

    /// Waits for the next delivery.
    ///
    /// Returns `Ok(None)` once the broker has ended the delivery stream.
    /// Cancel-safe: dropping the future before it completes loses no message.
    async fn recv(&mut self) -> Result<Option<Delivery>, TransportError>;

    /// Acknowledges a delivery; the broker forgets the message.
    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), AckError>;

    /// Rejects a delivery. With `requeue` the broker redelivers it later,
    /// otherwise it is routed to the dead-letter path.
    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), AckError>;
}

/// Publishing side of a queue connection.
#[async_trait]
pub trait Publisher: Send {
    /// Creates the queue if it does not exist.
    async fn declare(&mut self, queue: &QueueName) -> Result<(), TransportError>;

    /// Publishes one message body to `queue`.
    async fn publish(&mut self, queue: &QueueName, payload: Bytes) -> Result<(), TransportError>;
}
