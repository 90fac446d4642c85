use batchline_types::QueueName;
use thiserror::Error;

/// Failures of the queue connection itself.
///
/// These are fatal to a consumer run: the connection can no longer be used to
/// receive or resolve deliveries.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection to the broker was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The broker has stopped accepting publishes.
    #[error("channel closed")]
    ChannelClosed,

    /// The queue has not been declared.
    #[error("queue not found: {0}")]
    QueueNotFound(QueueName),

    /// `recv` was called before `consume`.
    #[error("not consuming from any queue")]
    NotConsuming,

    /// Error reported by the AMQP client.
    #[cfg(feature = "amqp")]
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Failures resolving a single delivery.
///
/// These are expected under redelivery races and must not stop a consumer.
#[derive(Debug, Error)]
pub enum AckError {
    /// The tag was already resolved, or was not issued by this connection.
    #[error("unknown delivery tag {0}")]
    UnknownTag(u64),

    /// The broker rejected the acknowledgment.
    #[error("acknowledgment failed: {0}")]
    Transport(String),
}
