//! # Batchline
//!
//! Micro-batching queue consumer with at-least-once delivery.
//!
//! A [`Consumer`] pulls JSON event records from a queue [`Transport`],
//! groups them into fixed-size batches with an [`Accumulator`], writes each
//! sealed batch to a [`Sink`] in one transaction, and only then acknowledges
//! the batch's messages. A failed write releases the whole batch back to the
//! broker for redelivery; the sink's insert-or-ignore on record id makes the
//! replay harmless.
//!
//! ## Quick start
//!
//! ```ignore
//! use batchline::{Consumer, ConsumerOptions, MemoryBroker, SqliteSink};
//! use tokio_util::sync::CancellationToken;
//!
//! let broker = MemoryBroker::new();
//! let sink = SqliteSink::open("users.db").await?;
//! let options = ConsumerOptions::new("event_queue", 5, 5);
//!
//! let mut consumer = Consumer::new(options, broker.connect(), sink)?;
//! let report = consumer.run(CancellationToken::new()).await?;
//! ```

mod accumulator;
pub mod coordinator;
mod consumer;
mod error;

pub use accumulator::{Accumulator, Batch};
pub use consumer::{Consumer, ConsumerOptions, DEFAULT_RETRY_BACKOFF, RunReport, StopReason};
pub use coordinator::{Outcome, Resolution};
pub use error::ConsumerError;

// Re-export commonly used types
pub use batchline_config::BatchlineConfig;
pub use batchline_queue::{Delivery, MemoryBroker, Publisher, Transport, TransportError};
pub use batchline_store::{MemorySink, PersistError, Sink, SqliteSink};
pub use batchline_types::{DecodeError, DeliveryTag, EventRecord, QueueName, RecordId};
