//! # batchline-producer: synthetic event source
//!
//! Generates [`EventRecord`](batchline_types::EventRecord)s and publishes one
//! per message, with a random pause between events to mimic an irregular
//! real-world arrival rate.

use std::time::Duration;

use batchline_queue::{Publisher, TransportError};
use batchline_types::QueueName;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod generator;

pub use generator::{MAX_AGE, MIN_AGE, RecordGenerator};

/// Default upper bound on the pause between two events.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProduceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How many events to publish and how fast.
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    /// Stop after this many events; `None` runs until cancelled.
    pub count: Option<u64>,
    /// Upper bound of the random pause between events.
    pub max_jitter: Duration,
}

impl Default for ProduceOptions {
    fn default() -> Self {
        Self {
            count: None,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl ProduceOptions {
    /// Publish exactly `count` events as fast as possible.
    pub fn burst(count: u64) -> Self {
        Self {
            count: Some(count),
            max_jitter: Duration::ZERO,
        }
    }
}

/// Declares `queue` and publishes generated events until the count is
/// reached or `token` is cancelled. Returns the number published.
pub async fn publish_events<P>(
    publisher: &mut P,
    queue: &QueueName,
    generator: &mut RecordGenerator,
    options: &ProduceOptions,
    token: &CancellationToken,
) -> Result<u64, ProduceError>
where
    P: Publisher + ?Sized,
{
    publisher.declare(queue).await?;
    info!(queue = %queue, count = ?options.count, "Producing events");

    let mut published = 0u64;

    while options.count.is_none_or(|limit| published < limit) {
        if token.is_cancelled() {
            break;
        }

        let record = generator.next_record();
        let payload = record.encode()?;
        publisher.publish(queue, payload).await?;
        published += 1;
        debug!(record_id = %record.id, name = %record.name, city = %record.city, "Produced event");

        let pause = generator.jitter(options.max_jitter);
        if pause.is_zero() {
            continue;
        }
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(pause) => {}
        }
    }

    info!(queue = %queue, published, "Producer stopped");
    Ok(published)
}
