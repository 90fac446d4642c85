//! The intake loop.
//!
//! Per message:
//!
//! ```text
//! received -> decoded -> buffered -> (batch sealed?) -> persisted -> acked
//!                |                                         |
//!                +-> rejected (dead-lettered)              +-> released (requeued)
//! ```
//!
//! Messages are handled one at a time in delivery order. A sealed batch is
//! persisted and resolved before the next message is received, so the
//! transport's prefetch bound is the only backpressure.
//!
//! A batch whose persist fails is released, and the loop then waits out the
//! retry backoff before receiving again. The broker hands released messages
//! straight back, so without the pause a store outage would spin.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use batchline_config::{BatchlineConfig, MAX_PREFETCH};
use batchline_queue::{Delivery, Transport};
use batchline_store::Sink;
use batchline_types::{DeliveryTag, EventRecord, QueueName};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{self, Outcome, Resolution};
use crate::{Accumulator, Batch, ConsumerError};

/// Pause after a failed persist when none is configured.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Queue binding and batching parameters of a [`Consumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    pub queue: QueueName,
    /// Records per batch; 1 processes every message on its own.
    pub batch_size: u32,
    /// Unacknowledged deliveries the broker may hand out. At least `batch_size`.
    pub prefetch: u32,
    /// How long to wait after a failed persist before receiving again.
    pub retry_backoff: Duration,
}

impl ConsumerOptions {
    pub fn new(queue: impl Into<QueueName>, batch_size: u32, prefetch: u32) -> Self {
        Self {
            queue: queue.into(),
            batch_size,
            prefetch,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn validate(&self) -> Result<(NonZeroUsize, u16), ConsumerError> {
        let batch_size = usize::try_from(self.batch_size)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| ConsumerError::InvalidOptions("batch size must be at least 1".into()))?;

        if self.prefetch < self.batch_size {
            return Err(ConsumerError::InvalidOptions(format!(
                "prefetch ({}) must be at least the batch size ({})",
                self.prefetch, self.batch_size
            )));
        }

        let prefetch = u16::try_from(self.prefetch).map_err(|_| {
            ConsumerError::InvalidOptions(format!(
                "prefetch ({}) exceeds the maximum of {MAX_PREFETCH}",
                self.prefetch
            ))
        })?;

        if self.retry_backoff.is_zero() {
            return Err(ConsumerError::InvalidOptions(
                "retry backoff must be greater than zero".into(),
            ));
        }

        Ok((batch_size, prefetch))
    }
}

impl From<&BatchlineConfig> for ConsumerOptions {
    fn from(config: &BatchlineConfig) -> Self {
        Self::new(
            config.queue.name.as_str(),
            config.batch.size,
            config.queue.prefetch,
        )
        .with_retry_backoff(Duration::from_millis(config.batch.retry_backoff_ms))
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token fired.
    #[default]
    Cancelled,
    /// The broker ended the delivery stream.
    StreamEnded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::StreamEnded => write!(f, "delivery stream ended"),
        }
    }
}

/// Counters for one [`Consumer::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub batches_persisted: u64,
    pub batches_failed: u64,
    pub records_acked: u64,
    /// Records released back to the broker after a failed persist.
    pub records_released: u64,
    /// Malformed messages dead-lettered.
    pub rejected: u64,
    /// Handles the broker refused to resolve.
    pub ack_failures: u64,
    /// Records buffered in an unsealed batch when the run ended. Their
    /// messages stay unacknowledged and are redelivered once the connection
    /// closes.
    pub pending: usize,
    pub stop_reason: StopReason,
}

impl RunReport {
    fn absorb(&mut self, resolution: Resolution) {
        self.records_acked += resolution.acked as u64;
        self.records_released += resolution.released as u64;
        self.ack_failures += resolution.ack_failures as u64;
    }
}

/// Micro-batching consumer: receives from a [`Transport`], persists sealed
/// batches into a [`Sink`], and acknowledges only what the sink confirmed.
pub struct Consumer<T, S> {
    queue: QueueName,
    batch_size: NonZeroUsize,
    prefetch: u16,
    retry_backoff: Duration,
    transport: T,
    sink: S,
}

impl<T, S> fmt::Debug for Consumer<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue)
            .field("batch_size", &self.batch_size)
            .field("prefetch", &self.prefetch)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

impl<T, S> Consumer<T, S>
where
    T: Transport,
    S: Sink,
{
    /// Validates `options` and builds a consumer. Nothing is sent to the
    /// broker until [`run`](Self::run).
    pub fn new(options: ConsumerOptions, transport: T, sink: S) -> Result<Self, ConsumerError> {
        let (batch_size, prefetch) = options.validate()?;
        Ok(Self {
            queue: options.queue,
            batch_size,
            prefetch,
            retry_backoff: options.retry_backoff,
            transport,
            sink,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Gives back the transport and sink. Dropping or closing the transport
    /// releases any deliveries left pending by the last run.
    pub fn into_parts(self) -> (T, S) {
        (self.transport, self.sink)
    }

    /// Declares the queue, applies the prefetch bound and processes messages
    /// until `token` is cancelled or the delivery stream ends.
    ///
    /// A batch that is being persisted when `token` fires is still persisted
    /// and resolved. The unsealed remainder is not flushed. After a failed
    /// persist the loop sleeps for the retry backoff; cancellation cuts the
    /// sleep short.
    ///
    /// Only transport failures end the run with an error; decode, persist and
    /// acknowledgment failures are handled per message or per batch.
    pub async fn run(&mut self, token: CancellationToken) -> Result<RunReport, ConsumerError> {
        self.transport.declare(&self.queue).await?;
        self.transport.set_prefetch(self.prefetch).await?;
        self.transport.consume(&self.queue).await?;

        info!(
            queue = %self.queue,
            batch_size = self.batch_size.get(),
            prefetch = self.prefetch,
            retry_backoff = ?self.retry_backoff,
            "Consumer started"
        );

        let mut accumulator = Accumulator::new(self.batch_size);
        let mut report = RunReport::default();

        let stop_reason = loop {
            let delivery = tokio::select! {
                biased;

                () = token.cancelled() => break StopReason::Cancelled,

                next = self.transport.recv() => match next? {
                    Some(delivery) => delivery,
                    None => break StopReason::StreamEnded,
                },
            };

            let Some((record, tag)) = self.decode(delivery, &mut report).await else {
                continue;
            };

            let Some(batch) = accumulator.admit(record, tag) else {
                continue;
            };

            if self.process(batch, &mut report).await == Outcome::Failed {
                debug!(backoff = ?self.retry_backoff, "Backing off before redelivery");
                tokio::select! {
                    biased;

                    () = token.cancelled() => break StopReason::Cancelled,

                    () = tokio::time::sleep(self.retry_backoff) => {}
                }
            }
        };

        report.pending = accumulator.len();
        report.stop_reason = stop_reason;

        info!(
            queue = %self.queue,
            reason = %stop_reason,
            batches_persisted = report.batches_persisted,
            batches_failed = report.batches_failed,
            rejected = report.rejected,
            pending = report.pending,
            pending_ids = ?accumulator.pending_ids(),
            "Consumer stopped"
        );

        Ok(report)
    }

    /// Decodes one delivery. Malformed payloads are dead-lettered on the spot.
    async fn decode(
        &mut self,
        delivery: Delivery,
        report: &mut RunReport,
    ) -> Option<(EventRecord, DeliveryTag)> {
        let Delivery {
            tag,
            payload,
            redelivered,
        } = delivery;

        match EventRecord::decode(&payload) {
            Ok(record) => {
                debug!(
                    record_id = %record.id,
                    delivery_tag = tag.as_u64(),
                    redelivered,
                    "Received"
                );
                Some((record, tag))
            }
            Err(e) => {
                let delivery_tag = tag.as_u64();
                warn!(delivery_tag, redelivered, error = %e, "Rejecting malformed message");
                report.rejected += 1;
                if let Err(e) = self.transport.nack(tag, false).await {
                    report.ack_failures += 1;
                    warn!(delivery_tag, error = %e, "Failed to reject malformed message");
                }
                None
            }
        }
    }

    async fn process(&mut self, batch: Batch, report: &mut RunReport) -> Outcome {
        let batch_size = batch.len();
        let record_ids = batch.record_ids();

        let outcome = match self.sink.persist(batch.records()).await {
            Ok(()) => {
                report.batches_persisted += 1;
                info!(batch_size, record_ids = ?record_ids, "Batch persisted");
                Outcome::Persisted
            }
            Err(e) => {
                report.batches_failed += 1;
                error!(
                    batch_size,
                    record_ids = ?record_ids,
                    error = %e,
                    "Batch persist failed, releasing for redelivery"
                );
                Outcome::Failed
            }
        };

        let resolution = coordinator::resolve(&mut self.transport, batch, outcome).await;
        report.absorb(resolution);
        outcome
    }
}
