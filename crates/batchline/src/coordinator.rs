//! Resolves the delivery handles of a batch once its persistence outcome is
//! known.

use batchline_queue::Transport;
use tracing::warn;

use crate::Batch;

/// Result of persisting a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The sink confirmed the batch is durable.
    Persisted,
    /// The sink failed; nothing from this call was stored.
    Failed,
}

/// What happened to the handles of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Handles acknowledged.
    pub acked: usize,
    /// Handles released back to the broker for redelivery.
    pub released: usize,
    /// Handles whose ack/nack the broker did not accept.
    pub ack_failures: usize,
}

/// Acknowledges every handle of `batch` after a successful persist, or
/// releases every handle with requeue after a failed one.
///
/// Must only be called once the persist call has returned. Acknowledgment
/// errors are logged and counted, never propagated: the record is either
/// already durable or will be redelivered.
pub async fn resolve<T>(transport: &mut T, batch: Batch, outcome: Outcome) -> Resolution
where
    T: Transport + ?Sized,
{
    let (records, tags) = batch.into_parts();
    let mut resolution = Resolution::default();

    for (record, tag) in records.iter().zip(tags) {
        let delivery_tag = tag.as_u64();
        let result = match outcome {
            Outcome::Persisted => transport.ack(tag).await,
            Outcome::Failed => transport.nack(tag, true).await,
        };

        match (result, outcome) {
            (Ok(()), Outcome::Persisted) => resolution.acked += 1,
            (Ok(()), Outcome::Failed) => resolution.released += 1,
            (Err(e), _) => {
                resolution.ack_failures += 1;
                warn!(
                    record_id = %record.id,
                    delivery_tag,
                    outcome = ?outcome,
                    error = %e,
                    "Failed to resolve delivery"
                );
            }
        }
    }

    resolution
}
