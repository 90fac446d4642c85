use batchline_queue::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Batch size or prefetch bound rejected at construction.
    #[error("invalid consumer options: {0}")]
    InvalidOptions(String),

    /// The queue connection failed; the run cannot continue.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
