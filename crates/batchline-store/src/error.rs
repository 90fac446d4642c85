use thiserror::Error;

/// Errors raised while persisting a batch.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The database rejected the write or could not be reached.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store is not accepting writes.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to a record.
    #[error("corrupt row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}
