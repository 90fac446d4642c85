//! batchline-store: batch persistence for Batchline
//!
//! A [`Sink`] receives one sealed batch at a time and stores it
//! all-or-nothing. Sinks are idempotent on [`RecordId`]: replaying a record
//! that is already stored succeeds without creating a second row, which is
//! what makes at-least-once redelivery safe.
//!
//! Implementations:
//! - [`SqliteSink`]: durable SQLite table, one transaction per batch
//! - [`MemorySink`]: in-process map, for tests and demos
//!
//! [`RecordId`]: batchline_types::RecordId

use std::sync::Arc;

use async_trait::async_trait;
use batchline_types::EventRecord;

mod error;
mod memory;
mod sqlite;

pub use error::PersistError;
pub use memory::MemorySink;
pub use sqlite::{PoolConfig, SqliteSink};

/// Durable destination for sealed batches.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stores every record in `records` as a single unit.
    ///
    /// On `Ok` all records are visible to readers. On `Err` none of them were
    /// applied by this call; the caller must not assume any subset was written.
    async fn persist(&self, records: &[EventRecord]) -> Result<(), PersistError>;
}

#[async_trait]
impl<S> Sink for Arc<S>
where
    S: Sink + ?Sized,
{
    async fn persist(&self, records: &[EventRecord]) -> Result<(), PersistError> {
        (**self).persist(records).await
    }
}
