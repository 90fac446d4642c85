//! In-process sink.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use batchline_types::{EventRecord, RecordId};

use crate::{PersistError, Sink};

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<RecordId, usize>,
    records: Vec<EventRecord>,
    unavailable: Option<String>,
    batches_committed: u64,
}

/// Sink that keeps records in memory, deduplicated by id.
///
/// Can be switched into an unavailable state to simulate a store outage.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<Inner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `persist` fail with `reason`, or restores
    /// normal operation when `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.lock().unavailable = reason.map(str::to_string);
    }

    /// Stored records in first-insertion order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.lock().by_id.contains_key(id)
    }

    /// Number of successful `persist` calls.
    pub fn batches_committed(&self) -> u64 {
        self.lock().batches_committed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn persist(&self, records: &[EventRecord]) -> Result<(), PersistError> {
        let mut inner = self.lock();

        if let Some(reason) = &inner.unavailable {
            return Err(PersistError::Unavailable(reason.clone()));
        }

        for record in records {
            if inner.by_id.contains_key(&record.id) {
                continue;
            }
            let position = inner.records.len();
            inner.by_id.insert(record.id, position);
            inner.records.push(record.clone());
        }
        inner.batches_committed += 1;

        Ok(())
    }
}
