//! Size-triggered batching.

use std::num::NonZeroUsize;

use batchline_types::{DeliveryTag, EventRecord, RecordId};

/// Buffers decoded records together with their delivery handles until
/// exactly `capacity` have been admitted.
///
/// The accumulator knows nothing about the transport or the store; it only
/// decides when a batch is complete.
#[derive(Debug)]
pub struct Accumulator {
    capacity: NonZeroUsize,
    records: Vec<EventRecord>,
    tags: Vec<DeliveryTag>,
}

impl Accumulator {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            records: Vec::with_capacity(capacity.get()),
            tags: Vec::with_capacity(capacity.get()),
        }
    }

    /// Appends one record. Returns the sealed batch when this admission
    /// brings the buffer to `capacity`; the accumulator is then empty again.
    pub fn admit(&mut self, record: EventRecord, tag: DeliveryTag) -> Option<Batch> {
        self.records.push(record);
        self.tags.push(tag);

        if self.records.len() < self.capacity.get() {
            return None;
        }

        let cap = self.capacity.get();
        Some(Batch {
            records: std::mem::replace(&mut self.records, Vec::with_capacity(cap)),
            tags: std::mem::replace(&mut self.tags, Vec::with_capacity(cap)),
        })
    }

    /// Records admitted since the last seal.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Ids of the buffered, not yet sealed records.
    pub fn pending_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id).collect()
    }
}

/// A sealed group of records, in admission order, with the handle of the
/// message each one arrived in.
#[derive(Debug)]
pub struct Batch {
    records: Vec<EventRecord>,
    tags: Vec<DeliveryTag>,
}

impl Batch {
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Consumes the batch, yielding its records and their delivery handles.
    pub fn into_parts(self) -> (Vec<EventRecord>, Vec<DeliveryTag>) {
        (self.records, self.tags)
    }
}
