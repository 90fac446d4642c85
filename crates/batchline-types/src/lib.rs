//! # batchline-types: Core types for `Batchline`
//!
//! This crate contains shared types used across the `Batchline` system:
//! - Entity IDs ([`RecordId`])
//! - Domain payload ([`EventRecord`])
//! - Transport handles ([`DeliveryTag`], [`QueueName`])
//! - Wire codec ([`wire`], [`DecodeError`])

use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod wire;

pub use wire::{CREATED_DATE_FORMAT, DecodeError};

// ============================================================================
// Entity IDs
// ============================================================================

/// Globally unique identifier of an event record.
///
/// Assigned once by the producer and never changed afterwards. The store
/// keys its idempotent upsert on this value, so a redelivered record with
/// the same id is stored only once.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random (v4) identifier.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Debug for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for RecordId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<RecordId> for Uuid {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

// ============================================================================
// Event Record
// ============================================================================

/// A single domain event as published by the producer.
///
/// The consumer never inspects the attributes beyond decoding them; they
/// travel untouched from the wire payload to the store row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventRecord {
    pub id: RecordId,
    pub name: String,
    pub age: u32,
    pub city: String,
    #[serde(with = "wire::created_date")]
    pub created_date: NaiveDateTime,
}

impl EventRecord {
    /// Number of scalar attributes carried next to the identifier.
    pub const ATTRIBUTE_COUNT: usize = 4;

    pub fn new(
        id: RecordId,
        name: impl Into<String>,
        age: u32,
        city: impl Into<String>,
        created_date: NaiveDateTime,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            age,
            city: city.into(),
            created_date,
        }
    }

    /// Returns the creation timestamp in wire format (`%Y-%m-%d %H:%M:%S`).
    pub fn created_date_string(&self) -> String {
        self.created_date.format(CREATED_DATE_FORMAT).to_string()
    }
}

// ============================================================================
// Transport handles
// ============================================================================

/// Opaque per-message token issued by the queue transport.
///
/// A tag is scoped to the connection that received the message and may be
/// resolved (acknowledged or rejected) exactly once. It is deliberately not
/// `Clone`: resolving a message consumes its tag, so a second resolution
/// does not type-check.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Wraps a transport-assigned tag. Only transports should mint tags.
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a queue binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for QueueName {
    fn from(value: String) -> Self {
        Self(value)
    }
}
