//! Wire codec for event records.
//!
//! Each queue message carries exactly one [`EventRecord`] encoded as a JSON
//! object:
//!
//! ```text
//! {"id": "<uuid>", "name": "...", "age": 42, "city": "...", "created_date": "2024-01-31 12:00:00"}
//! ```
//!
//! Decoding is strict. Unknown or missing fields, wrong types, a non-UUID id,
//! an unparseable timestamp and blank text attributes are all reported as a
//! [`DecodeError`] for that single message.

use bytes::Bytes;
use thiserror::Error;

use crate::EventRecord;

/// Timestamp format used on the wire and in the store.
pub const CREATED_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// ISO-8601 variant accepted on decode for producers that emit a `T` separator.
///
/// Whole seconds only, like the store column. Fractional seconds are
/// rejected rather than truncated.
const CREATED_DATE_ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Errors produced while decoding a message payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not JSON, or does not match the record schema.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload parsed but a field value is unacceptable.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

impl EventRecord {
    /// Decodes a record from a message body.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let record: EventRecord = serde_json::from_slice(payload)?;

        if record.name.trim().is_empty() {
            return Err(DecodeError::InvalidField {
                field: "name",
                reason: "must not be blank",
            });
        }
        if record.city.trim().is_empty() {
            return Err(DecodeError::InvalidField {
                field: "city",
                reason: "must not be blank",
            });
        }

        Ok(record)
    }

    /// Encodes the record as a message body.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Serde adapter for the `created_date` field.
pub mod created_date {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    use super::{CREATED_DATE_FORMAT, CREATED_DATE_ISO_FORMAT};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(CREATED_DATE_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| {
            D::Error::custom(format!(
                "invalid created_date `{raw}`, expected `{CREATED_DATE_FORMAT}`"
            ))
        })
    }

    /// Parses a wire timestamp, accepting the space or `T` separated form.
    /// Timestamps with sub-second precision do not parse.
    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, CREATED_DATE_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, CREATED_DATE_ISO_FORMAT))
            .ok()
    }
}
