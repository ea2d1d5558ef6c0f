//! Core domain types for eventslice.
//!
//! This module defines the data that flows between the append coordinator, the
//! stream reader and the record codec: events proposed by a caller, records
//! stamped with a stream version, the per-stream head counter, and slices (the
//! batches persisted together by one append).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

/// Maximum length of an event name in bytes.
///
/// Event names are UTF-8 strings identifying the kind of domain event
/// (e.g., `"OrderPlaced"`, `"PaymentReceived"`).
pub const MAX_EVENT_NAME_LEN: usize = 256;

/// Default number of keys requested per bulk read when loading a stream stored
/// with one key per event.
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 20;

/// An event the caller wants to append to a stream.
///
/// The caller never supplies a version; the append coordinator assigns one when
/// the event is stamped into an [`EventRecord`].
///
/// # Fields
///
/// * `event_id` - Unique ID for this event (UUID v4 by default).
/// * `name` - Event name (UTF-8, max 256 bytes).
/// * `payload` - Domain event body, stored as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedEvent {
    /// Unique ID for this event.
    pub event_id: Uuid,
    /// Event name.
    pub name: String,
    /// Domain event body.
    pub payload: Value,
}

impl ProposedEvent {
    /// Create an event with a freshly generated UUID v4 id.
    ///
    /// # Arguments
    ///
    /// * `name` - Event name.
    /// * `payload` - JSON payload.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            name: name.into(),
            payload,
        }
    }

    /// Create an event whose payload is the JSON form of `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `payload` cannot be represented as JSON
    /// (for example a map with non-string keys).
    pub fn from_serialize<T: Serialize>(name: impl Into<String>, payload: &T) -> Result<Self, Error> {
        Ok(Self::new(name, serde_json::to_value(payload)?))
    }

    /// Stamp this event with its assigned stream version.
    pub(crate) fn into_record(self, version: u64) -> EventRecord {
        EventRecord {
            event_id: self.event_id,
            event_name: self.name,
            payload: self.payload,
            version,
        }
    }
}

/// A persisted event with its assigned stream version.
///
/// Versions are one-based and gap-free within a stream: the first event ever
/// appended is version 1. A record's identity is `(stream, version)` and it is
/// immutable once written.
///
/// The serialized field names (`EventId`, `EventName`, `Data`, `Version`) are
/// the stored layout shared with existing stores; do not rename them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRecord {
    /// Unique ID of the event. Stored values must be UUID strings.
    pub event_id: Uuid,
    /// Event name.
    pub event_name: String,
    /// Domain event body.
    #[serde(rename = "Data")]
    pub payload: Value,
    /// One-based version within the stream.
    pub version: u64,
}

impl EventRecord {
    /// Deserialize the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptRecord`] if the stored payload does not match `T`.
    /// A record does not know its stream, so the error's `key` is the locator
    /// `version <n>` rather than a store key.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        T::deserialize(&self.payload).map_err(|e| Error::CorruptRecord {
            key: format!("version {}", self.version),
            detail: format!("payload does not match requested type: {e}"),
        })
    }
}

/// Per-stream version counter.
///
/// `version` equals the number of records ever durably appended to the stream.
/// An absent head is equivalent to `StreamHead::default()` (version 0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamHead {
    /// Number of records appended to the stream so far.
    pub version: u64,
}

/// A batch of records written together by a single append.
///
/// Records are contiguous and ascending. `preceding_version` is the ending
/// version of the logically previous slice (0 for the first slice), which is
/// what lets a reader walk a stream backward from its head without an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Slice {
    /// Ending version of the previous slice, or 0 for the first one.
    pub preceding_version: u64,
    /// Records in ascending version order.
    pub records: Vec<EventRecord>,
}

impl Slice {
    /// Build a slice from stamped records. The preceding version is derived from
    /// the first record.
    ///
    /// Returns `None` if `records` is empty.
    pub fn from_records(records: Vec<EventRecord>) -> Option<Slice> {
        let first = records.first()?.version;
        Some(Slice {
            preceding_version: first.saturating_sub(1),
            records,
        })
    }

    /// Version of the last record in the slice (the version its key is named after).
    pub fn ending_version(&self) -> u64 {
        self.records
            .last()
            .map_or(self.preceding_version, |r| r.version)
    }
}

/// Result of loading a stream.
///
/// # Fields
///
/// * `events` - Records in ascending version order.
/// * `version` - Version of the last record yielded, or the head version when
///   no record matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedStream {
    /// Records in ascending version order.
    pub events: Vec<EventRecord>,
    /// Resolved version for the load.
    pub version: u64,
}

impl LoadedStream {
    /// Build a result from ordered records, falling back to `head_version` when
    /// `events` is empty.
    pub(crate) fn resolve(events: Vec<EventRecord>, head_version: u64) -> LoadedStream {
        let version = events.last().map_or(head_version, |e| e.version);
        LoadedStream { events, version }
    }
}
