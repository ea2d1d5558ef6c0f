//! JSON codec for stream heads, event records and slices.
//!
//! This module is pure data transformation -- no store calls, no async. Values are
//! stored as UTF-8 JSON. Decoding validates the invariants the reader relies on:
//! slices are non-empty, contiguous, and their preceding version agrees with their
//! first record.
//!
//! Slices are written in the tagged layout `{"PrecedingVersion": n, "Records": [...]}`.
//! Slices written by older writers are a bare JSON array of records; those still
//! decode, with the preceding version inferred as `first.version - 1`.
//!
//! Both layouts require `EventId` to be a UUID string. A record whose id is any
//! other string is reported as [`Error::CorruptRecord`].

use bytes::Bytes;
use serde::Deserialize;

use crate::error::Error;
use crate::types::{EventRecord, ProposedEvent, Slice, StreamHead};

/// Either slice layout found in a store.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSlice {
    Tagged(Slice),
    Legacy(Vec<EventRecord>),
}

/// Assign versions `head_version + 1 ..= head_version + events.len()` to `events`
/// in input order.
///
/// The caller must have checked that `head_version + events.len()` fits in a `u64`.
pub fn stamp_versions(head_version: u64, events: Vec<ProposedEvent>) -> Vec<EventRecord> {
    events
        .into_iter()
        .enumerate()
        .map(|(offset, event)| event.into_record(head_version + offset as u64 + 1))
        .collect()
}

/// Encode a stream head.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if encoding fails.
pub fn encode_head(head: &StreamHead) -> Result<Bytes, Error> {
    Ok(Bytes::from(serde_json::to_vec(head)?))
}

/// Decode a stream head stored under `key`.
///
/// # Errors
///
/// Returns [`Error::CorruptRecord`] if `bytes` is not a valid head.
pub fn decode_head(key: &str, bytes: &[u8]) -> Result<StreamHead, Error> {
    serde_json::from_slice(bytes).map_err(|e| corrupt(key, format!("invalid stream head: {e}")))
}

/// Encode a single event record (one-key-per-event layout).
///
/// # Errors
///
/// Returns [`Error::Serialization`] if encoding fails.
pub fn encode_event(record: &EventRecord) -> Result<Bytes, Error> {
    Ok(Bytes::from(serde_json::to_vec(record)?))
}

/// Decode a single event record stored under `key`.
///
/// # Errors
///
/// Returns [`Error::CorruptRecord`] if `bytes` is not a valid record.
pub fn decode_event(key: &str, bytes: &[u8]) -> Result<EventRecord, Error> {
    serde_json::from_slice(bytes).map_err(|e| corrupt(key, format!("invalid event record: {e}")))
}

/// Encode a slice in the tagged layout.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if encoding fails.
pub fn encode_slice(slice: &Slice) -> Result<Bytes, Error> {
    Ok(Bytes::from(serde_json::to_vec(slice)?))
}

/// Decode a slice stored under `key`, accepting both the tagged and the legacy
/// bare-array layout.
///
/// # Errors
///
/// Returns [`Error::CorruptRecord`] if `bytes` is not a slice, the slice is empty,
/// its versions are not contiguous, or its preceding version disagrees with its
/// first record.
pub fn decode_slice(key: &str, bytes: &[u8]) -> Result<Slice, Error> {
    let stored: StoredSlice = serde_json::from_slice(bytes)
        .map_err(|e| corrupt(key, format!("invalid event slice: {e}")))?;

    let slice = match stored {
        StoredSlice::Tagged(slice) => slice,
        StoredSlice::Legacy(records) => {
            Slice::from_records(records).ok_or_else(|| corrupt(key, "empty event slice"))?
        }
    };

    let Some(first) = slice.records.first() else {
        return Err(corrupt(key, "empty event slice"));
    };
    if slice.preceding_version.checked_add(1) != Some(first.version) {
        return Err(corrupt(
            key,
            format!(
                "slice starts at version {} but follows version {}",
                first.version, slice.preceding_version
            ),
        ));
    }
    if let Some(gap) = slice
        .records
        .windows(2)
        .find(|pair| pair[0].version.checked_add(1) != Some(pair[1].version))
    {
        return Err(corrupt(
            key,
            format!(
                "non-contiguous versions {} -> {}",
                gap[0].version, gap[1].version
            ),
        ));
    }

    Ok(slice)
}

fn corrupt(key: &str, detail: impl Into<String>) -> Error {
    Error::CorruptRecord {
        key: key.to_string(),
        detail: detail.into(),
    }
}
