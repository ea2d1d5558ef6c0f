//! Key naming for stream heads, slices and per-event records.
//!
//! Every key is `<stream>|<suffix>`: the head lives under `<stream>|head`, and
//! both slices and per-event records live under `<stream>|<version>`. The two
//! version-keyed layouts never coexist in one store because the persistence mode
//! is fixed per store.

use crate::error::Error;

/// Separator between the stream name and the key suffix.
pub const KEY_SEPARATOR: char = '|';

/// Key for the stream head record.
pub fn head_key(stream: &str) -> String {
    format!("{stream}{KEY_SEPARATOR}head")
}

/// Key for the slice whose last record has version `ending_version`.
pub fn slice_key(stream: &str, ending_version: u64) -> String {
    format!("{stream}{KEY_SEPARATOR}{ending_version}")
}

/// Key for a single event record (one-key-per-event layout).
pub fn event_key(stream: &str, version: u64) -> String {
    format!("{stream}{KEY_SEPARATOR}{version}")
}

/// Reject stream names that cannot produce unambiguous keys.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the name is empty or contains
/// [`KEY_SEPARATOR`].
pub fn validate_stream_name(stream: &str) -> Result<(), Error> {
    if stream.is_empty() {
        return Err(Error::InvalidArgument("stream name must not be empty".into()));
    }
    if stream.contains(KEY_SEPARATOR) {
        return Err(Error::InvalidArgument(format!(
            "stream name {stream:?} must not contain '{KEY_SEPARATOR}'"
        )));
    }
    Ok(())
}
