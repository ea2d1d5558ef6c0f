//! Optimistic concurrency policy applied to the stream head before an append.

use crate::error::Error;
use crate::types::StreamHead;

/// Controls optimistic concurrency on append.
///
/// The caller states what version the stream head must be at for the append to
/// go ahead. Even with [`ExpectedVersion::Any`] the head is written conditionally
/// on the token read with it, so a concurrent append is never silently lost.
///
/// # Variants
///
/// * `Any` - No version check; the append builds on whatever the head is.
/// * `NoStream` - The stream must not have any records yet (head version 0).
/// * `Exact(u64)` - The head must be at exactly this version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No version check.
    Any,
    /// The stream must be empty.
    NoStream,
    /// The head must be at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Check the policy against the head read for `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrencyConflict`] when the head version does not
    /// satisfy the policy.
    pub fn check(self, stream: &str, head: &StreamHead) -> Result<(), Error> {
        let expected = match self {
            ExpectedVersion::Any => return Ok(()),
            ExpectedVersion::NoStream => 0,
            ExpectedVersion::Exact(v) => v,
        };
        if head.version == expected {
            Ok(())
        } else {
            Err(Error::ConcurrencyConflict {
                stream: stream.to_string(),
                expected,
                actual: head.version,
            })
        }
    }
}

impl From<u64> for ExpectedVersion {
    fn from(version: u64) -> Self {
        ExpectedVersion::Exact(version)
    }
}
