//! Error types for eventslice.
//!
//! This module defines the unified error enum used throughout the crate. All fallible
//! operations return `Result<T, Error>`. Conflict variants are per-call, per-stream
//! conditions: the caller re-reads the stream and appends again. Backend failures
//! are carried through unchanged.

use crate::kv::KvError;

/// Unified error type for all eventslice operations.
///
/// Recoverable conflicts (see [`Error::is_conflict`]):
///
/// - `ConcurrencyConflict` -- expected version did not match the head.
/// - `DuplicateSlice` -- the target slice key already exists.
/// - `HeadConflict` -- two-phase head write lost the race after the slice was written.
/// - `TransactionConflict` -- an atomic transaction was rejected by a key condition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Optimistic concurrency check failed: the stream's current version does not
    /// match the caller's expectation.
    #[error("wrong version for stream {stream}: expected {expected} but was {actual}")]
    ConcurrencyConflict {
        /// Stream that was appended to.
        stream: String,
        /// The version the caller expected the stream to be at.
        expected: u64,
        /// The version the stream is actually at.
        actual: u64,
    },

    /// The slice (or event) key for the new ending version already exists. A
    /// concurrent writer advanced the stream to at least this version.
    #[error("event slice {key} already exists")]
    DuplicateSlice {
        /// Key that was already present.
        key: String,
    },

    /// Two-phase append: the slice was written but the head had moved on, so the
    /// head write was rejected. The slice is left orphaned.
    #[error("stream head {key} has been updated; slice {orphaned_slice} is orphaned")]
    HeadConflict {
        /// Head key whose conditional write failed.
        key: String,
        /// Slice key written before the head write failed.
        orphaned_slice: String,
    },

    /// An atomic multi-key transaction was rejected because one of its
    /// conditioned keys changed after it was read.
    #[error("transaction for stream {stream} rejected by a concurrent write")]
    TransactionConflict {
        /// Stream that was appended to.
        stream: String,
    },

    /// The backing store failed. The backend's error is passed through as-is.
    #[error(transparent)]
    Backend(#[from] KvError),

    /// A stored value could not be decoded or violates record invariants.
    #[error("corrupt record at {key}: {detail}")]
    CorruptRecord {
        /// Store key of the corrupt value, or `version <n>` when the value came
        /// from an already-loaded record.
        key: String,
        /// Human-readable description of the corruption.
        detail: String,
    },

    /// A key the stream layout requires is absent from the store.
    #[error("missing key {key}")]
    MissingKey {
        /// The absent key.
        key: String,
    },

    /// A value could not be serialized for storage.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A request argument is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns `true` for the conflict variants a caller can resolve by re-reading
    /// the stream and appending again.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::ConcurrencyConflict { .. }
                | Error::DuplicateSlice { .. }
                | Error::HeadConflict { .. }
                | Error::TransactionConflict { .. }
        )
    }

    /// Short label used for the conflict metrics.
    pub(crate) fn conflict_kind(&self) -> Option<&'static str> {
        match self {
            Error::ConcurrencyConflict { .. } => Some("expected_version"),
            Error::DuplicateSlice { .. } => Some("duplicate_slice"),
            Error::HeadConflict { .. } => Some("head"),
            Error::TransactionConflict { .. } => Some("transaction"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_display() {
        let err = Error::ConcurrencyConflict {
            stream: "orders-1".into(),
            expected: 0,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("orders-1"), "expected stream in: {msg}");
        assert!(
            msg.contains("expected 0 but was 3"),
            "expected versions in: {msg}"
        );
    }

    #[test]
    fn duplicate_slice_display_names_key() {
        let err = Error::DuplicateSlice {
            key: "orders-1|4".into(),
        };
        assert!(err.to_string().contains("orders-1|4"));
    }

    #[test]
    fn head_conflict_display_names_orphan() {
        let err = Error::HeadConflict {
            key: "orders-1|head".into(),
            orphaned_slice: "orders-1|2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("orders-1|head"), "got: {msg}");
        assert!(msg.contains("orders-1|2"), "got: {msg}");
    }

    #[test]
    fn backend_error_is_transparent() {
        let err = Error::from(KvError::Unavailable("connection refused".into()));
        assert!(matches!(err, Error::Backend(KvError::Unavailable(_))));
        // Display is the backend's own message, not a wrapped one.
        assert_eq!(
            err.to_string(),
            KvError::Unavailable("connection refused".into()).to_string()
        );
    }

    #[test]
    fn serde_error_converts_via_question_mark() {
        fn fallible() -> Result<serde_json::Value, Error> {
            Ok(serde_json::from_str("{not json")?)
        }

        assert!(matches!(fallible().unwrap_err(), Error::Serialization(_)));
    }

    #[test]
    fn conflict_variants_are_conflicts() {
        let conflicts = [
            Error::ConcurrencyConflict {
                stream: "s".into(),
                expected: 1,
                actual: 2,
            },
            Error::DuplicateSlice { key: "s|2".into() },
            Error::HeadConflict {
                key: "s|head".into(),
                orphaned_slice: "s|2".into(),
            },
            Error::TransactionConflict { stream: "s".into() },
        ];
        for err in &conflicts {
            assert!(err.is_conflict(), "{err:?} should be a conflict");
            assert!(err.conflict_kind().is_some());
        }
    }

    #[test]
    fn non_conflict_variants_are_not_conflicts() {
        let others = [
            Error::Backend(KvError::Other("boom".into())),
            Error::CorruptRecord {
                key: "s|1".into(),
                detail: "bad json".into(),
            },
            Error::MissingKey { key: "s|1".into() },
            Error::InvalidArgument("empty stream name".into()),
        ];
        for err in &others {
            assert!(!err.is_conflict(), "{err:?} should not be a conflict");
            assert!(err.conflict_kind().is_none());
        }
    }
}
