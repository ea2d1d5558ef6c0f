//! Boundary to the external key-value store.
//!
//! eventslice never talks to a concrete database. Everything it needs is expressed
//! by [`KvStore`]: a point read that returns a concurrency token, a conditional
//! put, an unordered bulk read, and a bounded all-or-nothing multi-key write.
//!
//! Conditions follow one rule everywhere: a write expecting `Some(token)` succeeds
//! only if the stored token equals it, and a write expecting `None` succeeds only
//! if the key is absent.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use bytes::Bytes;

/// Free-form key/value metadata forwarded with every store call (partition keys,
/// consistency hints and similar backend-specific settings).
pub type Metadata = BTreeMap<String, String>;

/// Opaque compare-and-swap token returned by point reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConcurrencyToken(String);

impl ConcurrencyToken {
    /// Wrap a backend-specific token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a point read.
///
/// Both fields are `None` when the key does not exist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvEntry {
    /// Stored value.
    pub value: Option<Bytes>,
    /// Token of the stored value.
    pub token: Option<ConcurrencyToken>,
}

/// One conditioned write inside an atomic transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOp {
    /// Key to write.
    pub key: String,
    /// Value to store.
    pub value: Bytes,
    /// Token the key must currently carry, or `None` if it must be absent.
    pub expected: Option<ConcurrencyToken>,
}

/// Store name and metadata that scope a single store call.
#[derive(Debug, Clone, Copy)]
pub struct KvRequest<'a> {
    /// Name of the state store (table, container, component) to address.
    pub store_name: &'a str,
    /// Metadata forwarded to the backend.
    pub metadata: &'a Metadata,
}

/// Failures reported by a [`KvStore`] implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KvError {
    /// The backend could not be reached or refused the call.
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// The transaction has more operations than the backend accepts.
    #[error("transaction with {ops} operations exceeds the backend limit of {max}")]
    TransactionTooLarge {
        /// Number of operations submitted.
        ops: usize,
        /// Maximum operations per transaction.
        max: usize,
    },

    /// Any other backend failure.
    #[error("state store error: {0}")]
    Other(String),
}

/// Minimal key-value store contract consumed by the append coordinator and the
/// stream reader.
///
/// A failed condition is not an error: `try_put` and `transact` report it as
/// `Ok(false)`. `Err` is reserved for backend failures, which eventslice passes
/// to its caller unchanged. Implementations must be shareable across tasks.
pub trait KvStore: Send + Sync {
    /// Read one key together with its concurrency token.
    fn get(
        &self,
        request: KvRequest<'_>,
        key: &str,
    ) -> impl Future<Output = Result<KvEntry, KvError>> + Send;

    /// Write one key if its current token matches `expected`.
    ///
    /// Returns `Ok(false)` when the condition fails.
    fn try_put(
        &self,
        request: KvRequest<'_>,
        key: &str,
        value: Bytes,
        expected: Option<&ConcurrencyToken>,
    ) -> impl Future<Output = Result<bool, KvError>> + Send;

    /// Read many keys at once. Absent keys are omitted and the result order is
    /// unspecified.
    fn get_bulk(
        &self,
        request: KvRequest<'_>,
        keys: &[String],
    ) -> impl Future<Output = Result<Vec<(String, Bytes)>, KvError>> + Send;

    /// Apply every operation or none of them.
    ///
    /// Returns `Ok(false)` when any operation's condition fails; nothing is
    /// written in that case.
    fn transact(
        &self,
        request: KvRequest<'_>,
        ops: Vec<TransactionOp>,
    ) -> impl Future<Output = Result<bool, KvError>> + Send;
}
