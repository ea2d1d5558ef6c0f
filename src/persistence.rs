//! Persistence strategies for a versioned batch.
//!
//! A store is built with exactly one [`PersistenceMode`]. The mode decides how the
//! append coordinator writes a batch and, through [`ReadLayout`], how the reader
//! finds it again:
//!
//! | Mode          | Keys written                     | Atomicity          | Read layout      |
//! |---------------|----------------------------------|--------------------|------------------|
//! | `AtomicBatch` | one key per event + head         | one transaction    | `BulkRange`      |
//! | `AtomicSlice` | one slice key + head             | one transaction    | `ChainedSlices`  |
//! | `TwoPhase`    | slice key, then head             | two conditional puts | `ChainedSlices` |
//!
//! The head is always the last key written, so readers never see a head that
//! points past durable records.

use std::fmt;
use std::str::FromStr;

use crate::codec;
use crate::error::Error;
use crate::kv::{ConcurrencyToken, KvRequest, KvStore, TransactionOp};
use crate::naming;
use crate::types::{Slice, StreamHead};

/// How a batch of records is written to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistenceMode {
    /// One transaction writing every event under its own key plus the head.
    /// Requires multi-key transactions; read back with bulk range reads.
    #[default]
    AtomicBatch,
    /// One transaction writing the whole batch under one slice key plus the head.
    AtomicSlice,
    /// A create-only put of the slice followed by a conditional put of the head.
    /// Needs no transactions; a lost head race leaves an orphaned slice.
    TwoPhase,
}

/// How the reader traverses a stream written by a given mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLayout {
    /// Walk slices backward from the head.
    ChainedSlices,
    /// Bulk-read one key per version, forward.
    BulkRange,
}

impl ReadLayout {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ReadLayout::ChainedSlices => "chained_slices",
            ReadLayout::BulkRange => "bulk_range",
        }
    }
}

impl PersistenceMode {
    /// Layout the reader must use for streams written in this mode.
    pub fn read_layout(self) -> ReadLayout {
        match self {
            PersistenceMode::AtomicBatch => ReadLayout::BulkRange,
            PersistenceMode::AtomicSlice | PersistenceMode::TwoPhase => ReadLayout::ChainedSlices,
        }
    }

    /// Stable name, also accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            PersistenceMode::AtomicBatch => "atomic-batch",
            PersistenceMode::AtomicSlice => "atomic-slice",
            PersistenceMode::TwoPhase => "two-phase",
        }
    }

    /// Write `batch` using this mode.
    ///
    /// # Errors
    ///
    /// - [`Error::TransactionConflict`] if an atomic transaction is rejected.
    /// - [`Error::DuplicateSlice`] if the two-phase slice write finds the key taken.
    /// - [`Error::HeadConflict`] if the two-phase head write loses the race.
    /// - [`Error::Backend`] for store failures.
    pub(crate) async fn persist<K: KvStore>(
        self,
        kv: &K,
        request: KvRequest<'_>,
        batch: &PendingBatch,
    ) -> Result<(), Error> {
        match self {
            PersistenceMode::AtomicBatch => atomic_batch(kv, request, batch).await,
            PersistenceMode::AtomicSlice => atomic_slice(kv, request, batch).await,
            PersistenceMode::TwoPhase => two_phase(kv, request, batch).await,
        }
    }
}

impl fmt::Display for PersistenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic-batch" | "atomic_batch" => Ok(PersistenceMode::AtomicBatch),
            "atomic-slice" | "atomic_slice" => Ok(PersistenceMode::AtomicSlice),
            "two-phase" | "two_phase" => Ok(PersistenceMode::TwoPhase),
            other => Err(format!(
                "unknown persistence mode {other:?} (expected atomic-batch, atomic-slice or two-phase)"
            )),
        }
    }
}

/// A versioned batch ready to be written, with the head state it was built on.
#[derive(Debug)]
pub(crate) struct PendingBatch {
    /// Stream name.
    pub stream: String,
    /// Head key of the stream.
    pub head_key: String,
    /// Token the head was read with; `None` if the stream had no head.
    pub head_token: Option<ConcurrencyToken>,
    /// Head to write once the records are in place.
    pub new_head: StreamHead,
    /// Key named after the batch's ending version.
    pub slice_key: String,
    /// The stamped records.
    pub slice: Slice,
}

impl PendingBatch {
    fn head_op(&self) -> Result<TransactionOp, Error> {
        Ok(TransactionOp {
            key: self.head_key.clone(),
            value: codec::encode_head(&self.new_head)?,
            expected: self.head_token.clone(),
        })
    }

    fn transaction_rejected(&self) -> Error {
        Error::TransactionConflict {
            stream: self.stream.clone(),
        }
    }
}

async fn atomic_batch<K: KvStore>(
    kv: &K,
    request: KvRequest<'_>,
    batch: &PendingBatch,
) -> Result<(), Error> {
    let mut ops = batch
        .slice
        .records
        .iter()
        .map(|record| {
            Ok(TransactionOp {
                key: naming::event_key(&batch.stream, record.version),
                value: codec::encode_event(record)?,
                expected: None,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    ops.push(batch.head_op()?);

    if kv.transact(request, ops).await? {
        Ok(())
    } else {
        Err(batch.transaction_rejected())
    }
}

async fn atomic_slice<K: KvStore>(
    kv: &K,
    request: KvRequest<'_>,
    batch: &PendingBatch,
) -> Result<(), Error> {
    let ops = vec![
        TransactionOp {
            key: batch.slice_key.clone(),
            value: codec::encode_slice(&batch.slice)?,
            expected: None,
        },
        batch.head_op()?,
    ];

    if kv.transact(request, ops).await? {
        Ok(())
    } else {
        Err(batch.transaction_rejected())
    }
}

async fn two_phase<K: KvStore>(
    kv: &K,
    request: KvRequest<'_>,
    batch: &PendingBatch,
) -> Result<(), Error> {
    let slice_bytes = codec::encode_slice(&batch.slice)?;
    if !kv.try_put(request, &batch.slice_key, slice_bytes, None).await? {
        return Err(Error::DuplicateSlice {
            key: batch.slice_key.clone(),
        });
    }

    let head_bytes = codec::encode_head(&batch.new_head)?;
    if !kv
        .try_put(request, &batch.head_key, head_bytes, batch.head_token.as_ref())
        .await?
    {
        // No rollback: the next writer to claim this version sees DuplicateSlice,
        // and readers never reach the slice because the head does not point at it.
        tracing::warn!(
            stream = %batch.stream,
            orphaned_slice = %batch.slice_key,
            "two-phase head write lost the race; slice left orphaned"
        );
        return Err(Error::HeadConflict {
            key: batch.head_key.clone(),
            orphaned_slice: batch.slice_key.clone(),
        });
    }

    Ok(())
}
