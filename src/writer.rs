//! Append coordinator.
//!
//! [`Appender`] turns a caller's batch of proposed events into records with
//! contiguous versions and hands the batch to the store's [`PersistenceMode`].
//! There is no writer task and no in-process lock: every append reads the head
//! with its concurrency token and every write is conditioned on what was read,
//! so concurrent appenders (in this process or any other) resolve through the
//! backing store. At most one of several racing appends builds on a given head;
//! the others fail with a conflict and may retry.

use std::sync::Arc;

use metrics::counter;

use crate::codec;
use crate::config::StoreConfig;
use crate::error::Error;
use crate::kv::KvStore;
use crate::metrics::{APPENDS_TOTAL, APPEND_CONFLICTS_TOTAL, EVENTS_APPENDED_TOTAL};
use crate::naming;
use crate::persistence::PendingBatch;
use crate::policy::ExpectedVersion;
use crate::types::{MAX_EVENT_NAME_LEN, ProposedEvent, Slice, StreamHead};

/// Cloneable handle that appends batches to streams in one store.
///
/// Cloning shares the backend and configuration.
pub struct Appender<K> {
    kv: Arc<K>,
    config: Arc<StoreConfig>,
}

impl<K> Clone for Appender<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            config: Arc::clone(&self.config),
        }
    }
}

impl<K: KvStore> Appender<K> {
    /// Create an appender over `kv` using `config`.
    pub fn new(kv: Arc<K>, config: Arc<StoreConfig>) -> Self {
        Self { kv, config }
    }

    /// Append `events` to `stream`, in order, as one batch.
    ///
    /// The events receive versions `head + 1 ..= head + events.len()` where `head`
    /// is the stream's version when the append starts. Either the whole batch
    /// becomes visible or none of it does (in two-phase mode a lost head race can
    /// leave an unreachable orphaned slice behind, but never visible records).
    ///
    /// An empty `events` writes nothing and returns the current version without
    /// checking `expected`.
    ///
    /// # Arguments
    ///
    /// * `stream` - Target stream name.
    /// * `expected` - Optimistic concurrency check against the head.
    /// * `events` - Events to append, in order.
    ///
    /// # Returns
    ///
    /// The stream's new version (the version of the last appended event).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an invalid stream or event name.
    /// - [`Error::ConcurrencyConflict`] if `expected` does not match the head.
    /// - [`Error::DuplicateSlice`] if the key for the new ending version exists.
    /// - [`Error::TransactionConflict`] if an atomic write was rejected.
    /// - [`Error::HeadConflict`] if a two-phase head write lost the race.
    /// - [`Error::CorruptRecord`] if the stored head cannot be decoded.
    /// - [`Error::Backend`] for store failures.
    pub async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<u64, Error> {
        let result = self.try_append(stream, expected, events).await;
        if let Err(err) = &result {
            if let Some(kind) = err.conflict_kind() {
                counter!(APPEND_CONFLICTS_TOTAL, "kind" => kind).increment(1);
                tracing::warn!(stream, kind, error = %err, "append conflict");
            }
        }
        result
    }

    async fn try_append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<u64, Error> {
        naming::validate_stream_name(stream)?;
        validate_events(&events)?;

        let request = self.config.kv_request();
        let head_key = naming::head_key(stream);
        let entry = self.kv.get(request, &head_key).await?;
        let head = match &entry.value {
            Some(bytes) => codec::decode_head(&head_key, bytes)?,
            None => StreamHead::default(),
        };

        if events.is_empty() {
            tracing::debug!(stream, version = head.version, "empty append; nothing written");
            return Ok(head.version);
        }

        expected.check(stream, &head)?;

        let count = events.len() as u64;
        let new_version = head.version.checked_add(count).ok_or_else(|| {
            Error::InvalidArgument(format!("stream {stream} version would overflow"))
        })?;

        let records = codec::stamp_versions(head.version, events);
        let slice = Slice::from_records(records)
            .ok_or_else(|| Error::InvalidArgument("batch has no events".to_string()))?;

        let slice_key = naming::slice_key(stream, new_version);
        if self.kv.get(request, &slice_key).await?.value.is_some() {
            return Err(Error::DuplicateSlice { key: slice_key });
        }

        let mode = self.config.mode;
        let batch = PendingBatch {
            stream: stream.to_string(),
            head_key,
            head_token: entry.token,
            new_head: StreamHead {
                version: new_version,
            },
            slice_key,
            slice,
        };
        mode.persist(self.kv.as_ref(), request, &batch).await?;

        counter!(APPENDS_TOTAL, "mode" => mode.as_str()).increment(1);
        counter!(EVENTS_APPENDED_TOTAL, "mode" => mode.as_str()).increment(count);
        tracing::debug!(
            stream,
            mode = %mode,
            from_version = head.version,
            to_version = new_version,
            count,
            "appended events"
        );

        Ok(new_version)
    }
}

fn validate_events(events: &[ProposedEvent]) -> Result<(), Error> {
    for event in events {
        if event.name.is_empty() {
            return Err(Error::InvalidArgument(
                "event name must not be empty".to_string(),
            ));
        }
        if event.name.len() > MAX_EVENT_NAME_LEN {
            return Err(Error::InvalidArgument(format!(
                "event name is {} bytes, max {MAX_EVENT_NAME_LEN}",
                event.name.len()
            )));
        }
    }
    Ok(())
}
