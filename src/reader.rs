//! Stream reader.
//!
//! [`StreamReader`] loads a stream's records after a given version, in ascending
//! version order, using the [`ReadLayout`] implied by the store's persistence
//! mode:
//!
//! - **Chained slices**: start at the slice named after the head version and
//!   follow each slice's `preceding_version` backward until the requested
//!   version is covered, then replay the collected slices oldest first. A slice
//!   that straddles the requested version is trimmed.
//! - **Bulk range**: request the per-event keys `from + 1 ..= head` in chunks of
//!   [`StoreConfig::bulk_chunk_size`] and sort each chunk by version (bulk reads
//!   are unordered).
//!
//! Readers take no locks and never write. Because the head is the last key an
//! append writes, a reader that sees head version `n` finds every record up to
//! `n`.

use std::sync::Arc;

use futures_core::Stream;
use metrics::counter;

use crate::codec;
use crate::config::StoreConfig;
use crate::error::Error;
use crate::kv::KvStore;
use crate::metrics::{EVENTS_LOADED_TOTAL, LOADS_TOTAL};
use crate::naming;
use crate::persistence::ReadLayout;
use crate::types::{EventRecord, LoadedStream, Slice, StreamHead};

/// Cloneable read handle over one store.
pub struct StreamReader<K> {
    kv: Arc<K>,
    config: Arc<StoreConfig>,
}

impl<K> Clone for StreamReader<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            config: Arc::clone(&self.config),
        }
    }
}

impl<K: KvStore> StreamReader<K> {
    /// Create a reader over `kv` using `config`.
    pub fn new(kv: Arc<K>, config: Arc<StoreConfig>) -> Self {
        Self { kv, config }
    }

    /// Current version of `stream`: 0 if it has never been appended to.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an invalid stream name.
    /// - [`Error::CorruptRecord`] if the head cannot be decoded.
    /// - [`Error::Backend`] for store failures.
    pub async fn version(&self, stream: &str) -> Result<u64, Error> {
        naming::validate_stream_name(stream)?;
        Ok(self.read_head(stream).await?.unwrap_or_default().version)
    }

    /// Load every record of `stream` with a version greater than `from_version`.
    ///
    /// Returns the records in ascending version order together with the resolved
    /// version: the last returned record's version, or the head version if no
    /// record is newer than `from_version`. A stream without a head loads as no
    /// records at version 0.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an invalid stream name.
    /// - [`Error::MissingKey`] if a key the head implies is absent.
    /// - [`Error::CorruptRecord`] if a stored value cannot be decoded or breaks
    ///   the slice chain.
    /// - [`Error::Backend`] for store failures.
    pub async fn load(&self, stream: &str, from_version: u64) -> Result<LoadedStream, Error> {
        naming::validate_stream_name(stream)?;

        let Some(head) = self.read_head(stream).await? else {
            tracing::debug!(stream, "no head; stream is empty");
            return Ok(LoadedStream::default());
        };

        let layout = self.config.mode.read_layout();
        let events = match layout {
            ReadLayout::ChainedSlices => self.load_chained(stream, head, from_version).await?,
            ReadLayout::BulkRange => {
                let mut events = Vec::new();
                for (first, last) in chunk_ranges(from_version, head.version, self.chunk_size()) {
                    events.extend(self.read_range(stream, first, last).await?);
                }
                events
            }
        };

        record_load(layout, events.len());
        tracing::debug!(
            stream,
            layout = layout.as_str(),
            from_version,
            head_version = head.version,
            loaded = events.len(),
            "loaded stream"
        );
        Ok(LoadedStream::resolve(events, head.version))
    }

    /// Stream the records of `stream` newer than `from_version`, in ascending
    /// version order.
    ///
    /// With a bulk-range layout each chunk is fetched only when the previous one
    /// has been consumed. With chained slices the backward walk has to finish
    /// before the oldest record is known, so the whole range is read up front
    /// and then yielded one record at a time.
    ///
    /// The stream ends after the first error.
    pub fn load_stream(
        &self,
        stream: &str,
        from_version: u64,
    ) -> impl Stream<Item = Result<EventRecord, Error>> + Send + 'static
    where
        K: 'static,
    {
        let reader = self.clone();
        let stream = stream.to_string();

        async_stream::try_stream! {
            naming::validate_stream_name(&stream)?;
            if let Some(head) = reader.read_head(&stream).await? {
                let layout = reader.config.mode.read_layout();
                let mut loaded = 0usize;
                match layout {
                    ReadLayout::ChainedSlices => {
                        for record in reader.load_chained(&stream, head, from_version).await? {
                            loaded += 1;
                            yield record;
                        }
                    }
                    ReadLayout::BulkRange => {
                        for (first, last) in chunk_ranges(from_version, head.version, reader.chunk_size()) {
                            for record in reader.read_range(&stream, first, last).await? {
                                loaded += 1;
                                yield record;
                            }
                        }
                    }
                }
                record_load(layout, loaded);
            }
        }
    }

    fn chunk_size(&self) -> u64 {
        self.config.bulk_chunk_size.get() as u64
    }

    async fn read_head(&self, stream: &str) -> Result<Option<StreamHead>, Error> {
        let key = naming::head_key(stream);
        let entry = self.kv.get(self.config.kv_request(), &key).await?;
        entry
            .value
            .map(|bytes| codec::decode_head(&key, &bytes))
            .transpose()
    }

    /// Walk slices backward from the head until `from_version` is covered.
    async fn load_chained(
        &self,
        stream: &str,
        head: StreamHead,
        from_version: u64,
    ) -> Result<Vec<EventRecord>, Error> {
        let request = self.config.kv_request();
        let mut collected: Vec<Vec<EventRecord>> = Vec::new();
        let mut next = head.version;

        while next != 0 && next > from_version {
            let key = naming::slice_key(stream, next);
            let entry = self.kv.get(request, &key).await?;
            let Some(bytes) = entry.value else {
                return Err(Error::MissingKey { key });
            };
            let Slice {
                preceding_version,
                records,
            } = checked_slice(&key, &bytes, next)?;

            tracing::trace!(
                stream,
                slice = %key,
                preceding_version,
                records = records.len(),
                "read slice"
            );

            if preceding_version < from_version {
                tracing::debug!(stream, slice = %key, from_version, "requested version within slice");
                collected.push(
                    records
                        .into_iter()
                        .filter(|r| r.version > from_version)
                        .collect(),
                );
                break;
            }
            collected.push(records);
            next = preceding_version;
        }

        Ok(collected.into_iter().rev().flatten().collect())
    }

    /// Bulk-read the per-event keys `first ..= last` and return them in order.
    async fn read_range(
        &self,
        stream: &str,
        first: u64,
        last: u64,
    ) -> Result<Vec<EventRecord>, Error> {
        let keys: Vec<String> = (first..=last)
            .map(|version| naming::event_key(stream, version))
            .collect();
        let entries = self.kv.get_bulk(self.config.kv_request(), &keys).await?;
        tracing::trace!(stream, first, last, found = entries.len(), "bulk read");

        let mut records = entries
            .iter()
            .map(|(key, bytes)| codec::decode_event(key, bytes))
            .collect::<Result<Vec<_>, Error>>()?;
        records.sort_by_key(|r| r.version);

        for (expected, record) in (first..=last).zip(&records) {
            if record.version > expected {
                return Err(Error::MissingKey {
                    key: naming::event_key(stream, expected),
                });
            }
            if record.version != expected {
                return Err(Error::CorruptRecord {
                    key: naming::event_key(stream, record.version),
                    detail: format!("expected version {expected}, found {}", record.version),
                });
            }
        }
        if let Some(missing) = (first..=last).nth(records.len()) {
            return Err(Error::MissingKey {
                key: naming::event_key(stream, missing),
            });
        }

        Ok(records)
    }
}

/// Decode a slice and check that it ends at the version its key names.
fn checked_slice(key: &str, bytes: &[u8], ending_version: u64) -> Result<Slice, Error> {
    let slice = codec::decode_slice(key, bytes)?;
    if slice.ending_version() != ending_version {
        return Err(Error::CorruptRecord {
            key: key.to_string(),
            detail: format!(
                "slice ends at version {} but is keyed as {ending_version}",
                slice.ending_version()
            ),
        });
    }
    Ok(slice)
}

/// Inclusive version ranges covering `from + 1 ..= head`, at most `chunk` long.
fn chunk_ranges(from_version: u64, head_version: u64, chunk: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    if from_version >= head_version {
        return ranges;
    }
    let mut first = from_version + 1;
    loop {
        let last = first.saturating_add(chunk - 1).min(head_version);
        ranges.push((first, last));
        if last == head_version {
            break;
        }
        first = last + 1;
    }
    ranges
}

fn record_load(layout: ReadLayout, loaded: usize) {
    counter!(LOADS_TOTAL, "layout" => layout.as_str()).increment(1);
    counter!(EVENTS_LOADED_TOTAL, "layout" => layout.as_str())
        .increment(loaded as u64);
}
