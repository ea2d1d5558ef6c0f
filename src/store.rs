//! Event store facade.
//!
//! [`EventStore`] binds one [`KvStore`] backend to one [`StoreConfig`] and exposes
//! the append and load operations of the crate. It is a cheap, cloneable handle:
//! every clone shares the backend, and any number of handles (in this process or
//! others) may append to the same stream concurrently.

use std::sync::Arc;

use futures_core::Stream;
use metrics::counter;

use crate::config::StoreConfig;
use crate::error::Error;
use crate::kv::{KvStore, Metadata};
use crate::metrics::APPEND_RETRIES_TOTAL;
use crate::policy::ExpectedVersion;
use crate::reader::StreamReader;
use crate::retry::RetryPolicy;
use crate::types::{EventRecord, LoadedStream, ProposedEvent};
use crate::writer::Appender;

/// Event-sourcing stream store over a key-value backend.
///
/// # Example
///
/// ```
/// # tokio_test_block_on(async {
/// use eventslice::{EventStore, ExpectedVersion, MemoryKv, ProposedEvent, StoreConfig};
/// use serde_json::json;
///
/// let store = EventStore::new(MemoryKv::new(), StoreConfig::default());
/// let version = store
///     .append("cart-1", ExpectedVersion::NoStream, vec![
///         ProposedEvent::new("ItemAdded", json!({ "sku": "A-1" })),
///     ])
///     .await?;
/// assert_eq!(version, 1);
///
/// let loaded = store.load("cart-1", 0).await?;
/// assert_eq!(loaded.events.len(), 1);
/// # Ok::<(), eventslice::Error>(())
/// # }).unwrap();
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct EventStore<K> {
    kv: Arc<K>,
    config: Arc<StoreConfig>,
    appender: Appender<K>,
    reader: StreamReader<K>,
}

impl<K> Clone for EventStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            config: Arc::clone(&self.config),
            appender: self.appender.clone(),
            reader: self.reader.clone(),
        }
    }
}

impl<K: KvStore> EventStore<K> {
    /// Create a store that owns `kv`.
    pub fn new(kv: K, config: StoreConfig) -> Self {
        Self::from_arc(Arc::new(kv), config)
    }

    /// Create a store over a backend shared with other handles.
    pub fn from_arc(kv: Arc<K>, config: StoreConfig) -> Self {
        let config = Arc::new(config);
        tracing::debug!(
            store_name = %config.store_name,
            mode = %config.mode,
            bulk_chunk_size = config.bulk_chunk_size.get(),
            "event store created"
        );
        Self {
            appender: Appender::new(Arc::clone(&kv), Arc::clone(&config)),
            reader: StreamReader::new(Arc::clone(&kv), Arc::clone(&config)),
            kv,
            config,
        }
    }

    /// Configuration this store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The backend this store writes to.
    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }

    /// Append-only handle sharing this store's backend and configuration.
    pub fn appender(&self) -> Appender<K> {
        self.appender.clone()
    }

    /// Read-only handle sharing this store's backend and configuration.
    pub fn reader(&self) -> StreamReader<K> {
        self.reader.clone()
    }

    /// A handle on the same backend that forwards `metadata` with every call
    /// instead of the configured metadata.
    pub fn with_metadata(&self, metadata: Metadata) -> Self {
        let config = StoreConfig {
            metadata,
            ..(*self.config).clone()
        };
        Self::from_arc(Arc::clone(&self.kv), config)
    }

    /// Append `events` to `stream` as one batch. See [`Appender::append`].
    ///
    /// # Errors
    ///
    /// See [`Appender::append`].
    pub async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<u64, Error> {
        self.appender.append(stream, expected, events).await
    }

    /// Append without a version check. The head write is still conditional, so
    /// a concurrent append fails this one rather than being overwritten.
    ///
    /// # Errors
    ///
    /// See [`Appender::append`].
    pub async fn append_any(&self, stream: &str, events: Vec<ProposedEvent>) -> Result<u64, Error> {
        self.appender
            .append(stream, ExpectedVersion::Any, events)
            .await
    }

    /// Load the records of `stream` newer than `from_version`. See
    /// [`StreamReader::load`].
    ///
    /// # Errors
    ///
    /// See [`StreamReader::load`].
    pub async fn load(&self, stream: &str, from_version: u64) -> Result<LoadedStream, Error> {
        self.reader.load(stream, from_version).await
    }

    /// Stream the records of `stream` newer than `from_version`. See
    /// [`StreamReader::load_stream`].
    pub fn load_stream(
        &self,
        stream: &str,
        from_version: u64,
    ) -> impl Stream<Item = Result<EventRecord, Error>> + Send + 'static
    where
        K: 'static,
    {
        self.reader.load_stream(stream, from_version)
    }

    /// Current version of `stream`; 0 if it has never been appended to.
    ///
    /// # Errors
    ///
    /// See [`StreamReader::version`].
    pub async fn version(&self, stream: &str) -> Result<u64, Error> {
        self.reader.version(stream).await
    }

    /// Append with read-and-retry on conflict.
    ///
    /// Each attempt reads the current version, calls `build(version)` for the
    /// batch to append on top of it, and appends with
    /// [`ExpectedVersion::Exact`]. Conflict errors are retried up to
    /// `policy.max_attempts` attempts in total, sleeping
    /// [`RetryPolicy::delay_for`] between attempts. Any other error, or the
    /// last attempt's conflict, is returned as-is.
    ///
    /// # Errors
    ///
    /// See [`Appender::append`].
    pub async fn append_with_retry<F>(
        &self,
        stream: &str,
        policy: &RetryPolicy,
        mut build: F,
    ) -> Result<u64, Error>
    where
        F: FnMut(u64) -> Vec<ProposedEvent>,
    {
        let max_attempts = policy.attempts();
        let mut attempt = 1;
        loop {
            let current = self.reader.version(stream).await?;
            let events = build(current);
            match self
                .appender
                .append(stream, ExpectedVersion::Exact(current), events)
                .await
            {
                Err(err) if err.is_conflict() && attempt < max_attempts => {
                    let delay = policy.delay_for(attempt);
                    counter!(APPEND_RETRIES_TOTAL).increment(1);
                    tracing::warn!(
                        stream,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "append conflict; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use futures::StreamExt;
    use serde_json::json;

    use crate::kv::{ConcurrencyToken, KvEntry, KvError, KvRequest, TransactionOp};
    use crate::memory::MemoryKv;
    use crate::persistence::PersistenceMode;

    fn tick(i: u64) -> ProposedEvent {
        ProposedEvent::new("Tick", json!({ "i": i }))
    }

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let store = EventStore::new(MemoryKv::new(), StoreConfig::default());
        let version = store
            .append("s", ExpectedVersion::NoStream, vec![tick(1), tick(2)])
            .await
            .expect("append");
        assert_eq!(version, 2);

        let loaded = store.load("s", 0).await.expect("load");
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.events[1].payload, json!({ "i": 2 }));
        assert_eq!(store.version("s").await.expect("version"), 2);
    }

    #[tokio::test]
    async fn append_any_skips_version_check() {
        let store = EventStore::new(MemoryKv::new(), StoreConfig::default());
        store.append_any("s", vec![tick(1)]).await.expect("first");
        let version = store.append_any("s", vec![tick(2)]).await.expect("second");
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn clones_share_the_backend() {
        let store = EventStore::new(MemoryKv::new(), StoreConfig::default());
        let other = store.clone();
        store.append_any("s", vec![tick(1)]).await.expect("append");
        assert_eq!(other.version("s").await.expect("version"), 1);
        let version = store
            .appender()
            .append("s", ExpectedVersion::Exact(1), vec![tick(2)])
            .await
            .expect("append");
        assert_eq!(version, 2);
        assert_eq!(store.reader().version("s").await.expect("version"), 2);
    }

    #[tokio::test]
    async fn with_metadata_overrides_forwarded_metadata() {
        let kv = Arc::new(MemoryKv::new());
        let mut base = Metadata::new();
        base.insert("partitionKey".into(), "base".into());
        let store = EventStore::from_arc(Arc::clone(&kv), StoreConfig::default().with_metadata(base));

        let mut tenant = Metadata::new();
        tenant.insert("partitionKey".into(), "tenant-9".into());
        let scoped = store.with_metadata(tenant);
        scoped.append_any("s", vec![tick(1)]).await.expect("append");
        assert_eq!(
            kv.last_metadata().get("partitionKey").map(String::as_str),
            Some("tenant-9")
        );
        assert_eq!(scoped.config().mode, store.config().mode);

        store.version("s").await.expect("version");
        assert_eq!(
            kv.last_metadata().get("partitionKey").map(String::as_str),
            Some("base")
        );
    }

    #[tokio::test]
    async fn load_stream_yields_in_order() {
        let store = EventStore::new(
            MemoryKv::new(),
            StoreConfig::new(PersistenceMode::AtomicSlice),
        );
        store.append_any("s", vec![tick(1), tick(2)]).await.expect("a");
        store.append_any("s", vec![tick(3)]).await.expect("b");

        let versions: Vec<u64> = store
            .load_stream("s", 1)
            .map(|r| r.expect("record").version)
            .collect()
            .await;
        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn append_with_retry_builds_on_current_version() {
        let store = EventStore::new(MemoryKv::new(), StoreConfig::default());
        store.append_any("s", vec![tick(1), tick(2)]).await.expect("seed");

        let mut seen = Vec::new();
        let version = store
            .append_with_retry("s", &RetryPolicy::default(), |current| {
                seen.push(current);
                vec![tick(current + 1)]
            })
            .await
            .expect("append");
        assert_eq!(version, 3);
        assert_eq!(seen, vec![2]);
    }

    /// Backend whose first `races` head reads are each followed by a
    /// competing append that bumps the head by one.
    struct ContendedKv {
        inner: MemoryKv,
        races: AtomicU32,
    }

    impl KvStore for ContendedKv {
        async fn get(&self, request: KvRequest<'_>, key: &str) -> Result<KvEntry, KvError> {
            let entry = self.inner.get(request, key).await?;
            let raced = key.ends_with("|head")
                && self
                    .races
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if raced {
                let version = entry
                    .value
                    .as_ref()
                    .and_then(|b| crate::codec::decode_head(key, b).ok())
                    .map_or(0, |h| h.version);
                let bumped = format!(r#"{{"Version":{}}}"#, version + 1);
                self.inner.raw_put(request.store_name, key, bumped);
            }
            Ok(entry)
        }

        async fn try_put(
            &self,
            request: KvRequest<'_>,
            key: &str,
            value: Bytes,
            expected: Option<&ConcurrencyToken>,
        ) -> Result<bool, KvError> {
            self.inner.try_put(request, key, value, expected).await
        }

        async fn get_bulk(
            &self,
            request: KvRequest<'_>,
            keys: &[String],
        ) -> Result<Vec<(String, Bytes)>, KvError> {
            self.inner.get_bulk(request, keys).await
        }

        async fn transact(
            &self,
            request: KvRequest<'_>,
            ops: Vec<TransactionOp>,
        ) -> Result<bool, KvError> {
            self.inner.transact(request, ops).await
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[tokio::test]
    async fn append_with_retry_recovers_from_conflicts() {
        // The version read bumps the head, so the first append sees a stale
        // expectation and the second read sees the bumped version.
        let kv = ContendedKv {
            inner: MemoryKv::new(),
            races: AtomicU32::new(1),
        };
        let store = EventStore::new(kv, StoreConfig::new(PersistenceMode::TwoPhase));

        let mut seen = Vec::new();
        let version = store
            .append_with_retry("s", &fast_policy(3), |current| {
                seen.push(current);
                vec![tick(current + 1)]
            })
            .await
            .expect("append should succeed on retry");
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn append_with_retry_gives_up_after_max_attempts() {
        let kv = ContendedKv {
            inner: MemoryKv::new(),
            races: AtomicU32::new(u32::MAX),
        };
        let store = EventStore::new(kv, StoreConfig::default());

        let mut attempts = 0;
        let err = store
            .append_with_retry("s", &fast_policy(3), |current| {
                attempts += 1;
                vec![tick(current + 1)]
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "got: {err:?}");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn append_with_retry_does_not_retry_other_errors() {
        let store = EventStore::new(MemoryKv::new(), StoreConfig::default());

        let mut attempts = 0;
        let err = store
            .append_with_retry("s", &fast_policy(5), |_| {
                attempts += 1;
                vec![ProposedEvent::new("", json!(null))]
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "got: {err:?}");
        assert_eq!(attempts, 1);
    }
}
