//! In-process implementation of the [`KvStore`] boundary.
//!
//! `MemoryKv` keeps every named store in a `HashMap` behind a mutex and hands out
//! a fresh token on every write. It honors the same conditions a real backend
//! does, caps transaction size, and counts calls so tests can assert exactly
//! which operations an append or load performed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::kv::{ConcurrencyToken, KvEntry, KvError, KvRequest, KvStore, Metadata, TransactionOp};

/// Snapshot of how many calls of each kind a [`MemoryKv`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Point reads.
    pub gets: u64,
    /// Conditional single-key writes.
    pub puts: u64,
    /// Bulk reads.
    pub bulk_gets: u64,
    /// Atomic transactions.
    pub transactions: u64,
}

impl CallCounts {
    /// Number of calls that can write (puts plus transactions).
    pub fn writes(&self) -> u64 {
        self.puts + self.transactions
    }
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    puts: AtomicU64,
    bulk_gets: AtomicU64,
    transactions: AtomicU64,
}

/// A stored value and the token it was written with.
#[derive(Debug, Clone)]
struct Stored {
    value: Bytes,
    token: u64,
}

#[derive(Debug, Default)]
struct State {
    /// Store name -> key -> value.
    stores: HashMap<String, HashMap<String, Stored>>,
    /// Last token handed out. Tokens are never reused.
    last_token: u64,
    /// Metadata seen on the most recent call.
    last_metadata: Metadata,
    /// Failure to return from the next call, if armed.
    fail_next: Option<KvError>,
}

impl State {
    fn next_token(&mut self) -> u64 {
        self.last_token += 1;
        self.last_token
    }

    fn begin(&mut self, request: KvRequest<'_>) -> Result<(), KvError> {
        self.last_metadata = request.metadata.clone();
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn matches(&self, store: &str, key: &str, expected: Option<&ConcurrencyToken>) -> bool {
        let current = self
            .stores
            .get(store)
            .and_then(|keys| keys.get(key))
            .map(|stored| stored.token);
        match (current, expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => current.to_string() == expected.as_str(),
            _ => false,
        }
    }

    fn write(&mut self, store: &str, key: &str, value: Bytes) {
        let token = self.next_token();
        self.stores
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), Stored { value, token });
    }
}

/// In-memory key-value store with conditional writes and atomic transactions.
///
/// Bulk reads return entries in reverse request order so callers cannot depend
/// on ordering.
#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<State>,
    max_transaction_ops: Option<usize>,
    counters: Counters,
}

impl MemoryKv {
    /// Create an empty store with no transaction size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject transactions with more than `max` operations, the way hosted
    /// backends cap multi-item writes.
    pub fn with_max_transaction_ops(mut self, max: usize) -> Self {
        self.max_transaction_ops = Some(max);
        self
    }

    /// Counts of calls served so far.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            gets: self.counters.gets.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            bulk_gets: self.counters.bulk_gets.load(Ordering::Relaxed),
            transactions: self.counters.transactions.load(Ordering::Relaxed),
        }
    }

    /// Make the next call of any kind fail with `err`.
    pub fn fail_next_call(&self, err: KvError) {
        self.lock().fail_next = Some(err);
    }

    /// Metadata forwarded by the most recent call.
    pub fn last_metadata(&self) -> Metadata {
        self.lock().last_metadata.clone()
    }

    /// Raw value stored under `key`, bypassing counters and conditions.
    pub fn raw_get(&self, store_name: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .stores
            .get(store_name)
            .and_then(|keys| keys.get(key))
            .map(|stored| stored.value.clone())
    }

    /// Store `value` under `key` unconditionally, bypassing counters.
    pub fn raw_put(&self, store_name: &str, key: &str, value: impl Into<Bytes>) {
        self.lock().write(store_name, key, value.into());
    }

    /// All keys in a store, sorted.
    pub fn keys(&self, store_name: &str) -> Vec<String> {
        let state = self.lock();
        let mut keys: Vec<String> = state
            .stores
            .get(store_name)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("MemoryKv mutex poisoned")
    }
}

impl KvStore for MemoryKv {
    async fn get(&self, request: KvRequest<'_>, key: &str) -> Result<KvEntry, KvError> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        state.begin(request)?;

        Ok(state
            .stores
            .get(request.store_name)
            .and_then(|keys| keys.get(key))
            .map(|stored| KvEntry {
                value: Some(stored.value.clone()),
                token: Some(ConcurrencyToken::new(stored.token.to_string())),
            })
            .unwrap_or_default())
    }

    async fn try_put(
        &self,
        request: KvRequest<'_>,
        key: &str,
        value: Bytes,
        expected: Option<&ConcurrencyToken>,
    ) -> Result<bool, KvError> {
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        state.begin(request)?;

        if !state.matches(request.store_name, key, expected) {
            return Ok(false);
        }
        state.write(request.store_name, key, value);
        Ok(true)
    }

    async fn get_bulk(
        &self,
        request: KvRequest<'_>,
        keys: &[String],
    ) -> Result<Vec<(String, Bytes)>, KvError> {
        self.counters.bulk_gets.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        state.begin(request)?;

        let Some(stored) = state.stores.get(request.store_name) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .rev()
            .filter_map(|key| stored.get(key).map(|s| (key.clone(), s.value.clone())))
            .collect())
    }

    async fn transact(
        &self,
        request: KvRequest<'_>,
        ops: Vec<TransactionOp>,
    ) -> Result<bool, KvError> {
        self.counters.transactions.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        state.begin(request)?;

        if let Some(max) = self.max_transaction_ops {
            if ops.len() > max {
                return Err(KvError::TransactionTooLarge {
                    ops: ops.len(),
                    max,
                });
            }
        }

        let all_match = ops
            .iter()
            .all(|op| state.matches(request.store_name, &op.key, op.expected.as_ref()));
        if !all_match {
            return Ok(false);
        }

        for op in ops {
            state.write(request.store_name, &op.key, op.value);
        }
        Ok(true)
    }
}
