//! eventslice: event-sourcing streams on top of any key-value store that offers
//! conditional writes.
//!
//! Events are appended to named streams in batches, receive contiguous one-based
//! versions, and are replayed in order. Concurrency is optimistic: appends are
//! checked against an expected version and every write is conditioned on the
//! concurrency token it was read with, so racing writers resolve through the
//! store rather than through locks.

pub mod codec;
pub mod config;
pub mod error;
pub mod kv;
pub mod memory;
pub mod metrics;
pub mod naming;
pub mod persistence;
pub mod policy;
pub mod reader;
pub mod retry;
pub mod store;
pub mod types;
pub mod writer;

pub use config::{StoreConfig, init_tracing};
pub use error::Error;
pub use kv::{ConcurrencyToken, KvEntry, KvError, KvRequest, KvStore, Metadata, TransactionOp};
pub use memory::MemoryKv;
pub use persistence::{PersistenceMode, ReadLayout};
pub use policy::ExpectedVersion;
pub use reader::StreamReader;
pub use retry::RetryPolicy;
pub use store::EventStore;
pub use types::{
    DEFAULT_BULK_CHUNK_SIZE, EventRecord, LoadedStream, MAX_EVENT_NAME_LEN, ProposedEvent, Slice,
    StreamHead,
};
pub use writer::Appender;
