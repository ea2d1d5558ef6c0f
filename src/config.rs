//! Store configuration and logging setup.
//!
//! A [`StoreConfig`] is handed to [`EventStore::new`](crate::EventStore::new) and
//! fixes, for the lifetime of the store, which state store to address, how
//! batches are persisted, and how many keys one bulk read may request. Nothing
//! here is process-global; two stores in one process can be configured
//! differently.

use std::num::NonZeroUsize;

use crate::kv::{KvRequest, Metadata};
use crate::persistence::PersistenceMode;
use crate::types::DEFAULT_BULK_CHUNK_SIZE;

/// Default state store name when `EVENTSLICE_STORE_NAME` is not set.
pub const DEFAULT_STORE_NAME: &str = "statestore";

/// Configuration of one [`EventStore`](crate::EventStore).
///
/// # Environment Variables
///
/// | Variable                     | Default        | Description                           |
/// |------------------------------|----------------|---------------------------------------|
/// | `EVENTSLICE_STORE_NAME`      | `statestore`   | Name of the backing state store       |
/// | `EVENTSLICE_MODE`            | `atomic-batch` | Persistence mode                      |
/// | `EVENTSLICE_BULK_CHUNK_SIZE` | `20`           | Keys per bulk read (nonzero)          |
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Name of the state store every call addresses.
    pub store_name: String,
    /// How appended batches are written (and therefore read).
    pub mode: PersistenceMode,
    /// Maximum keys requested by one bulk read.
    pub bulk_chunk_size: NonZeroUsize,
    /// Metadata forwarded with every store call.
    pub metadata: Metadata,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_name: DEFAULT_STORE_NAME.to_string(),
            mode: PersistenceMode::default(),
            bulk_chunk_size: default_chunk_size(),
            metadata: Metadata::new(),
        }
    }
}

impl StoreConfig {
    /// Default configuration using `mode`.
    pub fn new(mode: PersistenceMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Address a different state store.
    pub fn with_store_name(mut self, store_name: impl Into<String>) -> Self {
        self.store_name = store_name.into();
        self
    }

    /// Change how many keys one bulk read may request.
    pub fn with_bulk_chunk_size(mut self, chunk_size: NonZeroUsize) -> Self {
        self.bulk_chunk_size = chunk_size;
        self
    }

    /// Replace the metadata forwarded with every store call.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Parse configuration from environment variables, falling back to defaults
    /// for unset variables.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` naming the variable if:
    /// - `EVENTSLICE_STORE_NAME` is set but empty
    /// - `EVENTSLICE_MODE` is set but not a known mode
    /// - `EVENTSLICE_BULK_CHUNK_SIZE` is set but not a valid nonzero `usize`
    pub fn from_env() -> Result<StoreConfig, String> {
        let store_name = match std::env::var("EVENTSLICE_STORE_NAME") {
            Ok(val) if val.trim().is_empty() => {
                return Err("EVENTSLICE_STORE_NAME must not be empty".to_string());
            }
            Ok(val) => val,
            Err(_) => DEFAULT_STORE_NAME.to_string(),
        };

        let mode = match std::env::var("EVENTSLICE_MODE") {
            Ok(val) => val
                .parse::<PersistenceMode>()
                .map_err(|e| format!("EVENTSLICE_MODE is invalid: {e}"))?,
            Err(_) => PersistenceMode::default(),
        };

        let bulk_chunk_size = match std::env::var("EVENTSLICE_BULK_CHUNK_SIZE") {
            Ok(val) => {
                let raw: usize = val
                    .parse()
                    .map_err(|e| format!("EVENTSLICE_BULK_CHUNK_SIZE is not a valid usize: {e}"))?;
                NonZeroUsize::new(raw)
                    .ok_or_else(|| "EVENTSLICE_BULK_CHUNK_SIZE must be nonzero".to_string())?
            }
            Err(_) => default_chunk_size(),
        };

        Ok(StoreConfig {
            store_name,
            mode,
            bulk_chunk_size,
            metadata: Metadata::new(),
        })
    }

    /// Scope for store calls made under this configuration.
    pub(crate) fn kv_request(&self) -> KvRequest<'_> {
        KvRequest {
            store_name: &self.store_name,
            metadata: &self.metadata,
        }
    }
}

fn default_chunk_size() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_BULK_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN)
}

/// Initialize the global `tracing` subscriber with an `EnvFilter`.
///
/// Reads `RUST_LOG` to configure filtering and defaults to `"info"`. Uses
/// `try_init()` so repeated calls (e.g., across tests in the same process) are
/// a silent no-op.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Err only means a global subscriber is already installed.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
