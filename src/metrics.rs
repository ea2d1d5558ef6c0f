//! Prometheus metrics for eventslice.
//!
//! Appends and loads emit counters through the `metrics` facade whether or not
//! a recorder is installed. A host that wants them scraped calls
//! [`install_recorder`] once and serves the rendered snapshot with
//! [`serve_metrics`] or [`serve_metrics_on_listener`].
//!
//! | Counter                               | Labels   | Incremented on                       |
//! |---------------------------------------|----------|--------------------------------------|
//! | `eventslice_appends_total`            | `mode`   | every successful non-empty append    |
//! | `eventslice_events_appended_total`    | `mode`   | by the number of events appended     |
//! | `eventslice_append_conflicts_total`   | `kind`   | every append failing with a conflict |
//! | `eventslice_loads_total`              | `layout` | every load of an existing stream     |
//! | `eventslice_events_loaded_total`      | `layout` | by the number of records loaded      |
//! | `eventslice_append_retries_total`     |          | every retry by `append_with_retry`   |

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use ::metrics::{Unit, describe_counter};
use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tokio::task::JoinHandle;

pub(crate) const APPENDS_TOTAL: &str = "eventslice_appends_total";
pub(crate) const EVENTS_APPENDED_TOTAL: &str = "eventslice_events_appended_total";
pub(crate) const APPEND_CONFLICTS_TOTAL: &str = "eventslice_append_conflicts_total";
pub(crate) const LOADS_TOTAL: &str = "eventslice_loads_total";
pub(crate) const EVENTS_LOADED_TOTAL: &str = "eventslice_events_loaded_total";
pub(crate) const APPEND_RETRIES_TOTAL: &str = "eventslice_append_retries_total";

/// Error type for metrics installation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The recorder has already been installed by this module.
    #[error("metrics recorder already installed")]
    AlreadyInstalled,

    /// Some other global recorder was set first.
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

/// Handle to the installed Prometheus recorder. Cheap to clone.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    inner: Arc<PrometheusHandle>,
}

impl MetricsHandle {
    /// Render the current snapshot in Prometheus exposition format.
    pub fn render(&self) -> String {
        self.inner.render()
    }
}

static RECORDER_HANDLE: OnceLock<MetricsHandle> = OnceLock::new();

/// Install the global Prometheus recorder and describe the eventslice counters.
///
/// # Errors
///
/// - [`MetricsError::AlreadyInstalled`] on every call after a successful one.
/// - [`MetricsError::Install`] if a different global recorder was already set.
///   Nothing is stored in that case.
pub fn install_recorder() -> Result<MetricsHandle, MetricsError> {
    install_into(&RECORDER_HANDLE, |recorder| {
        ::metrics::set_global_recorder(recorder).map_err(|_| {
            MetricsError::Install("another global recorder is already set".to_string())
        })
    })
}

fn install_into(
    slot: &OnceLock<MetricsHandle>,
    set_global: impl FnOnce(PrometheusRecorder) -> Result<(), MetricsError>,
) -> Result<MetricsHandle, MetricsError> {
    if slot.get().is_some() {
        return Err(MetricsError::AlreadyInstalled);
    }
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = MetricsHandle {
        inner: Arc::new(recorder.handle()),
    };
    if let Err(err) = set_global(recorder) {
        // A concurrent caller may have won the race through this module.
        return Err(if slot.get().is_some() {
            MetricsError::AlreadyInstalled
        } else {
            err
        });
    }
    slot.set(handle.clone())
        .map_err(|_| MetricsError::AlreadyInstalled)?;
    describe_counters();
    Ok(handle)
}

/// The handle installed by [`install_recorder`], if any.
pub fn get_installed_handle() -> Option<MetricsHandle> {
    RECORDER_HANDLE.get().cloned()
}

fn describe_counters() {
    describe_counter!(APPENDS_TOTAL, Unit::Count, "Successful non-empty appends.");
    describe_counter!(
        EVENTS_APPENDED_TOTAL,
        Unit::Count,
        "Events written by successful appends."
    );
    describe_counter!(
        APPEND_CONFLICTS_TOTAL,
        Unit::Count,
        "Appends that failed with a concurrency conflict."
    );
    describe_counter!(LOADS_TOTAL, Unit::Count, "Loads of existing streams.");
    describe_counter!(EVENTS_LOADED_TOTAL, Unit::Count, "Records returned by loads.");
    describe_counter!(
        APPEND_RETRIES_TOTAL,
        Unit::Count,
        "Appends retried after a conflict."
    );
}

fn metrics_router(handle: MetricsHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move {
                (
                    [(
                        axum::http::header::CONTENT_TYPE,
                        "text/plain; version=0.0.4",
                    )],
                    h.render(),
                )
            }
        }),
    )
}

/// Spawn an axum server answering `GET /metrics` on `addr`.
///
/// Bind failures are logged with `tracing::error!` and end the task.
pub fn serve_metrics(handle: MetricsHandle, addr: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "failed to bind metrics listener");
                return;
            }
        };
        run(handle, listener).await;
    })
}

/// Spawn an axum server answering `GET /metrics` on an already-bound listener.
pub fn serve_metrics_on_listener(
    handle: MetricsHandle,
    listener: tokio::net::TcpListener,
) -> JoinHandle<()> {
    tokio::spawn(run(handle, listener))
}

async fn run(handle: MetricsHandle, listener: tokio::net::TcpListener) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(addr = %addr, "metrics server listening"),
        Err(e) => tracing::warn!(error = %e, "metrics listener has no local address"),
    }
    if let Err(e) = axum::serve(listener, metrics_router(handle)).await {
        tracing::error!(error = %e, "metrics server error");
    }
}
