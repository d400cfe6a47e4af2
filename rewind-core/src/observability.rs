/*!
Observability for the snapshot store.

- Structured logging setup through `tracing-subscriber`
- Prometheus metrics per store operation and backend (feature `metrics`)

[`OperationTimer`] is always available so the store can time every operation
unconditionally; without the `metrics` feature it compiles down to nothing.
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::config::BackendKind;
use crate::{Result, StoreError};

/// Filter directive used when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVE: &str = "rewind=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<StoreMetrics>> = OnceLock::new();

/// Metrics collection for store operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct StoreMetrics {
    pub operations_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub operation_seconds: HistogramVec,
    pub snapshot_size_bytes: HistogramVec,
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl StoreMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();
        let labels = &["operation", "backend"];

        let operations_total = IntCounterVec::new(
            Opts::new(
                "rewind_store_operations_total",
                "Total snapshot store operations",
            ),
            labels,
        )
        .map_err(|e| StoreError::storage(format!("Failed to create operations_total metric: {e}")))?;

        let errors_total = IntCounterVec::new(
            Opts::new(
                "rewind_store_errors_total",
                "Total failed snapshot store operations",
            ),
            labels,
        )
        .map_err(|e| StoreError::storage(format!("Failed to create errors_total metric: {e}")))?;

        let operation_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rewind_store_operation_seconds",
                "Duration of snapshot store operations in seconds",
            ),
            labels,
        )
        .map_err(|e| {
            StoreError::storage(format!("Failed to create operation_seconds metric: {e}"))
        })?;

        let snapshot_size_bytes = HistogramVec::new(
            HistogramOpts::new(
                "rewind_snapshot_size_bytes",
                "Serialized size of saved snapshots in bytes",
            )
            .buckets(prometheus::exponential_buckets(256.0, 4.0, 10).unwrap_or_default()),
            &["backend"],
        )
        .map_err(|e| {
            StoreError::storage(format!("Failed to create snapshot_size_bytes metric: {e}"))
        })?;

        for collector in [
            Box::new(operations_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(errors_total.clone()),
            Box::new(operation_seconds.clone()),
            Box::new(snapshot_size_bytes.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| StoreError::storage(format!("Failed to register metric: {e}")))?;
        }

        Ok(Self {
            operations_total,
            errors_total,
            operation_seconds,
            snapshot_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> Option<&'static StoreMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Store metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    pub fn record_operation(&self, operation: &str, backend: &str, duration: std::time::Duration) {
        self.operations_total
            .with_label_values(&[operation, backend])
            .inc();
        self.operation_seconds
            .with_label_values(&[operation, backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_error(&self, operation: &str, backend: &str) {
        self.errors_total
            .with_label_values(&[operation, backend])
            .inc();
    }

    pub fn record_snapshot_size(&self, backend: &str, size_bytes: usize) {
        self.snapshot_size_bytes
            .with_label_values(&[backend])
            .observe(size_bytes as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| StoreError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| StoreError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Render the global registry, or an empty string when metrics are off
pub fn gather_metrics() -> Result<String> {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = StoreMetrics::global() {
        return metrics.gather_metrics();
    }
    Ok(String::new())
}

/// Times one store operation against one backend
#[derive(Debug)]
pub struct OperationTimer {
    operation: &'static str,
    backend: BackendKind,
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl OperationTimer {
    pub fn start(operation: &'static str, backend: BackendKind) -> Self {
        Self {
            operation,
            backend,
            #[cfg(feature = "metrics")]
            start: Instant::now(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Record the outcome of the timed operation
    pub fn finish<T>(self, result: &Result<T>) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = StoreMetrics::global() {
            let backend = self.backend.as_str();
            metrics.record_operation(self.operation, backend, self.start.elapsed());
            if result.is_err() {
                metrics.record_error(self.operation, backend);
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = (result, self.backend);
    }
}

/// Record the serialized size of a saved snapshot
pub fn record_snapshot_size(backend: BackendKind, size_bytes: usize) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = StoreMetrics::global() {
        metrics.record_snapshot_size(backend.as_str(), size_bytes);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (backend, size_bytes);
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over [`DEFAULT_LOG_DIRECTIVE`]. With `json`
/// set, events are written to stderr as JSON lines; otherwise as text.
pub fn init_observability(json: bool) -> Result<()> {
    init_observability_with(DEFAULT_LOG_DIRECTIVE, json)
}

/// Like [`init_observability`] with a caller-chosen fallback directive
pub fn init_observability_with(directive: &str, json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    StoreMetrics::global();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_current_span(false)
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    let subscriber = TracingRegistry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer);

    set_global_default(subscriber).map_err(|e| {
        StoreError::storage(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Rewind observability initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_without_error() {
        let timer = OperationTimer::start("save_snapshot", BackendKind::Memory);
        assert_eq!(timer.operation(), "save_snapshot");
        timer.finish(&Ok::<(), StoreError>(()));

        let timer = OperationTimer::start("get_snapshot", BackendKind::Memory);
        timer.finish(&Err::<(), _>(StoreError::storage("boom")));
        record_snapshot_size(BackendKind::Memory, 2048);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_gathering() {
        OperationTimer::start("query_snapshots", BackendKind::Indexed)
            .finish(&Ok::<(), StoreError>(()));

        let text = gather_metrics().unwrap();
        assert!(text.contains("rewind_store_operations_total"));
        assert!(text.contains("query_snapshots"));
    }

    #[cfg(not(feature = "metrics"))]
    #[test]
    fn test_gather_without_metrics_is_empty() {
        assert!(gather_metrics().unwrap().is_empty());
    }
}
