//! Prometheus metrics registration and export.
//!
//! Defines the counters pipeline-xray maintains for delivery, reconciliation,
//! ingestion and rejection volume, and exports them in text format.

use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus registry for all pipeline-xray metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finalized runs handed to delivery, labeled by policy and outcome.
pub static DELIVERIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Buffered runs retried by reconciliation, labeled by result.
pub static RECONCILE_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Runs accepted by the ingestion endpoint.
pub static RUNS_INGESTED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Rejections counted across all ingested steps.
pub static STEP_REJECTIONS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Serializes initialization so the registry and the metric statics always
/// come from the same call.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless; later calls keep the metrics that
/// were installed first.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let deliveries_total = CounterVec::new(
        Opts::new("xray_deliveries_total", "Finalized runs handed to delivery"),
        &["policy", "outcome"],
    )?;

    let reconcile_total = CounterVec::new(
        Opts::new(
            "xray_reconcile_total",
            "Buffered runs retried by reconciliation",
        ),
        &["result"],
    )?;

    let runs_ingested_total = Counter::new(
        "xray_runs_ingested_total",
        "Runs accepted by the ingestion endpoint",
    )?;

    let step_rejections_total = Counter::new(
        "xray_step_rejections_total",
        "Rejections counted across all ingested steps",
    )?;

    registry.register(Box::new(deliveries_total.clone()))?;
    registry.register(Box::new(reconcile_total.clone()))?;
    registry.register(Box::new(runs_ingested_total.clone()))?;
    registry.register(Box::new(step_rejections_total.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = DELIVERIES_TOTAL.set(deliveries_total);
    let _ = RECONCILE_TOTAL.set(reconcile_total);
    let _ = RUNS_INGESTED_TOTAL.set(runs_ingested_total);
    let _ = STEP_REJECTIONS_TOTAL.set(step_rejections_total);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Handler body for a `/metrics` endpoint mounted by the hosting server.
pub async fn metrics_handler() -> String {
    export_metrics()
}
