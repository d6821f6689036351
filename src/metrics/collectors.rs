//! Recording facade over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! been called, so library users who never export metrics pay nothing.

use super::prometheus::{
    DELIVERIES_TOTAL, RECONCILE_TOTAL, RUNS_INGESTED_TOTAL, STEP_REJECTIONS_TOTAL,
};

/// Metrics collector for recording pipeline-xray operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record the outcome of handing one run to delivery.
    ///
    /// # Arguments
    ///
    /// * `policy` - Active delivery policy ("buffer", "drop", "strict")
    /// * `outcome` - What happened ("delivered", "buffered", "dropped", "failed")
    pub fn record_delivery(&self, policy: &str, outcome: &str) {
        if let Some(deliveries) = DELIVERIES_TOTAL.get() {
            deliveries.with_label_values(&[policy, outcome]).inc();
        }

        tracing::trace!(policy = policy, outcome = outcome, "Recorded delivery metric");
    }

    /// Record one reconciliation pass.
    pub fn record_reconcile(&self, synced: usize, failed: usize) {
        if let Some(reconcile) = RECONCILE_TOTAL.get() {
            reconcile
                .with_label_values(&["synced"])
                .inc_by(synced as f64);
            reconcile
                .with_label_values(&["failed"])
                .inc_by(failed as f64);
        }

        tracing::trace!(synced = synced, failed = failed, "Recorded reconcile metric");
    }

    /// Record an ingested run and the rejections its steps counted.
    pub fn record_ingest(&self, rejections: u64) {
        if let Some(ingested) = RUNS_INGESTED_TOTAL.get() {
            ingested.inc();
        }

        if let Some(total) = STEP_REJECTIONS_TOTAL.get() {
            total.inc_by(rejections as f64);
        }
    }
}
