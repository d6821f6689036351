//! Metrics module for Prometheus-based monitoring.
//!
//! Counts deliveries by policy and outcome, reconciliation results, and
//! ingested runs and rejections.
//!
//! # Example
//!
//! ```ignore
//! use pipeline_xray::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_delivery("buffer", "delivered");
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics, metrics_handler};

pub use self::prometheus::{
    DELIVERIES_TOTAL, RECONCILE_TOTAL, REGISTRY, RUNS_INGESTED_TOTAL, STEP_REJECTIONS_TOTAL,
};
