//! pipeline-xray: trace recording and cross-run queries for multi-step pipelines.
//!
//! Instrumented pipelines record, per run, the ordered steps they executed,
//! which items each step rejected and why, what it accepted, and what it
//! decided. Finalized runs are delivered to a store and can be queried
//! across runs, e.g. "all filter steps that rejected more than 90% of input".

// Core modules
pub mod api;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod query;
pub mod store;
pub mod trace;

// Re-export commonly used types
pub use config::XRayConfig;
pub use error::{
    ConfigError, DeliveryError, IngestError, QueryError, StoreError, TransportError,
    ValidationError,
};
pub use trace::{CaptureMode, Run, RunRecorder, RunStatus, Step, StepRecorder, Tracer};
