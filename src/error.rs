//! Error types for pipeline-xray operations.
//!
//! Defines the error types for each subsystem:
//! - Submission validation at the ingestion boundary
//! - Delivery of finalized runs and the offline retry area
//! - Transports that carry a run to the store
//! - Run storage backends
//! - Cross-run queries
//! - Configuration and setup

use std::time::Duration;

use thiserror::Error;

/// Errors raised when a run submission is malformed.
///
/// These are produced at the ingestion boundary, before a document ever
/// reaches the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Malformed run document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while a transport sends a run.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Server rejected run with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Submission rejected: {0}")]
    Validation(#[from] ValidationError),
}

/// Errors surfaced by delivery.
///
/// Only the `strict` policy ever returns a send failure to the caller; the
/// `buffer` and `drop` policies absorb it.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Failed to deliver run '{run_id}': {source}")]
    Transport {
        run_id: String,
        #[source]
        source: TransportError,
    },

    #[error("Delivery of run '{run_id}' timed out after {timeout:?}")]
    Timeout { run_id: String, timeout: Duration },

    #[error("Offline buffer IO error: {0}")]
    Buffer(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur inside a run store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),
}

/// Errors reported by the query engine.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Run '{0}' not found")]
    NotFound(String),

    #[error("Invalid filter '{field}': {reason}")]
    InvalidFilter { field: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by the ingestion endpoint.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while building configuration.
///
/// Configuration problems fail fast at setup time rather than per operation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unknown capture mode '{0}': must be 'full', 'sample', or 'none'")]
    UnknownCaptureMode(String),

    #[error("Unknown delivery policy '{0}': must be 'buffer', 'drop', or 'strict'")]
    UnknownDeliveryPolicy(String),
}
