//! Command-line interface for xray.
//!
//! Provides the demo pipeline, offline-buffer sync, ingestion, and run and
//! step queries against a local run directory.

mod commands;
pub mod demo;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
