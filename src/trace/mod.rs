//! Run and step recording for instrumented pipelines.
//!
//! This module provides the recording side of pipeline-xray:
//! - Data types for runs, steps, rejections, acceptances and decisions
//! - Per-reason bounded sampling of rejected items
//! - Step and run recorders that seal into immutable documents
//! - A `Tracer` that creates runs bound to a delivery channel
//!
//! # Example
//!
//! ```ignore
//! use pipeline_xray::trace::{CaptureMode, Tracer};
//!
//! let tracer = Tracer::from_config("competitor_selection", &config)?;
//! let mut run = tracer.run(json!({"title": "phone case"}), None);
//! run.step("filter", Some("filter"), CaptureMode::Sample, |step| {
//!     step.set_input_count(10);
//!     step.reject("item_3", "price_too_high", None);
//!     step.set_output_count(9);
//!     Ok::<_, String>(())
//! })?;
//! run.end(None).await?;
//! ```

pub mod run;
pub mod sampler;
pub mod step;
pub mod tracer;
pub mod types;

pub use run::{generate_run_id, RunRecorder};
pub use sampler::{
    RandomSource, Sampler, SamplingPolicy, DEFAULT_SAMPLE_RATE, MAX_SAMPLES_PER_REASON,
    MIN_SAMPLES_PER_REASON,
};
pub use step::StepRecorder;
pub use tracer::{TraceError, Tracer};
pub use types::{
    rejection_rate, Acceptance, Alternative, CaptureMode, Decision, Metadata, RejectionSample,
    Run, RunStatus, Step,
};
