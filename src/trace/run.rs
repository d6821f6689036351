//! Run recorder for one pipeline execution.
//!
//! The recorder owns the ordered step sequence of a run. Ending it seals the
//! run into an immutable [`Run`] and hands it to [`Delivery`] exactly once.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::delivery::Delivery;
use crate::error::DeliveryError;

use super::sampler::{Sampler, SamplingPolicy};
use super::step::StepRecorder;
use super::types::{duration_ms, CaptureMode, Metadata, Run, RunStatus, Step};

/// Generates a run identifier of the form `run_<12 hex chars>`.
pub fn generate_run_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("run_{}", &hex[..12])
}

/// Recorder for a pipeline run.
///
/// # Usage Pattern
///
/// 1. [`RunRecorder::begin`] (or [`Tracer::run`](super::Tracer::run))
/// 2. Record stages with [`RunRecorder::step`], or with
///    [`RunRecorder::begin_step`] + [`RunRecorder::attach`]
/// 3. Optionally [`RunRecorder::set_output`]
/// 4. [`RunRecorder::end`] on every exit path, passing the fault if the
///    pipeline failed
pub struct RunRecorder {
    run_id: String,
    pipeline: String,
    input: Value,
    output: Option<Value>,
    steps: Vec<Step>,
    metadata: Metadata,
    started_at: DateTime<Utc>,
    sampling: SamplingPolicy,
    seed: Option<u64>,
    steps_begun: u64,
    delivery: Arc<Delivery>,
    sealed: bool,
}

impl fmt::Debug for RunRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRecorder")
            .field("run_id", &self.run_id)
            .field("pipeline", &self.pipeline)
            .field("steps", &self.steps.len())
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

impl RunRecorder {
    /// Begins a run.
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Name of the instrumented pipeline
    /// * `input` - Input payload for this run
    /// * `run_id` - Caller-supplied identifier, generated when `None`
    /// * `delivery` - Where the finalized run is sent
    pub fn begin(
        pipeline: impl Into<String>,
        input: Value,
        run_id: Option<String>,
        delivery: Arc<Delivery>,
    ) -> Self {
        let run_id = run_id.unwrap_or_else(generate_run_id);
        let pipeline = pipeline.into();
        debug!(run_id = %run_id, pipeline = %pipeline, "Run started");

        Self {
            run_id,
            pipeline,
            input,
            output: None,
            steps: Vec::new(),
            metadata: Metadata::new(),
            started_at: Utc::now(),
            sampling: SamplingPolicy::default(),
            seed: None,
            steps_begun: 0,
            delivery,
            sealed: false,
        }
    }

    /// Sets the sampling policy used by steps begun from this run.
    pub fn with_sampling(mut self, sampling: SamplingPolicy) -> Self {
        self.sampling = sampling;
        self
    }

    /// Makes rejection sampling reproducible; each step derives its own seed.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Steps sealed so far, in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Begins a step wired to this run's sampling settings.
    ///
    /// The caller must [`attach`](Self::attach) the sealed step.
    pub fn begin_step(
        &mut self,
        name: impl Into<String>,
        step_type: Option<&str>,
        capture: CaptureMode,
    ) -> StepRecorder {
        let sampler = match self.seed {
            Some(seed) => Sampler::with_seed(
                capture,
                self.sampling,
                seed.wrapping_add(self.steps_begun),
            ),
            None => Sampler::new(capture, self.sampling),
        };
        self.steps_begun += 1;
        StepRecorder::with_sampler(name, step_type, sampler)
    }

    /// Appends a sealed step. Steps attached after the run ended are ignored.
    pub fn attach(&mut self, step: Step) {
        if self.sealed {
            warn!(
                run_id = %self.run_id,
                step = %step.name,
                "Ignoring step attached after run was sealed"
            );
            return;
        }
        self.steps.push(step);
    }

    /// Runs `body` as a step and attaches the sealed result.
    ///
    /// The step is sealed on both exit paths; an `Err` returned by `body` is
    /// written into the step's `error` field and then passed back unchanged.
    pub fn step<T, E, F>(
        &mut self,
        name: impl Into<String>,
        step_type: Option<&str>,
        capture: CaptureMode,
        body: F,
    ) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnOnce(&mut StepRecorder) -> Result<T, E>,
    {
        let mut recorder = self.begin_step(name, step_type, capture);
        let result = body(&mut recorder);
        let fault = result.as_ref().err().map(|e| e.to_string());
        self.attach(recorder.end(fault));
        result
    }

    /// Async counterpart of [`RunRecorder::step`].
    pub async fn step_async<T, E, F>(
        &mut self,
        name: impl Into<String>,
        step_type: Option<&str>,
        capture: CaptureMode,
        body: F,
    ) -> Result<T, E>
    where
        E: fmt::Display,
        F: for<'s> FnOnce(&'s mut StepRecorder) -> BoxFuture<'s, Result<T, E>>,
    {
        let mut recorder = self.begin_step(name, step_type, capture);
        let result = body(&mut recorder).await;
        let fault = result.as_ref().err().map(|e| e.to_string());
        self.attach(recorder.end(fault));
        result
    }

    /// Sets the final output of this run.
    pub fn set_output(&mut self, output: Value) {
        self.output = Some(output);
    }

    /// Adds metadata to this run; a repeated key overwrites.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Seals the run without delivering it.
    ///
    /// Returns `None` if the run was already sealed.
    pub fn finalize(&mut self, fault: Option<String>) -> Option<Run> {
        if self.sealed {
            return None;
        }
        self.sealed = true;

        let ended_at = Utc::now();
        let status = if fault.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        Some(Run {
            run_id: self.run_id.clone(),
            pipeline: self.pipeline.clone(),
            input: std::mem::take(&mut self.input),
            output: self.output.take(),
            status,
            error: fault,
            started_at: Some(self.started_at),
            ended_at: Some(ended_at),
            duration_ms: duration_ms(self.started_at, Some(ended_at)),
            steps: std::mem::take(&mut self.steps),
            metadata: std::mem::take(&mut self.metadata),
        })
    }

    /// Ends the run and delivers it.
    ///
    /// `fault` is the failure message when the pipeline's scope exited with an
    /// error. A second call is ignored and returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` only under the `strict` delivery policy.
    pub async fn end(&mut self, fault: Option<String>) -> Result<Option<Run>, DeliveryError> {
        let Some(run) = self.finalize(fault) else {
            warn!(run_id = %self.run_id, "Run already ended; ignoring second end");
            return Ok(None);
        };

        debug!(
            run_id = %run.run_id,
            status = %run.status,
            steps = run.steps.len(),
            duration_ms = ?run.duration_ms,
            "Run finalized"
        );

        self.delivery.deliver(&run).await?;
        Ok(Some(run))
    }
}

impl Drop for RunRecorder {
    fn drop(&mut self) {
        if !self.sealed && !std::thread::panicking() {
            warn!(
                run_id = %self.run_id,
                pipeline = %self.pipeline,
                "Run dropped without being ended; trace was not delivered"
            );
        }
    }
}
