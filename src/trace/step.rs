//! Step recorder for a single pipeline stage.
//!
//! A `StepRecorder` accumulates counts, payloads, rejections, acceptances and
//! decisions while a stage executes, then seals into an immutable [`Step`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::sampler::{Sampler, SamplingPolicy};
use super::types::{
    duration_ms, empty_details, rejection_rate, Acceptance, CaptureMode, Decision, Metadata,
    RejectionSample, Step,
};

/// Recorder for one step of a run.
///
/// Owned exclusively by the stage that is executing; sealing consumes it.
#[derive(Debug)]
pub struct StepRecorder {
    name: String,
    step_type: Option<String>,
    sampler: Sampler,
    input: Option<Value>,
    output: Option<Value>,
    input_count: Option<u64>,
    output_count: Option<u64>,
    sampled_rejections: Vec<RejectionSample>,
    acceptances: Vec<Acceptance>,
    decisions: Vec<Decision>,
    started_at: DateTime<Utc>,
    metadata: Metadata,
}

impl StepRecorder {
    /// Begins a step with the default sampling policy.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the step (e.g. "filter_candidates")
    /// * `step_type` - Optional type tag for cross-pipeline queries
    /// * `capture` - How much rejection detail to keep
    pub fn begin(name: impl Into<String>, step_type: Option<&str>, capture: CaptureMode) -> Self {
        Self::with_sampler(
            name,
            step_type,
            Sampler::new(capture, SamplingPolicy::default()),
        )
    }

    /// Begins a step that uses the given sampler for rejections.
    pub fn with_sampler(name: impl Into<String>, step_type: Option<&str>, sampler: Sampler) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.map(str::to_string),
            sampler,
            input: None,
            output: None,
            input_count: None,
            output_count: None,
            sampled_rejections: Vec::new(),
            acceptances: Vec::new(),
            decisions: Vec::new(),
            started_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_type(&self) -> Option<&str> {
        self.step_type.as_deref()
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.sampler.mode()
    }

    /// Sets the step input payload, replacing any previous value.
    pub fn set_input(&mut self, input: Value) {
        self.input = Some(input);
    }

    /// Sets the step output payload, replacing any previous value.
    pub fn set_output(&mut self, output: Value) {
        self.output = Some(output);
    }

    /// Sets the number of items entering this step.
    pub fn set_input_count(&mut self, count: u64) {
        self.input_count = Some(count);
    }

    /// Sets the number of items leaving this step.
    pub fn set_output_count(&mut self, count: u64) {
        self.output_count = Some(count);
    }

    /// Records that an item was rejected.
    ///
    /// The reason's count is always incremented; the sampler decides whether
    /// the item's details are retained.
    ///
    /// # Arguments
    ///
    /// * `item_id` - Identifier of the rejected item
    /// * `reason` - Reason code (e.g. "price_too_high")
    /// * `details` - Optional payload describing the rejection
    pub fn reject(&mut self, item_id: impl Into<String>, reason: &str, details: Option<Value>) {
        if !self.sampler.record(reason) {
            return;
        }

        self.sampled_rejections.push(RejectionSample {
            item_id: item_id.into(),
            reason: reason.to_string(),
            details: details.unwrap_or_else(empty_details),
            timestamp: Utc::now(),
        });
    }

    /// Records that an item was accepted. Acceptances are never sampled.
    pub fn accept(&mut self, item_id: impl Into<String>, reason: Option<&str>, details: Option<Value>) {
        self.acceptances.push(Acceptance {
            item_id: item_id.into(),
            reason: reason.map(str::to_string),
            details: details.unwrap_or_else(empty_details),
            timestamp: Utc::now(),
        });
    }

    /// Records a decision made in this step.
    pub fn decide(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }

    /// Adds metadata to this step; a repeated key overwrites.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Exact number of rejections recorded so far for `reason`.
    pub fn rejection_count(&self, reason: &str) -> u64 {
        self.sampler.count(reason)
    }

    /// Number of rejections retained in detail so far.
    pub fn sampled_count(&self) -> usize {
        self.sampled_rejections.len()
    }

    /// Seals the step.
    ///
    /// Stamps the end time and derives the duration and rejection rate.
    /// `error` carries the fault message when the stage did not complete.
    pub fn end(self, error: Option<String>) -> Step {
        let ended_at = Utc::now();

        Step {
            name: self.name,
            step_type: self.step_type,
            input: self.input,
            output: self.output,
            input_count: self.input_count,
            output_count: self.output_count,
            rejection_rate: rejection_rate(self.input_count, self.output_count),
            rejection_counts: self.sampler.into_counts(),
            sampled_rejections: self.sampled_rejections,
            acceptances: self.acceptances,
            decisions: self.decisions,
            started_at: Some(self.started_at),
            ended_at: Some(ended_at),
            duration_ms: duration_ms(self.started_at, Some(ended_at)),
            error,
            metadata: self.metadata,
        }
    }
}
