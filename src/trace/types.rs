//! Trace data types for pipeline run recording.
//!
//! This module defines the run/step document format that the recorders
//! produce, delivery ships, and the store indexes for queries.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ValidationError};

/// Free-form key/value metadata attached to runs and steps.
pub type Metadata = BTreeMap<String, Value>;

/// Returns the empty-object payload used when a caller supplies no details.
pub fn empty_details() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A complete trace of one pipeline execution.
///
/// Runs are mutable only inside a [`RunRecorder`](super::RunRecorder); once
/// finalized they are handed around as immutable values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run.
    pub run_id: String,

    /// Name of the instrumented pipeline.
    pub pipeline: String,

    /// Input payload the pipeline was started with.
    #[serde(default)]
    pub input: Value,

    /// Final output payload, if the pipeline produced one.
    #[serde(default)]
    pub output: Option<Value>,

    /// Lifecycle status of the run.
    #[serde(default = "RunStatus::submitted")]
    pub status: RunStatus,

    /// Fault message when the run failed.
    #[serde(default)]
    pub error: Option<String>,

    /// When the run began.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the run was finalized.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,

    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<i64>,

    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Free-form run metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Run {
    /// Number of steps recorded in this run.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Looks up a step by name (first match in execution order).
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is still being recorded.
    Running,

    /// The run's scope exited normally.
    Completed,

    /// The run's scope exited with a fault.
    Failed,
}

impl RunStatus {
    /// Status assumed for submitted documents that omit one.
    pub fn submitted() -> Self {
        RunStatus::Completed
    }

    /// Stable string form used in filters and labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(ValidationError::InvalidField {
                field: "status".to_string(),
                reason: format!(
                    "'{}' is not one of 'running', 'completed', 'failed'",
                    other
                ),
            }),
        }
    }
}

/// Per-step policy controlling how much rejection detail is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Keep every rejected item, up to the per-reason cap.
    Full,

    /// Keep a bounded, per-reason sample of rejected items.
    #[default]
    Sample,

    /// Keep counts only.
    None,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Full => "full",
            CaptureMode::Sample => "sample",
            CaptureMode::None => "none",
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(CaptureMode::Full),
            "sample" => Ok(CaptureMode::Sample),
            "none" => Ok(CaptureMode::None),
            _ => Err(ConfigError::UnknownCaptureMode(s.to_string())),
        }
    }
}

/// One named stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Name of the step (e.g. "filter_candidates").
    pub name: String,

    /// Free-form type tag used to group steps across pipelines
    /// (e.g. "filter", "transform", "select", "generate", "rank").
    #[serde(default)]
    pub step_type: Option<String>,

    #[serde(default)]
    pub input: Option<Value>,

    #[serde(default)]
    pub output: Option<Value>,

    /// Number of items entering the step.
    #[serde(default)]
    pub input_count: Option<u64>,

    /// Number of items leaving the step.
    #[serde(default)]
    pub output_count: Option<u64>,

    /// `1 - output_count / input_count`, when both counts are known.
    #[serde(default)]
    pub rejection_rate: Option<f64>,

    /// Exact number of rejections per reason.
    #[serde(default)]
    pub rejection_counts: BTreeMap<String, u64>,

    /// Rejected items retained in detail, in the order they were rejected.
    #[serde(default)]
    pub sampled_rejections: Vec<RejectionSample>,

    #[serde(default)]
    pub acceptances: Vec<Acceptance>,

    #[serde(default)]
    pub decisions: Vec<Decision>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub duration_ms: Option<i64>,

    /// Fault message when the step's execution failed.
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Step {
    /// Total rejections across all reasons.
    pub fn rejection_total(&self) -> u64 {
        self.rejection_counts.values().sum()
    }

    /// Retained samples for a single reason.
    pub fn samples_for<'a>(&'a self, reason: &'a str) -> impl Iterator<Item = &'a RejectionSample> {
        self.sampled_rejections
            .iter()
            .filter(move |s| s.reason == reason)
    }
}

/// A rejected item retained in detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionSample {
    pub item_id: String,
    pub reason: String,
    #[serde(default = "empty_details")]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// An item that passed a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acceptance {
    pub item_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "empty_details")]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// A decision made within a step, such as picking the best candidate.
///
/// Built with [`Decision::new`] and the `with_*` methods, then recorded with
/// [`StepRecorder::decide`](super::StepRecorder::decide).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// What was decided (e.g. "select_best", "rank", "categorize").
    pub decision: String,

    /// Identifier of the selected item, if any.
    #[serde(default)]
    pub selected: Option<String>,

    #[serde(default)]
    pub reason: Option<String>,

    /// Score or confidence of the decision.
    #[serde(default)]
    pub score: Option<f64>,

    /// Other candidates that were considered.
    #[serde(default)]
    pub alternatives: Option<Vec<Alternative>>,

    #[serde(default = "empty_details")]
    pub details: Value,

    pub timestamp: DateTime<Utc>,
}

impl Decision {
    /// Creates a decision stamped with the current time.
    pub fn new(decision: impl Into<String>) -> Self {
        Self {
            decision: decision.into(),
            selected: None,
            reason: None,
            score: None,
            alternatives: None,
            details: empty_details(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_selected(mut self, item_id: impl Into<String>) -> Self {
        self.selected = Some(item_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Alternative>) -> Self {
        self.alternatives = Some(alternatives);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// A candidate considered alongside a decision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Alternative {
    #[serde(default, alias = "id")]
    pub item_id: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Alternative {
    pub fn new(item_id: impl Into<String>, score: f64) -> Self {
        Self {
            item_id: Some(item_id.into()),
            score: Some(score),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Computes a step's rejection rate from its item counts.
///
/// Returns `None` when either count is unknown and `0.0` for a step that
/// received no input.
pub fn rejection_rate(input_count: Option<u64>, output_count: Option<u64>) -> Option<f64> {
    let (input, output) = (input_count?, output_count?);
    if input == 0 {
        return Some(0.0);
    }
    Some(1.0 - output as f64 / input as f64)
}

/// Milliseconds elapsed between two timestamps, absent if not yet ended.
pub fn duration_ms(started_at: DateTime<Utc>, ended_at: Option<DateTime<Utc>>) -> Option<i64> {
    ended_at.map(|end| (end - started_at).num_milliseconds())
}
