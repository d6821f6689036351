//! Listing rows returned by the query engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trace::{Run, RunStatus, Step};

/// One page of a filtered listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches before pagination.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Run listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub pipeline: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub step_count: usize,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            pipeline: run.pipeline.clone(),
            status: run.status,
            started_at: run.started_at,
            ended_at: run.ended_at,
            duration_ms: run.duration_ms,
            step_count: run.step_count(),
        }
    }
}

/// Step listing row, annotated with its parent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub run_id: String,
    pub pipeline: String,
    pub step_name: String,
    pub step_type: Option<String>,
    pub input_count: Option<u64>,
    pub output_count: Option<u64>,
    pub rejection_rate: Option<f64>,
    pub duration_ms: Option<i64>,
}

impl StepSummary {
    pub fn new(run: &Run, step: &Step) -> Self {
        Self {
            run_id: run.run_id.clone(),
            pipeline: run.pipeline.clone(),
            step_name: step.name.clone(),
            step_type: step.step_type.clone(),
            input_count: step.input_count,
            output_count: step.output_count,
            rejection_rate: step.rejection_rate,
            duration_ms: step.duration_ms,
        }
    }
}
