//! Request and response documents at the service boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, ValidationError};
use crate::query::{Page, Pagination, RunFilter, RunSummary, StepFilter, StepSummary, DEFAULT_LIMIT};
use crate::trace::{Run, RunStatus};

/// Name reported by the health endpoint.
pub const SERVICE_NAME: &str = "X-Ray API";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
        }
    }
}

/// Standard response wrapper for write endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Query parameters for run listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunListParams {
    #[serde(default)]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl RunListParams {
    /// Converts raw parameters into a validated filter and page window.
    pub fn resolve(&self) -> Result<(RunFilter, Pagination), QueryError> {
        let status = self
            .status
            .as_deref()
            .map(|s| {
                s.parse::<RunStatus>().map_err(|e| QueryError::InvalidFilter {
                    field: "status".to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let filter = RunFilter {
            pipeline: self.pipeline.clone(),
            status,
        };
        Ok((filter, pagination(self.limit, self.offset)?))
    }
}

/// Query parameters for step listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepListParams {
    #[serde(default)]
    pub step_type: Option<String>,
    /// Partial, case-insensitive step name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rejection_rate_gt: Option<f64>,
    #[serde(default)]
    pub rejection_rate_lt: Option<f64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl StepListParams {
    pub fn resolve(&self) -> Result<(StepFilter, Pagination), QueryError> {
        let filter = StepFilter {
            step_type: self.step_type.clone(),
            name_contains: self.name.clone(),
            rejection_rate_gt: self.rejection_rate_gt,
            rejection_rate_lt: self.rejection_rate_lt,
        };
        filter.validate()?;
        Ok((filter, pagination(self.limit, self.offset)?))
    }
}

fn pagination(limit: Option<usize>, offset: Option<usize>) -> Result<Pagination, QueryError> {
    Pagination::new(limit.unwrap_or(DEFAULT_LIMIT), offset.unwrap_or(0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunListResponse {
    pub runs: Vec<RunSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl From<Page<RunSummary>> for RunListResponse {
    fn from(page: Page<RunSummary>) -> Self {
        Self {
            runs: page.items,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepListResponse {
    pub steps: Vec<StepSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl From<Page<StepSummary>> for StepListResponse {
    fn from(page: Page<StepSummary>) -> Self {
        Self {
            steps: page.items,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

/// Checks that a run carries the fields the store keys on.
///
/// # Errors
///
/// Returns `ValidationError::MissingField` for an empty `run_id` or `pipeline`.
pub fn validate_run(run: &Run) -> Result<(), ValidationError> {
    if run.run_id.trim().is_empty() {
        return Err(ValidationError::MissingField("run_id"));
    }
    if run.pipeline.trim().is_empty() {
        return Err(ValidationError::MissingField("pipeline"));
    }
    Ok(())
}

/// Parses a submitted run document.
///
/// Missing `status` defaults to `completed`; other missing fields take
/// their empty values.
///
/// # Errors
///
/// Returns `ValidationError` if the document is not an object, lacks a
/// non-empty `run_id` or `pipeline`, or does not match the run shape.
pub fn parse_submission(document: Value) -> Result<Run, ValidationError> {
    let Some(object) = document.as_object() else {
        return Err(ValidationError::InvalidField {
            field: "body".to_string(),
            reason: "run submission must be a JSON object".to_string(),
        });
    };

    for field in ["run_id", "pipeline"] {
        match object.get(field) {
            None | Some(Value::Null) => return Err(ValidationError::MissingField(field)),
            Some(Value::String(_)) => {}
            Some(_) => {
                return Err(ValidationError::InvalidField {
                    field: field.to_string(),
                    reason: "must be a string".to_string(),
                })
            }
        }
    }

    let run: Run = serde_json::from_value(document)?;
    validate_run(&run)?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_submission_defaults_status() {
        let run = parse_submission(json!({"run_id": "r1", "pipeline": "p", "input": {"k": 1}}))
            .expect("valid submission");
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.steps.is_empty());
        assert_eq!(run.input, json!({"k": 1}));
    }

    #[test]
    fn test_parse_submission_requires_identity() {
        assert!(matches!(
            parse_submission(json!({"pipeline": "p"})),
            Err(ValidationError::MissingField("run_id"))
        ));
        assert!(matches!(
            parse_submission(json!({"run_id": "r1", "pipeline": null})),
            Err(ValidationError::MissingField("pipeline"))
        ));
        assert!(matches!(
            parse_submission(json!({"run_id": "  ", "pipeline": "p"})),
            Err(ValidationError::MissingField("run_id"))
        ));
        assert!(matches!(
            parse_submission(json!({"run_id": 7, "pipeline": "p"})),
            Err(ValidationError::InvalidField { .. })
        ));
        assert!(parse_submission(json!([1, 2])).is_err());
    }

    #[test]
    fn test_parse_submission_rejects_bad_status() {
        let result = parse_submission(json!({"run_id": "r1", "pipeline": "p", "status": "paused"}));
        assert!(matches!(result, Err(ValidationError::Json(_))));
    }

    #[test]
    fn test_run_params_resolve() {
        let params = RunListParams {
            status: Some("failed".to_string()),
            limit: Some(10),
            ..Default::default()
        };
        let (filter, page) = params.resolve().expect("valid");
        assert_eq!(filter.status, Some(RunStatus::Failed));
        assert_eq!((page.limit, page.offset), (10, 0));

        let bad = RunListParams {
            status: Some("paused".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.resolve(), Err(QueryError::InvalidFilter { .. })));
    }

    #[test]
    fn test_step_params_resolve() {
        let params: StepListParams =
            serde_json::from_value(json!({"name": "filter", "rejection_rate_gt": 0.9}))
                .expect("valid params");
        let (filter, page) = params.resolve().expect("valid");
        assert_eq!(filter.name_contains.as_deref(), Some("filter"));
        assert_eq!(page, Pagination::default());

        let too_big = StepListParams {
            limit: Some(5000),
            ..Default::default()
        };
        assert!(too_big.resolve().is_err());
    }

    #[test]
    fn test_health_status() {
        let health = HealthStatus::default();
        assert_eq!(
            serde_json::to_value(&health).expect("serialize"),
            json!({"status": "ok", "service": "X-Ray API"})
        );
    }
}
