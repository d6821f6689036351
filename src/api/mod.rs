//! Ingestion and query service.
//!
//! [`TraceService`] is what an HTTP layer mounts: one method per endpoint,
//! each returning the response document for that endpoint. The service owns
//! no globals; the store is injected at construction.
//!
//! | Endpoint             | Method                      |
//! |----------------------|-----------------------------|
//! | `GET /`              | [`TraceService::health`]     |
//! | `POST /runs`         | [`TraceService::ingest`]     |
//! | `GET /runs`          | [`TraceService::list_runs`]  |
//! | `GET /runs/{run_id}` | [`TraceService::get_run`]    |
//! | `GET /steps`         | [`TraceService::list_steps`] |

pub mod models;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::error::{IngestError, QueryError};
use crate::metrics::MetricsCollector;
use crate::query::QueryEngine;
use crate::store::RunStore;
use crate::trace::Run;

pub use models::{
    parse_submission, validate_run, ApiResponse, HealthStatus, RunListParams, RunListResponse,
    StepListParams, StepListResponse, SERVICE_NAME,
};

/// Service facade over a run store.
#[derive(Clone)]
pub struct TraceService {
    store: Arc<dyn RunStore>,
    query: QueryEngine,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for TraceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceService").finish_non_exhaustive()
    }
}

impl TraceService {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            query: QueryEngine::new(store.clone()),
            store,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::default()
    }

    /// Ingests a submitted run document.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Validation` for a malformed submission and
    /// `IngestError::Store` if the store write fails.
    pub async fn ingest(&self, document: Value) -> Result<ApiResponse, IngestError> {
        let run = parse_submission(document)?;
        self.ingest_run(run).await
    }

    /// Ingests an already-typed run. Re-ingesting an id replaces the run.
    pub async fn ingest_run(&self, run: Run) -> Result<ApiResponse, IngestError> {
        validate_run(&run)?;

        let rejections: u64 = run.steps.iter().map(|s| s.rejection_total()).sum();
        let run_id = self.store.insert(run).await?;

        self.metrics.record_ingest(rejections);
        info!(run_id = %run_id, "Run ingested");

        Ok(ApiResponse {
            success: true,
            message: Some(format!("Run {} created successfully", run_id)),
            data: Some(json!({ "run_id": run_id })),
        })
    }

    pub async fn list_runs(&self, params: &RunListParams) -> Result<RunListResponse, QueryError> {
        let (filter, page) = params.resolve()?;
        Ok(self.query.list_runs(&filter, page).await?.into())
    }

    /// Full run detail including every step.
    pub async fn get_run(&self, run_id: &str) -> Result<Arc<Run>, QueryError> {
        self.query.get_run(run_id).await
    }

    pub async fn list_steps(&self, params: &StepListParams) -> Result<StepListResponse, QueryError> {
        let (filter, page) = params.resolve()?;
        Ok(self.query.list_steps(&filter, page).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::store::MemoryStore;
    use crate::trace::RunStatus;

    fn service() -> TraceService {
        TraceService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_ingest_returns_run_id() {
        let service = service();
        let response = service
            .ingest(json!({"run_id": "r1", "pipeline": "p", "input": {}}))
            .await
            .expect("ingest");

        assert!(response.success);
        assert_eq!(response.data, Some(json!({"run_id": "r1"})));
        assert_eq!(response.message.as_deref(), Some("Run r1 created successfully"));
    }

    #[tokio::test]
    async fn test_ingest_rejects_missing_pipeline() {
        let service = service();
        let err = service
            .ingest(json!({"run_id": "r1"}))
            .await
            .expect_err("should be rejected");
        assert!(matches!(
            err,
            IngestError::Validation(ValidationError::MissingField("pipeline"))
        ));
    }

    #[tokio::test]
    async fn test_resubmission_keeps_second_document() {
        let service = service();
        service
            .ingest(json!({"run_id": "r1", "pipeline": "p", "status": "failed"}))
            .await
            .expect("first");
        service
            .ingest(json!({"run_id": "r1", "pipeline": "p", "status": "completed"}))
            .await
            .expect("second");

        let listing = service
            .list_runs(&RunListParams::default())
            .await
            .expect("list");
        assert_eq!(listing.total, 1);
        assert_eq!(listing.runs[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_listing_shapes() {
        let service = service();
        service
            .ingest(json!({
                "run_id": "r1",
                "pipeline": "p",
                "steps": [{"name": "filter", "step_type": "filter", "input_count": 10, "output_count": 2, "rejection_rate": 0.8}]
            }))
            .await
            .expect("ingest");

        let runs = service
            .list_runs(&RunListParams::default())
            .await
            .expect("runs");
        let runs_doc = serde_json::to_value(&runs).expect("serialize");
        assert_eq!(runs_doc["limit"], json!(100));
        assert_eq!(runs_doc["runs"][0]["step_count"], json!(1));

        let steps = service
            .list_steps(&StepListParams {
                rejection_rate_gt: Some(0.5),
                ..Default::default()
            })
            .await
            .expect("steps");
        let steps_doc = serde_json::to_value(&steps).expect("serialize");
        assert_eq!(steps_doc["steps"][0]["step_name"], json!("filter"));
        assert_eq!(steps_doc["steps"][0]["run_id"], json!("r1"));
        assert_eq!(steps_doc["total"], json!(1));
    }

    #[tokio::test]
    async fn test_get_run_not_found() {
        let service = service();
        assert!(matches!(
            service.get_run("missing").await,
            Err(QueryError::NotFound(_))
        ));
        assert_eq!(service.health().status, "ok");
    }
}
