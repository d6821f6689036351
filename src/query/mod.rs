//! Cross-run queries.
//!
//! Every query takes one snapshot of the store, then filters, orders and
//! pages it without holding any lock. Results always reflect the latest
//! completed writes; nothing is cached.

pub mod filter;
pub mod summary;

use std::sync::Arc;

use crate::error::QueryError;
use crate::store::RunStore;
use crate::trace::Run;

pub use filter::{Pagination, RunFilter, StepFilter, DEFAULT_LIMIT, MAX_LIMIT};
pub use summary::{Page, RunSummary, StepSummary};

/// Read-only query engine over a run store.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn RunStore>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine").finish_non_exhaustive()
    }
}

impl QueryEngine {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Lists runs, newest first.
    ///
    /// Runs are ordered by `started_at` descending; runs without a start
    /// time come last and ties keep insertion order. `total` counts every
    /// match before pagination.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidFilter` for a bad page window.
    pub async fn list_runs(
        &self,
        filter: &RunFilter,
        page: Pagination,
    ) -> Result<Page<RunSummary>, QueryError> {
        page.validate()?;

        let snapshot = self.store.snapshot().await?;
        let mut matched: Vec<&Arc<Run>> = snapshot.iter().filter(|r| filter.matches(r)).collect();
        // Stable sort keeps insertion order among equal start times.
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(Page {
            total: matched.len(),
            items: page.apply(matched.into_iter().map(|r| RunSummary::from(&**r))),
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Lists steps across all runs.
    ///
    /// Order is run insertion order, then step execution order.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidFilter` for a bad rate bound or page window.
    pub async fn list_steps(
        &self,
        filter: &StepFilter,
        page: Pagination,
    ) -> Result<Page<StepSummary>, QueryError> {
        page.validate()?;
        filter.validate()?;

        let snapshot = self.store.snapshot().await?;
        let matcher = filter.matcher();
        let mut matched = Vec::new();
        for run in &snapshot {
            for step in run.steps.iter().filter(|step| matcher.matches(step)) {
                matched.push(StepSummary::new(run, step));
            }
        }

        Ok(Page {
            total: matched.len(),
            items: page.apply(matched),
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Returns the full run.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::NotFound` for an unknown id.
    pub async fn get_run(&self, run_id: &str) -> Result<Arc<Run>, QueryError> {
        self.store
            .get(run_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(run_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::trace::RunStatus;
    use chrono::{Duration, Utc};
    use serde_json::json;

    async fn seeded() -> QueryEngine {
        let store = Arc::new(MemoryStore::new());
        let base = Utc::now();

        let docs = [
            json!({
                "run_id": "r1", "pipeline": "p", "status": "completed",
                "started_at": (base - Duration::seconds(30)).to_rfc3339(),
                "steps": [
                    {"name": "filter_price", "step_type": "filter", "input_count": 10, "output_count": 2, "rejection_rate": 0.8},
                    {"name": "rank", "step_type": "rank"}
                ]
            }),
            json!({
                "run_id": "r2", "pipeline": "p", "status": "failed",
                "started_at": (base - Duration::seconds(10)).to_rfc3339(),
                "steps": [
                    {"name": "Filter_Rating", "step_type": "filter", "input_count": 5, "output_count": 5, "rejection_rate": 0.0}
                ]
            }),
            json!({"run_id": "r3", "pipeline": "q", "status": "completed"}),
            json!({
                "run_id": "r4", "pipeline": "q", "status": "completed",
                "started_at": (base - Duration::seconds(30)).to_rfc3339()
            }),
        ];
        for doc in docs {
            let run: Run = serde_json::from_value(doc).expect("valid run");
            store.insert(run).await.expect("insert");
        }
        QueryEngine::new(store)
    }

    fn ids(page: &Page<RunSummary>) -> Vec<&str> {
        page.items.iter().map(|r| r.run_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_list_runs_orders_newest_first() {
        let engine = seeded().await;
        let page = engine
            .list_runs(&RunFilter::default(), Pagination::default())
            .await
            .expect("list");

        // r1 and r4 tie on start time and keep insertion order; r3 has none.
        assert_eq!(ids(&page), vec!["r2", "r1", "r4", "r3"]);
        assert_eq!(page.total, 4);
        assert_eq!(page.items[1].step_count, 2);
    }

    #[tokio::test]
    async fn test_list_runs_status_filter() {
        let engine = seeded().await;
        let page = engine
            .list_runs(
                &RunFilter::default().with_status(RunStatus::Failed),
                Pagination::default(),
            )
            .await
            .expect("list");

        assert_eq!(ids(&page), vec!["r2"]);
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_list_runs_total_ignores_pagination() {
        let engine = seeded().await;
        let page = engine
            .list_runs(
                &RunFilter::default().with_pipeline("q"),
                Pagination::new(1, 1).expect("valid"),
            )
            .await
            .expect("list");

        assert_eq!(page.total, 2);
        assert_eq!(ids(&page), vec!["r3"]);
        assert_eq!((page.limit, page.offset), (1, 1));
    }

    #[tokio::test]
    async fn test_list_steps_filters() {
        let engine = seeded().await;

        let page = engine
            .list_steps(
                &StepFilter::default().with_name_contains("filter"),
                Pagination::default(),
            )
            .await
            .expect("list");
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].run_id, "r1");
        assert_eq!(page.items[1].step_name, "Filter_Rating");

        let page = engine
            .list_steps(
                &StepFilter::default()
                    .with_step_type("filter")
                    .with_rejection_rate_gt(0.5),
                Pagination::default(),
            )
            .await
            .expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].step_name, "filter_price");
        assert_eq!(page.items[0].pipeline, "p");
    }

    #[tokio::test]
    async fn test_list_steps_unrated_step_excluded_by_rate_filters() {
        let engine = seeded().await;
        for filter in [
            StepFilter::default().with_rejection_rate_gt(0.0),
            StepFilter::default().with_rejection_rate_lt(1.0),
        ] {
            let page = engine
                .list_steps(&filter, Pagination::default())
                .await
                .expect("list");
            assert!(page.items.iter().all(|s| s.step_name != "rank"));
        }
    }

    #[tokio::test]
    async fn test_invalid_filters_are_rejected() {
        let engine = seeded().await;
        let bad_page = Pagination { limit: 0, offset: 0 };
        assert!(matches!(
            engine.list_runs(&RunFilter::default(), bad_page).await,
            Err(QueryError::InvalidFilter { .. })
        ));
        assert!(matches!(
            engine
                .list_steps(
                    &StepFilter::default().with_rejection_rate_gt(2.0),
                    Pagination::default()
                )
                .await,
            Err(QueryError::InvalidFilter { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_run() {
        let engine = seeded().await;
        assert_eq!(engine.get_run("r1").await.expect("found").steps.len(), 2);
        assert!(matches!(
            engine.get_run("nope").await,
            Err(QueryError::NotFound(ref id)) if id == "nope"
        ));
    }
}
