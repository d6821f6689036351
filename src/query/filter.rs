//! Filters and pagination for run and step listings.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::trace::{Run, RunStatus, Step};

/// Default page size.
pub const DEFAULT_LIMIT: usize = 100;

/// Largest accepted page size.
pub const MAX_LIMIT: usize = 1000;

/// Page window over a filtered, ordered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Creates a validated window.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidFilter` unless `1 <= limit <= 1000`.
    pub fn new(limit: usize, offset: usize) -> Result<Self, QueryError> {
        let page = Self { limit, offset };
        page.validate()?;
        Ok(page)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(QueryError::InvalidFilter {
                field: "limit".to_string(),
                reason: format!("must be between 1 and {}", MAX_LIMIT),
            });
        }
        Ok(())
    }

    /// Drops `offset` items, then takes `limit`.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

/// Exact-match filters for run listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub pipeline: Option<String>,
    pub status: Option<RunStatus>,
}

impl RunFilter {
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, run: &Run) -> bool {
        self.pipeline.as_ref().is_none_or(|p| run.pipeline == *p)
            && self.status.is_none_or(|s| run.status == s)
    }
}

/// Filters for step listings.
///
/// A step with no rejection rate never matches either rate bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepFilter {
    pub step_type: Option<String>,
    /// Case-insensitive substring of the step name.
    pub name_contains: Option<String>,
    pub rejection_rate_gt: Option<f64>,
    pub rejection_rate_lt: Option<f64>,
}

impl StepFilter {
    pub fn with_step_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = Some(step_type.into());
        self
    }

    pub fn with_name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn with_rejection_rate_gt(mut self, rate: f64) -> Self {
        self.rejection_rate_gt = Some(rate);
        self
    }

    pub fn with_rejection_rate_lt(mut self, rate: f64) -> Self {
        self.rejection_rate_lt = Some(rate);
        self
    }

    /// Checks that rate bounds are finite and within `[0, 1]`.
    pub fn validate(&self) -> Result<(), QueryError> {
        for (field, bound) in [
            ("rejection_rate_gt", self.rejection_rate_gt),
            ("rejection_rate_lt", self.rejection_rate_lt),
        ] {
            if let Some(value) = bound {
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(QueryError::InvalidFilter {
                        field: field.to_string(),
                        reason: format!("must be between 0.0 and 1.0, got {}", value),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns a matcher with the name needle lowercased once.
    pub(crate) fn matcher(&self) -> StepMatcher<'_> {
        StepMatcher {
            filter: self,
            needle: self.name_contains.as_ref().map(|n| n.to_lowercase()),
        }
    }

    pub fn matches(&self, step: &Step) -> bool {
        self.matcher().matches(step)
    }
}

pub(crate) struct StepMatcher<'a> {
    filter: &'a StepFilter,
    needle: Option<String>,
}

impl StepMatcher<'_> {
    pub(crate) fn matches(&self, step: &Step) -> bool {
        if let Some(step_type) = &self.filter.step_type {
            if step.step_type.as_deref() != Some(step_type.as_str()) {
                return false;
            }
        }

        if let Some(needle) = &self.needle {
            if !step.name.to_lowercase().contains(needle.as_str()) {
                return false;
            }
        }

        if self.filter.rejection_rate_gt.is_some() || self.filter.rejection_rate_lt.is_some() {
            let Some(rate) = step.rejection_rate else {
                return false;
            };
            if self.filter.rejection_rate_gt.is_some_and(|gt| rate <= gt) {
                return false;
            }
            if self.filter.rejection_rate_lt.is_some_and(|lt| rate >= lt) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(name: &str, step_type: Option<&str>, rate: Option<f64>) -> Step {
        let mut step: Step = serde_json::from_value(json!({"name": name})).expect("valid step");
        step.step_type = step_type.map(str::to_string);
        step.rejection_rate = rate;
        step
    }

    #[test]
    fn test_pagination_bounds() {
        assert!(Pagination::new(1, 0).is_ok());
        assert!(Pagination::new(1000, 5).is_ok());
        assert!(Pagination::new(0, 0).is_err());
        assert!(Pagination::new(1001, 0).is_err());
        assert_eq!(Pagination::default().limit, 100);
    }

    #[test]
    fn test_pagination_apply() {
        let page = Pagination::new(2, 3).expect("valid");
        assert_eq!(page.apply(0..10), vec![3, 4]);
        assert!(page.apply(0..3).is_empty());
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let filter = StepFilter::default().with_name_contains("FILTER");
        assert!(filter.matches(&step("filter_by_price", None, None)));
        assert!(filter.matches(&step("PreFilter", None, None)));
        assert!(!filter.matches(&step("rank", None, None)));
    }

    #[test]
    fn test_type_match_is_exact() {
        let filter = StepFilter::default().with_step_type("filter");
        assert!(filter.matches(&step("a", Some("filter"), None)));
        assert!(!filter.matches(&step("a", Some("Filter"), None)));
        assert!(!filter.matches(&step("a", None, None)));
    }

    #[test]
    fn test_rate_bounds_are_strict() {
        let gt = StepFilter::default().with_rejection_rate_gt(0.5);
        assert!(gt.matches(&step("a", None, Some(0.6))));
        assert!(!gt.matches(&step("a", None, Some(0.5))));

        let lt = StepFilter::default().with_rejection_rate_lt(0.5);
        assert!(lt.matches(&step("a", None, Some(0.4))));
        assert!(!lt.matches(&step("a", None, Some(0.5))));
    }

    #[test]
    fn test_missing_rate_never_matches_rate_bounds() {
        let unrated = step("a", None, None);
        assert!(!StepFilter::default().with_rejection_rate_gt(0.0).matches(&unrated));
        assert!(!StepFilter::default().with_rejection_rate_lt(1.0).matches(&unrated));
        assert!(StepFilter::default().matches(&unrated));
    }

    #[test]
    fn test_rate_bound_validation() {
        assert!(StepFilter::default().with_rejection_rate_gt(0.9).validate().is_ok());
        assert!(StepFilter::default().with_rejection_rate_gt(1.5).validate().is_err());
        assert!(StepFilter::default().with_rejection_rate_lt(f64::NAN).validate().is_err());
    }
}
