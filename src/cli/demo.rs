//! Simulated competitor-selection pipeline used by `xray demo`.
//!
//! Four steps: generate keywords from a product title, search a mock
//! catalog, filter candidates (recording rejections and acceptances), and
//! select the best match (recording the decision). The keyword generator
//! deliberately adds "stand", so laptop stands leak into the results and the
//! category filter only catches some of them.

use futures::FutureExt;
use rand::seq::SliceRandom;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::trace::{Alternative, CaptureMode, Decision, StepRecorder, TraceError, Tracer};

pub const TARGET_CATEGORY: &str = "phone_accessories";
const MAX_PRICE: f64 = 100.0;
const MIN_RATING: f64 = 3.0;
const CATEGORY_CATCH_RATE: f64 = 0.3;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("No products left to select from for '{0}'")]
    NoCandidates(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub category: String,
    pub price: f64,
    pub rating: f64,
}

/// Outcome of one demo run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub run_id: String,
    pub product: Product,
    /// True when the selected product is not in the target category.
    pub bad_match: bool,
}

/// Builds a shuffled catalog: half phone cases, a quarter laptop stands,
/// a quarter unrelated products.
pub fn mock_catalog(rng: &mut ChaCha8Rng, count: usize) -> Vec<Product> {
    let mut products = Vec::with_capacity(count);

    for i in 0..count / 2 {
        products.push(Product {
            id: format!("case_{}", i),
            title: format!("Phone Case Model {}", i),
            category: TARGET_CATEGORY.to_string(),
            price: rng.random_range(10.0..50.0),
            rating: rng.random_range(3.5..5.0),
        });
    }

    for i in 0..count / 4 {
        products.push(Product {
            id: format!("stand_{}", i),
            title: format!("Laptop Stand Model {}", i),
            category: "computer_accessories".to_string(),
            price: rng.random_range(30.0..100.0),
            rating: rng.random_range(4.0..5.0),
        });
    }

    for i in 0..count / 4 {
        products.push(Product {
            id: format!("other_{}", i),
            title: format!("Random Product {}", i),
            category: "other".to_string(),
            price: rng.random_range(5.0..200.0),
            rating: rng.random_range(1.0..5.0),
        });
    }

    products.shuffle(rng);
    products
}

/// Stand-in for an LLM keyword generator, including its bad association.
pub fn generate_keywords(title: &str) -> Vec<String> {
    let lower = title.to_lowercase();
    let mut keywords: Vec<String> = lower
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .map(str::to_string)
        .collect();

    if lower.contains("case") {
        keywords.extend(["case", "cover", "protection", "stand"].map(str::to_string));
    }

    keywords.sort();
    keywords.dedup();
    keywords
}

pub fn search_products(keywords: &[String], catalog: &[Product]) -> Vec<Product> {
    catalog
        .iter()
        .filter(|p| {
            let title = p.title.to_lowercase();
            keywords.iter().any(|k| title.contains(k.as_str()))
        })
        .cloned()
        .collect()
}

fn filter_products(
    products: Vec<Product>,
    step: &mut StepRecorder,
    rng: &mut ChaCha8Rng,
) -> Vec<Product> {
    let mut kept = Vec::new();

    for product in products {
        if product.price > MAX_PRICE {
            step.reject(
                &product.id,
                "price_too_high",
                Some(json!({"price": product.price, "threshold": MAX_PRICE})),
            );
            continue;
        }

        if product.rating < MIN_RATING {
            step.reject(
                &product.id,
                "low_rating",
                Some(json!({"rating": product.rating, "threshold": MIN_RATING})),
            );
            continue;
        }

        // The category check is leaky on purpose.
        if product.category != TARGET_CATEGORY && rng.random::<f64>() < CATEGORY_CATCH_RATE {
            step.reject(
                &product.id,
                "category_mismatch",
                Some(json!({"category": product.category, "expected": TARGET_CATEGORY})),
            );
            continue;
        }

        step.accept(
            &product.id,
            Some("passed_all_filters"),
            Some(json!({
                "price": product.price,
                "rating": product.rating,
                "category": product.category,
            })),
        );
        kept.push(product);
    }

    kept
}

fn score(product: &Product) -> f64 {
    (product.rating / 5.0) * 0.6 + (1.0 - product.price / 100.0) * 0.4
}

fn select_best(
    title: &str,
    products: Vec<Product>,
    step: &mut StepRecorder,
) -> Result<Product, DemoError> {
    let mut scored: Vec<(Product, f64)> = products
        .into_iter()
        .map(|p| {
            let s = score(&p);
            (p, s)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut ranked = scored.into_iter();
    let Some((best, best_score)) = ranked.next() else {
        return Err(DemoError::NoCandidates(title.to_string()));
    };

    let alternatives = ranked
        .take(4)
        .map(|(p, s)| Alternative::new(p.id, s).with_label(p.title))
        .collect();
    step.decide(
        Decision::new("select_best_competitor")
            .with_selected(best.id.clone())
            .with_reason("highest_combined_score")
            .with_score(best_score)
            .with_alternatives(alternatives),
    );

    Ok(best)
}

/// Runs the pipeline once inside a traced run.
///
/// `catalog_size` of zero yields a run that fails in `select_best`.
pub async fn run_competitor_selection(
    tracer: &Tracer,
    title: &str,
    catalog_size: usize,
    seed: u64,
) -> Result<Selection, TraceError<DemoError>> {
    let title = title.to_string();

    tracer
        .trace(json!({"product_title": title}), None, move |run| {
            async move {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let catalog = mock_catalog(&mut rng, catalog_size);

                let keywords = run.step(
                    "generate_keywords",
                    Some("generate"),
                    CaptureMode::Sample,
                    |step| {
                        step.set_input(json!({"title": title}));
                        let keywords = generate_keywords(&title);
                        step.set_output(json!({"keywords": keywords}));
                        Ok::<_, DemoError>(keywords)
                    },
                )?;

                let candidates = run.step(
                    "search_products",
                    Some("transform"),
                    CaptureMode::Sample,
                    |step| {
                        step.set_input(json!({"keywords": keywords}));
                        let found = search_products(&keywords, &catalog);
                        step.set_output(json!({"count": found.len()}));
                        step.set_input_count(catalog.len() as u64);
                        step.set_output_count(found.len() as u64);
                        Ok::<_, DemoError>(found)
                    },
                )?;

                let filtered = run.step(
                    "filter_candidates",
                    Some("filter"),
                    CaptureMode::Sample,
                    |step| {
                        step.set_input_count(candidates.len() as u64);
                        let kept = filter_products(candidates, step, &mut rng);
                        step.set_output_count(kept.len() as u64);
                        Ok::<_, DemoError>(kept)
                    },
                )?;

                let best = run.step("select_best", Some("select"), CaptureMode::Sample, |step| {
                    step.set_input_count(filtered.len() as u64);
                    let best = select_best(&title, filtered, step)?;
                    step.set_output_count(1);
                    Ok::<_, DemoError>(best)
                })?;

                run.set_output(json!({
                    "selected_id": best.id,
                    "selected_title": best.title,
                    "selected_category": best.category,
                }));

                Ok::<_, DemoError>(Selection {
                    run_id: run.run_id().to_string(),
                    bad_match: best.category != TARGET_CATEGORY,
                    product: best,
                })
            }
            .boxed()
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Delivery, DeliveryPolicy, OfflineBuffer, StoreTransport};
    use crate::query::{Pagination, StepFilter};
    use crate::query::QueryEngine;
    use crate::store::{MemoryStore, RunStore};
    use crate::trace::RunStatus;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn tracer(temp: &TempDir) -> (Arc<MemoryStore>, Tracer) {
        let store = Arc::new(MemoryStore::new());
        let delivery = Delivery::new(
            Arc::new(StoreTransport::new(store.clone())),
            DeliveryPolicy::Strict,
            OfflineBuffer::new(temp.path()),
        );
        let tracer = Tracer::new("competitor_selection", Arc::new(delivery)).with_seed(Some(1));
        (store, tracer)
    }

    #[test]
    fn test_keywords_include_bad_association() {
        let keywords = generate_keywords("iPhone 15 Case - Premium Protection");
        assert!(keywords.contains(&"stand".to_string()));
        assert!(keywords.contains(&"premium".to_string()));
        assert!(!keywords.contains(&"15".to_string()));
    }

    #[test]
    fn test_catalog_is_seeded() {
        let a = mock_catalog(&mut ChaCha8Rng::seed_from_u64(3), 40);
        let b = mock_catalog(&mut ChaCha8Rng::seed_from_u64(3), 40);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[tokio::test]
    async fn test_demo_run_is_recorded() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let (store, tracer) = tracer(&temp);

        let selection = run_competitor_selection(&tracer, "iPhone 15 Case", 200, 11)
            .await
            .expect("pipeline should select a product");

        let run = store
            .get(&selection.run_id)
            .await
            .expect("get")
            .expect("run stored");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps.len(), 4);

        let filter = run.step("filter_candidates").expect("filter step");
        assert!(filter.rejection_rate.is_some());
        assert!(filter.rejection_total() >= filter.sampled_rejections.len() as u64);
        assert_eq!(run.step("select_best").expect("select").decisions.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_catalog_fails_but_is_recorded() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let (store, tracer) = tracer(&temp);

        let result = run_competitor_selection(&tracer, "iPhone 15 Case", 0, 5).await;
        assert!(matches!(result, Err(TraceError::Pipeline(DemoError::NoCandidates(_)))));

        let runs = store.snapshot().await.expect("snapshot");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        let last = runs[0].steps.last().expect("select step attached");
        assert_eq!(last.name, "select_best");
        assert!(last.error.is_some());

        let engine = QueryEngine::new(store);
        let page = engine
            .list_steps(&StepFilter::default().with_step_type("select"), Pagination::default())
            .await
            .expect("list");
        assert_eq!(page.total, 1);
    }
}
