//! Entry point for instrumenting a pipeline.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::config::XRayConfig;
use crate::delivery::Delivery;
use crate::error::{ConfigError, DeliveryError};

use super::run::RunRecorder;
use super::sampler::SamplingPolicy;

/// Failure of a traced pipeline scope.
#[derive(Debug, Error)]
pub enum TraceError<E> {
    /// The pipeline body itself failed. The run was still recorded as failed.
    #[error("Pipeline failed: {0}")]
    Pipeline(E),

    /// The run could not be delivered under the `strict` policy.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Factory for run recorders of one named pipeline.
///
/// A tracer is cheap to clone and shares its delivery channel across runs.
#[derive(Debug, Clone)]
pub struct Tracer {
    pipeline: String,
    delivery: Arc<Delivery>,
    sampling: SamplingPolicy,
    seed: Option<u64>,
}

impl Tracer {
    pub fn new(pipeline: impl Into<String>, delivery: Arc<Delivery>) -> Self {
        Self {
            pipeline: pipeline.into(),
            delivery,
            sampling: SamplingPolicy::default(),
            seed: None,
        }
    }

    /// Builds a tracer whose delivery and sampling come from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn from_config(pipeline: impl Into<String>, config: &XRayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let delivery = Delivery::from_config(config)?;
        Ok(Self::new(pipeline, Arc::new(delivery))
            .with_sampling(config.sampling_policy())
            .with_seed(config.seed))
    }

    pub fn with_sampling(mut self, sampling: SamplingPolicy) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn delivery(&self) -> &Arc<Delivery> {
        &self.delivery
    }

    /// Begins a run. The caller is responsible for calling
    /// [`RunRecorder::end`] on every exit path.
    pub fn run(&self, input: Value, run_id: Option<String>) -> RunRecorder {
        RunRecorder::begin(self.pipeline.clone(), input, run_id, self.delivery.clone())
            .with_sampling(self.sampling)
            .with_seed(self.seed)
    }

    /// Runs `body` inside a recorded run.
    ///
    /// The run is ended and delivered whether `body` succeeds or fails. A
    /// failing body marks the run `failed` and its error is returned as
    /// [`TraceError::Pipeline`]. Under the `strict` policy a delivery failure
    /// is returned instead.
    ///
    /// If `body` panics, the run is ended as `failed` with the panic message
    /// and delivered before the panic resumes.
    pub async fn trace<T, E, F>(
        &self,
        input: Value,
        run_id: Option<String>,
        body: F,
    ) -> Result<T, TraceError<E>>
    where
        E: fmt::Display,
        F: for<'r> FnOnce(&'r mut RunRecorder) -> BoxFuture<'r, Result<T, E>>,
    {
        let mut run = self.run(input, run_id);
        let result = match AssertUnwindSafe(body(&mut run)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let fault = format!("Pipeline panicked: {}", panic_message(payload.as_ref()));
                if let Err(e) = run.end(Some(fault)).await {
                    error!(run_id = %run.run_id(), error = %e, "Panicked run could not be delivered");
                }
                panic::resume_unwind(payload);
            }
        };
        let fault = result.as_ref().err().map(|e| e.to_string());
        run.end(fault).await?;
        result.map_err(TraceError::Pipeline)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
