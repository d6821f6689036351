//! Delivery of finalized runs.
//!
//! A [`Delivery`] makes one bounded attempt to send each finalized run through
//! its [`Transport`] and applies a [`DeliveryPolicy`] when the attempt fails:
//!
//! - `buffer`: write the run to the [`OfflineBuffer`] for [`Delivery::reconcile`]
//! - `drop`: discard it
//! - `strict`: return the failure to the caller
//!
//! Sends are never retried inline.

pub mod offline;
pub mod transport;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{XRayConfig, DEFAULT_SEND_TIMEOUT};
use crate::error::{ConfigError, DeliveryError};
use crate::metrics::MetricsCollector;
use crate::trace::Run;

pub use offline::OfflineBuffer;
pub use transport::{HttpTransport, StoreTransport, Transport};

/// What to do when a run cannot be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPolicy {
    /// Keep the run in the offline buffer. Never fails the caller.
    #[default]
    Buffer,
    /// Discard the run. Never fails the caller.
    Drop,
    /// Return the failure to the caller.
    Strict,
}

impl DeliveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPolicy::Buffer => "buffer",
            DeliveryPolicy::Drop => "drop",
            DeliveryPolicy::Strict => "strict",
        }
    }
}

impl fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer" => Ok(DeliveryPolicy::Buffer),
            "drop" => Ok(DeliveryPolicy::Drop),
            "strict" => Ok(DeliveryPolicy::Strict),
            _ => Err(ConfigError::UnknownDeliveryPolicy(s.to_string())),
        }
    }
}

/// Result of handing one run to delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The send failed and the run was written to this buffer file.
    Buffered(PathBuf),
    /// The send failed and the run was discarded.
    Dropped,
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
}

/// Sends finalized runs and applies the failure policy.
pub struct Delivery {
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
    buffer: OfflineBuffer,
    send_timeout: Duration,
    metrics: MetricsCollector,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("transport", &self.transport.name())
            .field("policy", &self.policy)
            .field("buffer", &self.buffer.dir())
            .field("send_timeout", &self.send_timeout)
            .finish()
    }
}

impl Delivery {
    pub fn new(transport: Arc<dyn Transport>, policy: DeliveryPolicy, buffer: OfflineBuffer) -> Self {
        Self {
            transport,
            policy,
            buffer,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            metrics: MetricsCollector::new(),
        }
    }

    /// Builds an HTTP delivery from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the HTTP client cannot be built.
    pub fn from_config(config: &XRayConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(&config.api_url, config.send_timeout)?;
        Ok(Self::new(
            Arc::new(transport),
            config.delivery_policy,
            OfflineBuffer::new(config.offline_dir.clone()),
        )
        .with_send_timeout(config.send_timeout))
    }

    /// Sets the bounded wait for one send.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    pub fn buffer(&self) -> &OfflineBuffer {
        &self.buffer
    }

    /// One bounded send attempt. A timeout counts as a failure.
    async fn send(&self, run: &Run) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.send_timeout, self.transport.send(run)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DeliveryError::Transport {
                run_id: run.run_id.clone(),
                source,
            }),
            Err(_) => Err(DeliveryError::Timeout {
                run_id: run.run_id.clone(),
                timeout: self.send_timeout,
            }),
        }
    }

    /// Delivers a finalized run, applying the policy on failure.
    ///
    /// # Errors
    ///
    /// Only the `strict` policy returns an error.
    pub async fn deliver(&self, run: &Run) -> Result<DeliveryOutcome, DeliveryError> {
        let err = match self.send(run).await {
            Ok(()) => {
                debug!(run_id = %run.run_id, transport = self.transport.name(), "Run delivered");
                self.metrics.record_delivery(self.policy.as_str(), "delivered");
                return Ok(DeliveryOutcome::Delivered);
            }
            Err(e) => e,
        };

        match self.policy {
            DeliveryPolicy::Strict => {
                error!(run_id = %run.run_id, error = %err, "Run delivery failed");
                self.metrics.record_delivery(self.policy.as_str(), "failed");
                Err(err)
            }
            DeliveryPolicy::Drop => {
                warn!(run_id = %run.run_id, error = %err, "Run delivery failed; dropping run");
                self.metrics.record_delivery(self.policy.as_str(), "dropped");
                Ok(DeliveryOutcome::Dropped)
            }
            DeliveryPolicy::Buffer => match self.buffer.save(run).await {
                Ok(path) => {
                    warn!(
                        run_id = %run.run_id,
                        error = %err,
                        path = %path.display(),
                        "Run delivery failed; buffered for reconciliation"
                    );
                    self.metrics.record_delivery(self.policy.as_str(), "buffered");
                    Ok(DeliveryOutcome::Buffered(path))
                }
                Err(buffer_err) => {
                    error!(
                        run_id = %run.run_id,
                        error = %err,
                        buffer_error = %buffer_err,
                        "Run delivery failed and could not be buffered; run lost"
                    );
                    self.metrics.record_delivery(self.policy.as_str(), "dropped");
                    Ok(DeliveryOutcome::Dropped)
                }
            },
        }
    }

    /// Retries every buffered run once.
    ///
    /// A document is removed only after its resend succeeds. Unreadable
    /// documents count as failed and stay in place.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Buffer` if the buffer directory cannot be read.
    pub async fn reconcile(&self) -> Result<SyncReport, DeliveryError> {
        let mut report = SyncReport::default();

        for path in self.buffer.list().await? {
            let run = match self.buffer.load(&path).await {
                Ok(run) => run,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable buffered run");
                    report.failed += 1;
                    continue;
                }
            };

            match self.send(&run).await {
                Ok(()) => {
                    if let Err(e) = self.buffer.remove(&path).await {
                        warn!(path = %path.display(), error = %e, "Synced run could not be removed");
                    }
                    debug!(run_id = %run.run_id, "Buffered run synced");
                    report.synced += 1;
                }
                Err(e) => {
                    debug!(run_id = %run.run_id, error = %e, "Buffered run still undeliverable");
                    report.failed += 1;
                }
            }
        }

        if report.synced + report.failed > 0 {
            info!(
                synced = report.synced,
                failed = report.failed,
                "Reconciliation finished"
            );
        }
        self.metrics.record_reconcile(report.synced, report.failed);

        Ok(report)
    }
}
