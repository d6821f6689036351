//! Transports that carry a finalized run to the store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::api::validate_run;
use crate::error::{ConfigError, TransportError};
use crate::store::RunStore;
use crate::trace::Run;

/// One attempt at handing a run to its destination.
///
/// Implementations must not retry; retries happen through reconciliation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one run document.
    async fn send(&self, run: &Run) -> Result<(), TransportError>;

    /// Short label used in logs.
    fn name(&self) -> &str;
}

/// Posts run documents to `{api_url}/runs`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// Creates a transport for the API at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the HTTP client cannot be built.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "api_url".to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/runs", api_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, run: &Run) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(run)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Writes runs straight into an in-process store.
///
/// Applies the same submission checks as the ingestion endpoint.
#[derive(Clone)]
pub struct StoreTransport {
    store: Arc<dyn RunStore>,
}

impl StoreTransport {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for StoreTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for StoreTransport {
    async fn send(&self, run: &Run) -> Result<(), TransportError> {
        validate_run(run)?;
        self.store.insert(run.clone()).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::trace::RunStatus;
    use serde_json::json;

    fn run(id: &str) -> Run {
        serde_json::from_value(json!({"run_id": id, "pipeline": "p"})).expect("valid run")
    }

    #[test]
    fn test_http_endpoint_strips_trailing_slash() {
        let transport =
            HttpTransport::new("http://localhost:8000/", Duration::from_secs(1)).expect("client");
        assert_eq!(transport.endpoint(), "http://localhost:8000/runs");
        assert_eq!(transport.name(), "http");
    }

    #[tokio::test]
    async fn test_http_transport_unreachable_is_error() {
        // Port 9 (discard) is not expected to be listening for HTTP.
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).expect("client");
        let result = transport.send(&run("r1")).await;
        assert!(matches!(result, Err(TransportError::Http(_))));
    }

    #[tokio::test]
    async fn test_store_transport_inserts() {
        let store = Arc::new(MemoryStore::new());
        let transport = StoreTransport::new(store.clone());

        transport.send(&run("r1")).await.expect("send");
        let stored = store.get("r1").await.expect("get").expect("stored");
        assert_eq!(stored.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_store_transport_rejects_missing_pipeline() {
        let store = Arc::new(MemoryStore::new());
        let transport = StoreTransport::new(store.clone());

        let mut bad = run("r1");
        bad.pipeline.clear();
        let result = transport.send(&bad).await;
        assert!(matches!(result, Err(TransportError::Validation(_))));
        assert_eq!(store.len().await.expect("len"), 0);
    }
}
