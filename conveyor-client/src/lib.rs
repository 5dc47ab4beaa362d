//! Conveyor HTTP Client
//!
//! Typed HTTP client for the Conveyor orchestrator API, used by the CLI.
//!
//! # Example
//!
//! ```no_run
//! use conveyor_client::OrchestratorClient;
//! use conveyor_core::dto::execution::TriggerExecution;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let pipeline_id: Uuid = "6f1c0c3e-4b51-4a57-9a43-5d0c4f5e8a10".parse()?;
//!     let triggered = client.trigger_execution(TriggerExecution {
//!         pipeline_id,
//!         branch: None,
//!         environment: "production".to_string(),
//!     }).await?;
//!
//!     let status = client.get_execution_status(triggered.execution_id).await?;
//!     println!("Execution {} is {}", triggered.execution_id, status.status);
//!     Ok(())
//! }
//! ```

pub mod error;
mod executions;
mod pipelines;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the Conveyor orchestrator API
///
/// Methods are grouped by resource:
/// - Pipeline management (create, list, get, delete, execution history)
/// - Execution lifecycle (trigger, cancel, status, logs)
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    base_url: String,
    client: Client,
}

impl OrchestratorClient {
    /// Client without a request timeout
    ///
    /// ```
    /// use conveyor_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080/");
    /// assert_eq!(client.base_url(), "http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::from_parts(base_url.into(), Client::new())
    }

    /// Client whose requests fail after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::from_parts(base_url.into(), client))
    }

    fn from_parts(base_url: String, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Request Helpers
    // =============================================================================

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        parse_json(check_status(response).await?).await
    }

    async fn post<B, T>(&self, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        parse_json(check_status(response).await?).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self.client.delete(self.url(path)).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Turns non-2xx responses into `ApiError`
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    tracing::debug!("{} responded {}", response.url(), status);

    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("Unknown error").to_string());
    Err(ClientError::api_error(status.as_u16(), body))
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}
