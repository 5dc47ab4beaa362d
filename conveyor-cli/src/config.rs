//! Configuration module
//!
//! Settings shared by every command.

use anyhow::Context;
use conveyor_client::OrchestratorClient;
use std::time::Duration;

/// Upper bound on any single request to the orchestrator
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
}

impl Config {
    pub fn client(&self) -> anyhow::Result<OrchestratorClient> {
        OrchestratorClient::with_timeout(&self.orchestrator_url, REQUEST_TIMEOUT)
            .context("Failed to build HTTP client")
    }
}
