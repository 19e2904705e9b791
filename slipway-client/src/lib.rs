//! Slipway HTTP Client
//!
//! A small, typed client for the supervisor status API, used by
//! `slipway status` and by anything that needs to wait for a launched image
//! to report `SERVING`.
//!
//! # Example
//!
//! ```no_run
//! use slipway_client::SupervisorClient;
//!
//! #[tokio::main]
//! async fn main() -> slipway_client::Result<()> {
//!     let client = SupervisorClient::new("http://localhost:9090");
//!
//!     let status = client.status().await?;
//!     println!("{} is {}", status.name, status.state);
//!     Ok(())
//! }
//! ```

pub mod error;

pub use error::{ClientError, Result};
pub use slipway_core::dto::status::{SupervisorStatus, WorkerStatus};

use reqwest::Client;
use serde::de::DeserializeOwned;
use slipway_core::PipelineState;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the supervisor status API
#[derive(Debug, Clone)]
pub struct SupervisorClient {
    /// Base URL of the status API (e.g., "http://localhost:9090")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl SupervisorClient {
    /// Create a new supervisor client
    ///
    /// # Example
    /// ```
    /// use slipway_client::SupervisorClient;
    ///
    /// let client = SupervisorClient::new("http://localhost:9090");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new supervisor client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the supervisor
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /health
    ///
    /// Returns the body (`OK`) when the supervisor answers.
    pub async fn health(&self) -> Result<String> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::api_error(status.as_u16(), body));
        }

        Ok(body)
    }

    /// GET /status
    pub async fn status(&self) -> Result<SupervisorStatus> {
        let url = format!("{}/status", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Polls the status until the supervisor reports `state` or fails
    ///
    /// An unreachable supervisor is treated as not ready yet. Gives up after
    /// `attempts` polls.
    pub async fn wait_for_state(
        &self,
        state: PipelineState,
        interval: Duration,
        attempts: u32,
    ) -> Result<SupervisorStatus> {
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.status().await {
                Ok(status) if status.state == state => return Ok(status),
                Ok(status) if status.state.is_terminal() => {
                    return Err(ClientError::NotReady(format!(
                        "supervisor reported {}",
                        status.state
                    )));
                }
                Ok(status) => debug!("Attempt {}: supervisor is {}", attempt, status.state),
                Err(e) if e.is_unreachable() => {
                    debug!("Attempt {}: supervisor unreachable", attempt);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(interval).await;
        }

        Err(last_error.unwrap_or_else(|| {
            ClientError::NotReady(format!("supervisor never reported {}", state))
        }))
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
