//! Keel HTTP Client
//!
//! Type-safe HTTP clients used by the runner:
//! - [`ControlPlaneClient`] claims jobs, renews leases and reports results
//! - [`AgentClient`] asks a deployment agent to roll out an image
//!
//! # Example
//!
//! ```no_run
//! use keel_client::ControlPlaneClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ControlPlaneClient::with_timeout("http://127.0.0.1:7002", Duration::from_secs(10))?;
//!
//!     match client.claim_job("runner-01", 30).await? {
//!         Some(job) => println!("Claimed job {}", job.id),
//!         None => println!("Nothing to do"),
//!     }
//!     Ok(())
//! }
//! ```

mod agent;
pub mod error;
mod jobs;

// Re-export commonly used types
pub use agent::AgentClient;
pub use error::{ClientError, Result};
pub use keel_core::dto::job::{ClaimedJob, HeartbeatAck, ReportJobRequest};

use keel_core::domain::job::JobId;
use keel_core::dto::job::ApiEnvelope;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the control plane's deploy-job API
///
/// Every call is a single request; retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    /// Base URL of the control plane (e.g., "http://127.0.0.1:7002")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ControlPlaneClient {
    /// Create a new control plane client with reqwest defaults
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client whose every request is bounded by `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a new control plane client with a custom HTTP client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the control plane
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds `{base}/deploy/jobs/{id}/{action}` with the id as one escaped segment
    fn job_url(&self, job_id: &JobId, action: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::InvalidRequest(format!("bad base URL {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidRequest(format!("bad base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["deploy", "jobs", job_id.as_str(), action]);
        Ok(url)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an enveloped API response
    ///
    /// Checks the HTTP status, then the envelope code, and returns the
    /// (possibly absent) `data` payload.
    async fn handle_envelope<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))?;

        if !envelope.is_ok() {
            return Err(ClientError::Rejected {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }

        Ok(envelope.data)
    }
}
