//! Deployment agent client
//!
//! The agent runs on the target node and owns the container lifecycle. The
//! runner only asks it to deploy an image; whatever JSON object comes back
//! counts as acceptance.

use crate::error::{ClientError, Result};
use keel_core::dto::agent::DeployAppRequest;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Header carrying the shared agent credential
pub const AGENT_TOKEN_HEADER: &str = "X-Runtime-Token";

/// HTTP client for deployment agents
///
/// Agents are addressed per job, so the base URL is passed on each call.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    token: String,
}

impl AgentClient {
    /// Create an agent client whose requests are bounded by `timeout`
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }

    /// Ask the agent at `agent_base_url` to deploy an application
    ///
    /// # Returns
    /// The agent's response object
    pub async fn deploy_app(
        &self,
        agent_base_url: &str,
        req: &DeployAppRequest,
    ) -> Result<serde_json::Value> {
        let base = agent_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(ClientError::InvalidRequest(
                "agent base URL is empty".to_string(),
            ));
        }

        let url = format!("{}/agent/apps/deploy", base);
        debug!("Deploying app {} ({}) via {}", req.app_id, req.image, url);

        let response = self
            .client
            .post(&url)
            .header(AGENT_TOKEN_HEADER, &self.token)
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))?;

        if !body.is_object() {
            return Err(ClientError::ParseError(format!(
                "deploy agent returned a non-object response: {}",
                body
            )));
        }

        Ok(body)
    }
}
