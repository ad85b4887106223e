//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::wire;

/// Container port used when a job does not specify one
pub const DEFAULT_CONTAINER_PORT: u16 = 3000;

/// Git ref checked out when a job does not specify one
pub const DEFAULT_GIT_REF: &str = "main";

/// Image tag used when a job does not specify one
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Opaque job identifier assigned by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = wire::string_or_number(deserializer)?;
        if id.is_empty() {
            return Err(serde::de::Error::custom("job id cannot be empty"));
        }
        Ok(Self(id))
    }
}

/// A job claimed from the control plane
///
/// Holds everything the runner needs to execute and report one unit of work.
/// The lease deadline is absolute; the runner must not act on the job once
/// it has passed.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub lease_expires_at: DateTime<Utc>,
    /// Prior claim attempts, as counted by the control plane
    pub attempt: u32,
    /// Deployment agent selected by the control plane for this job
    pub runtime_node: Option<RuntimeNode>,
    pub spec: JobSpec,
    /// Why the claimed payload could not be decoded, if it could not.
    /// Such a job still has to be reported; it never runs a stage.
    pub spec_error: Option<String>,
}

impl Job {
    /// Returns true once `now` has reached the lease deadline
    pub fn lease_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.lease_expires_at
    }

    /// Base URL of the deployment agent, if the control plane provided one
    pub fn agent_base_url(&self) -> Option<&str> {
        self.runtime_node
            .as_ref()
            .and_then(|node| node.agent_base_url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Deployment agent location handed out with a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeNode {
    #[serde(default)]
    pub agent_base_url: Option<String>,
}

/// Build/deploy parameters of a job
///
/// Every field is optional on the wire. The runner validates the spec into a
/// deployment plan before it starts any side effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default, deserialize_with = "wire::opt_string_or_number")]
    pub app_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string_or_number")]
    pub user_id: Option<String>,
    /// Prebuilt image; when set no build or push happens
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub repo_ssh_url: Option<String>,
    #[serde(default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub image_tag: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_port")]
    pub container_port: Option<u16>,
    #[serde(default)]
    pub base_path: Option<String>,
}

impl JobSpec {
    pub fn git_ref(&self) -> &str {
        non_blank(self.git_ref.as_deref()).unwrap_or(DEFAULT_GIT_REF)
    }

    pub fn image_tag(&self) -> &str {
        non_blank(self.image_tag.as_deref()).unwrap_or(DEFAULT_IMAGE_TAG)
    }

    pub fn container_port(&self) -> u16 {
        self.container_port.unwrap_or(DEFAULT_CONTAINER_PORT)
    }

    pub fn prebuilt_image(&self) -> Option<&str> {
        non_blank(self.image.as_deref())
    }

    pub fn base_path(&self) -> Option<&str> {
        non_blank(self.base_path.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
