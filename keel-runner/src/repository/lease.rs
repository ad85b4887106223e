//! Lease repository
//!
//! Handles the lease side of the control-plane protocol:
//! - Claiming the next pending job
//! - Renewing the lease on the job in flight

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_client::{ClientError, ControlPlaneClient};
use keel_core::domain::job::{Job, JobId};
use std::sync::Arc;
use std::time::Duration;

/// Repository trait for lease operations with the control plane
#[async_trait]
pub trait LeaseClient: Send + Sync {
    /// Claims at most one job
    ///
    /// Returns `Ok(None)` when no job is available. A failure is returned
    /// as-is; the caller retries on its next poll tick.
    async fn claim(&self) -> Result<Option<Job>, ClientError>;

    /// Extends the lease on a held job by one lease duration
    ///
    /// # Returns
    /// The new lease deadline
    async fn renew(&self, job_id: &JobId) -> Result<DateTime<Utc>, ClientError>;
}

/// HTTP implementation of LeaseClient
pub struct HttpLeaseClient {
    client: Arc<ControlPlaneClient>,
    runner_id: String,
    lease_duration: Duration,
}

impl HttpLeaseClient {
    /// Creates a new HTTP lease client
    ///
    /// # Arguments
    /// * `client` - Shared control-plane client (carries the request timeout)
    /// * `runner_id` - Unique identifier for this runner
    /// * `lease_duration` - Lease requested on claim and renewal
    pub fn new(client: Arc<ControlPlaneClient>, runner_id: String, lease_duration: Duration) -> Self {
        Self {
            client,
            runner_id,
            lease_duration,
        }
    }

    fn lease_seconds(&self) -> u64 {
        self.lease_duration.as_secs()
    }

    fn lease_delta(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_seconds() as i64)
    }
}

#[async_trait]
impl LeaseClient for HttpLeaseClient {
    async fn claim(&self) -> Result<Option<Job>, ClientError> {
        // Taken before the request so the local deadline errs on the early side
        let claimed_at = Utc::now();

        let claimed = self
            .client
            .claim_job(&self.runner_id, self.lease_seconds())
            .await?;

        Ok(claimed.map(|job| job.into_job(claimed_at, self.lease_delta())))
    }

    async fn renew(&self, job_id: &JobId) -> Result<DateTime<Utc>, ClientError> {
        let requested_at = Utc::now();

        let ack = self
            .client
            .heartbeat_job(job_id, &self.runner_id, self.lease_seconds())
            .await?;

        let local_deadline = requested_at + self.lease_delta();
        Ok(match ack.lease_expires_at {
            Some(remote) => remote.min(local_deadline),
            None => local_deadline,
        })
    }
}
