//! Deploy-job API endpoints

use crate::ControlPlaneClient;
use crate::error::Result;
use keel_core::domain::job::JobId;
use keel_core::dto::job::{
    ClaimJobRequest, ClaimedJob, HeartbeatAck, HeartbeatRequest, ReportJobRequest,
};
use tracing::debug;

impl ControlPlaneClient {
    // =============================================================================
    // Job Lease
    // =============================================================================

    /// Claim the next pending job under a lease
    ///
    /// # Arguments
    /// * `runner_id` - The ID of the runner claiming the job
    /// * `lease_seconds` - Requested lease duration
    ///
    /// # Returns
    /// The claimed job, or `None` when the queue is empty
    pub async fn claim_job(&self, runner_id: &str, lease_seconds: u64) -> Result<Option<ClaimedJob>> {
        let url = format!("{}/deploy/jobs/claim", self.base_url);
        debug!("Claiming job as {} (lease {}s)", runner_id, lease_seconds);

        let response = self
            .client
            .post(&url)
            .json(&ClaimJobRequest {
                runner_id: runner_id.to_string(),
                lease_seconds,
            })
            .send()
            .await?;

        self.handle_envelope(response).await
    }

    /// Extend the lease on a job this runner holds
    ///
    /// # Arguments
    /// * `job_id` - The held job
    /// * `runner_id` - The lease owner
    /// * `extend_seconds` - How far to push the deadline
    pub async fn heartbeat_job(
        &self,
        job_id: &JobId,
        runner_id: &str,
        extend_seconds: u64,
    ) -> Result<HeartbeatAck> {
        let url = self.job_url(job_id, "heartbeat")?;

        let response = self
            .client
            .post(url)
            .json(&HeartbeatRequest {
                runner_id: runner_id.to_string(),
                extend_seconds,
            })
            .send()
            .await?;

        Ok(self
            .handle_envelope::<HeartbeatAck>(response)
            .await?
            .unwrap_or_default())
    }

    /// Report the terminal result of a job
    ///
    /// The control plane treats a repeated report for a closed job as a
    /// no-op, so this is safe to call again after an ambiguous failure.
    pub async fn report_job(&self, job_id: &JobId, report: &ReportJobRequest) -> Result<()> {
        let url = self.job_url(job_id, "report")?;
        debug!("Reporting job {} as {:?}", job_id, report.status);

        let response = self.client.post(url).json(report).send().await?;

        self.handle_envelope::<serde_json::Value>(response)
            .await
            .map(|_| ())
    }
}
