//! Report repository
//!
//! Sends the terminal result of a job to the control plane. One request per
//! call; see `service::reporter` for the retrying wrapper.

use async_trait::async_trait;
use keel_client::{ClientError, ControlPlaneClient, ReportJobRequest};
use keel_core::domain::job::JobId;
use keel_core::domain::result::ExecutionResult;
use std::sync::Arc;

/// Repository trait for result reporting
#[async_trait]
pub trait ReportClient: Send + Sync {
    /// Reports `result` for `job_id`
    ///
    /// Safe to call repeatedly for the same pair: the control plane treats a
    /// report for an already-closed job as a no-op.
    async fn report(&self, job_id: &JobId, result: &ExecutionResult) -> Result<(), ClientError>;
}

/// HTTP implementation of ReportClient
pub struct HttpReportClient {
    client: Arc<ControlPlaneClient>,
    runner_id: String,
}

impl HttpReportClient {
    pub fn new(client: Arc<ControlPlaneClient>, runner_id: String) -> Self {
        Self { client, runner_id }
    }
}

#[async_trait]
impl ReportClient for HttpReportClient {
    async fn report(&self, job_id: &JobId, result: &ExecutionResult) -> Result<(), ClientError> {
        let request = ReportJobRequest::new(self.runner_id.clone(), result);
        self.client.report_job(job_id, &request).await
    }
}
