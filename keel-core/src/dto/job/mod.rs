//! Job DTOs for runner ↔ control plane communication

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::job::{Job, JobId, JobSpec, RuntimeNode};
use crate::domain::result::{ExecutionResult, ExecutionStatus, StageRecord};
use crate::wire;

/// Response envelope used by every control-plane endpoint
///
/// A `code` other than 200 means the call was rejected even when the HTTP
/// status was 2xx.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub const OK: i64 = 200;

    pub fn is_ok(&self) -> bool {
        self.code == Self::OK
    }
}

/// Request to claim the next pending job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimJobRequest {
    pub runner_id: String,
    pub lease_seconds: u64,
}

/// A job as returned by the claim endpoint
///
/// Only `id` has to be well formed. Once a job is claimed it must be
/// reported, so the node and payload are kept raw and decoded in
/// [`ClaimedJob::into_job`], where a bad shape becomes a spec error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedJob {
    pub id: JobId,
    #[serde(default, deserialize_with = "wire::lenient_timestamp")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "wire::or_default")]
    pub attempt: u32,
    #[serde(default)]
    pub runtime_node: Value,
    #[serde(default)]
    pub payload: Value,
}

impl ClaimedJob {
    /// Converts the wire job into a domain job
    ///
    /// The lease deadline is the earlier of what the control plane sent and
    /// `claimed_at + requested`, so clock skew or a missing field can only
    /// shorten the window the runner believes it holds.
    pub fn into_job(self, claimed_at: DateTime<Utc>, requested: Duration) -> Job {
        let local_deadline = claimed_at + requested;
        let lease_expires_at = match self.lease_expires_at {
            Some(remote) => remote.min(local_deadline),
            None => local_deadline,
        };

        let mut problems = Vec::new();
        let runtime_node =
            decode_part::<RuntimeNode>(self.runtime_node, "runtimeNode", &mut problems);
        let spec =
            decode_part::<JobSpec>(self.payload, "payload", &mut problems).unwrap_or_default();

        Job {
            id: self.id,
            lease_expires_at,
            attempt: self.attempt,
            runtime_node,
            spec,
            spec_error: (!problems.is_empty()).then(|| problems.join("; ")),
        }
    }
}

/// Decodes an optional part of a claimed job, recording why it failed
fn decode_part<T: DeserializeOwned>(
    value: Value,
    field: &str,
    problems: &mut Vec<String>,
) -> Option<T> {
    match serde_json::from_value::<Option<T>>(value) {
        Ok(part) => part,
        Err(e) => {
            problems.push(format!("{}: {}", field, e));
            None
        }
    }
}

/// Request to extend the lease on a held job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub runner_id: String,
    pub extend_seconds: u64,
}

/// Heartbeat acknowledgment; the new deadline is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    #[serde(default, deserialize_with = "wire::opt_timestamp")]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

/// Terminal report for a job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJobRequest {
    pub runner_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub stage_trace: Vec<StageRecord>,
}

impl ReportJobRequest {
    pub fn new(runner_id: impl Into<String>, result: &ExecutionResult) -> Self {
        let (error_message, artifact) = match result.status {
            ExecutionStatus::Succeeded => (None, Some(result.detail.clone())),
            ExecutionStatus::Failed => (Some(result.detail.clone()), None),
        };

        Self {
            runner_id: runner_id.into(),
            status: result.status,
            error_message,
            artifact,
            stage_trace: result.stage_trace.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::{StageKind, StageStatus};

    #[test]
    fn test_claim_response_with_job() {
        let json = r#"{
            "code": 200,
            "message": "ok",
            "data": {
                "id": 17,
                "attempt": 2,
                "leaseExpiresAt": 1700000030000,
                "runtimeNode": {"agentBaseUrl": "http://10.0.0.5:7005"},
                "payload": {"appId": "42", "image": "registry/app:1"}
            }
        }"#;

        let envelope: ApiEnvelope<ClaimedJob> = serde_json::from_str(json).unwrap();
        assert!(envelope.is_ok());
        let claimed = envelope.data.unwrap();
        assert_eq!(claimed.id.as_str(), "17");
        assert_eq!(claimed.attempt, 2);

        let job = claimed.into_job(Utc::now(), Duration::seconds(30));
        assert!(job.spec_error.is_none());
        assert_eq!(job.spec.prebuilt_image(), Some("registry/app:1"));
        assert_eq!(job.agent_base_url(), Some("http://10.0.0.5:7005"));
    }

    #[test]
    fn test_envelope_without_data_field() {
        let envelope: ApiEnvelope<ClaimedJob> = serde_json::from_str(r#"{"code": 200}"#).unwrap();
        assert!(envelope.is_ok());
        assert!(envelope.data.is_none());
    }

    #[test]
    fn test_numeric_string_port_is_accepted() {
        let claimed: ClaimedJob = serde_json::from_value(serde_json::json!({
            "id": "j1",
            "payload": {"appId": 42, "containerPort": "8080"},
        }))
        .unwrap();

        let job = claimed.into_job(Utc::now(), Duration::seconds(30));
        assert!(job.spec_error.is_none());
        assert_eq!(job.spec.container_port(), 8080);
    }

    #[test]
    fn test_malformed_payload_still_yields_a_job() {
        let claimed: ClaimedJob = serde_json::from_value(serde_json::json!({
            "id": "j2",
            "attempt": "two",
            "leaseExpiresAt": "soon",
            "runtimeNode": {"agentBaseUrl": "http://10.0.0.5:7005"},
            "payload": {"appId": "42", "containerPort": 70000},
        }))
        .unwrap();
        let claimed_at = Utc::now();

        let job = claimed.into_job(claimed_at, Duration::seconds(30));
        assert_eq!(job.id.as_str(), "j2");
        assert_eq!(job.attempt, 0);
        assert_eq!(job.lease_expires_at, claimed_at + Duration::seconds(30));
        assert_eq!(job.spec, JobSpec::default());
        let reason = job.spec_error.unwrap();
        assert!(reason.starts_with("payload:"), "{}", reason);
        assert!(reason.contains("70000"), "{}", reason);
    }

    #[test]
    fn test_malformed_runtime_node_is_recorded() {
        let claimed: ClaimedJob = serde_json::from_value(serde_json::json!({
            "id": "j3",
            "runtimeNode": "10.0.0.5",
            "payload": {"appId": "42"},
        }))
        .unwrap();

        let job = claimed.into_job(Utc::now(), Duration::seconds(30));
        assert!(job.runtime_node.is_none());
        assert_eq!(job.spec.app_id.as_deref(), Some("42"));
        assert!(job.spec_error.unwrap().starts_with("runtimeNode:"));
    }

    #[test]
    fn test_claimed_job_without_id_is_rejected() {
        let parsed = serde_json::from_value::<ClaimedJob>(serde_json::json!({
            "payload": {"appId": "42"},
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_claim_response_without_job() {
        let envelope: ApiEnvelope<ClaimedJob> =
            serde_json::from_str(r#"{"code": 200, "data": null}"#).unwrap();
        assert!(envelope.data.is_none());

        let envelope: ApiEnvelope<ClaimedJob> =
            serde_json::from_str(r#"{"code": 500, "msg": "db down"}"#).unwrap();
        assert!(!envelope.is_ok());
        assert_eq!(envelope.message.as_deref(), Some("db down"));
    }

    #[test]
    fn test_into_job_never_extends_past_requested_lease() {
        let claimed_at = Utc::now();
        let claimed: ClaimedJob = serde_json::from_value(serde_json::json!({
            "id": "j1",
            "leaseExpiresAt": (claimed_at + Duration::hours(8)).to_rfc3339(),
        }))
        .unwrap();

        let job = claimed.into_job(claimed_at, Duration::seconds(30));
        assert_eq!(job.lease_expires_at, claimed_at + Duration::seconds(30));
    }

    #[test]
    fn test_into_job_honours_shorter_remote_lease() {
        let claimed_at = Utc::now();
        let remote = claimed_at + Duration::seconds(5);
        let claimed: ClaimedJob = serde_json::from_value(serde_json::json!({
            "id": "j1",
            "leaseExpiresAt": remote.timestamp_millis(),
        }))
        .unwrap();

        let job = claimed.into_job(claimed_at, Duration::seconds(30));
        assert_eq!(job.lease_expires_at.timestamp_millis(), remote.timestamp_millis());
    }

    #[test]
    fn test_into_job_without_remote_deadline() {
        let claimed_at = Utc::now();
        let claimed: ClaimedJob = serde_json::from_str(r#"{"id": "j9"}"#).unwrap();
        let job = claimed.into_job(claimed_at, Duration::seconds(30));
        assert_eq!(job.lease_expires_at, claimed_at + Duration::seconds(30));
        assert_eq!(job.attempt, 0);
    }

    #[test]
    fn test_report_request_success_shape() {
        let result = ExecutionResult::succeeded(
            "img:sha256:abc",
            vec![StageRecord::new(StageKind::Build, StageStatus::Success)],
        );
        let body = serde_json::to_value(ReportJobRequest::new("runner-01", &result)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "runnerId": "runner-01",
                "status": "SUCCEEDED",
                "artifact": "img:sha256:abc",
                "stageTrace": [{"stage": "build", "status": "success"}]
            })
        );
    }

    #[test]
    fn test_report_request_failure_shape() {
        let result = ExecutionResult::failed(
            "build: exit 1",
            vec![StageRecord::new(StageKind::Build, StageStatus::Failed)],
        );
        let body = serde_json::to_value(ReportJobRequest::new("runner-01", &result)).unwrap();
        assert_eq!(body["status"], "FAILED");
        assert_eq!(body["errorMessage"], "build: exit 1");
        assert!(body.get("artifact").is_none());
    }
}
