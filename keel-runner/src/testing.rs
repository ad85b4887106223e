//! Test doubles for the runner's capability traits

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keel_client::ClientError;
use keel_core::domain::job::{Job, JobId, JobSpec, RuntimeNode};
use keel_core::domain::result::{ExecutionResult, StageKind};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::config::RegistryConfig;
use crate::repository::{LeaseClient, ReportClient};
use crate::service::plan::Stage;
use crate::service::stages::{StageOutcome, StageRunner};

pub fn registry() -> RegistryConfig {
    RegistryConfig {
        registry: Some("registry.example.com".to_string()),
        ..RegistryConfig::default()
    }
}

pub fn job_with(id: &str, spec: JobSpec, lease: ChronoDuration) -> Job {
    Job {
        id: JobId::new(id),
        lease_expires_at: Utc::now() + lease,
        attempt: 0,
        runtime_node: Some(RuntimeNode {
            agent_base_url: Some("http://agent:7005".to_string()),
        }),
        spec,
        spec_error: None,
    }
}

pub fn git_spec() -> JobSpec {
    JobSpec {
        app_id: Some("42".to_string()),
        user_id: Some("7".to_string()),
        repo_ssh_url: Some("git@git.example.com:u7/app42.git".to_string()),
        ..JobSpec::default()
    }
}

/// Git-build job with a 30s lease
pub fn git_job(id: &str) -> Job {
    job_with(id, git_spec(), ChronoDuration::seconds(30))
}

/// Prebuilt-image job with a 30s lease
pub fn prebuilt_job(id: &str) -> Job {
    let spec = JobSpec {
        app_id: Some("42".to_string()),
        image: Some("registry.example.com/funai/app42:v1".to_string()),
        ..JobSpec::default()
    };
    job_with(id, spec, ChronoDuration::seconds(30))
}

/// Stage runner that sleeps and answers per stage kind
#[derive(Default)]
pub struct FakeStageRunner {
    delays: HashMap<StageKind, Duration>,
    blocking: HashMap<StageKind, Duration>,
    outcomes: HashMap<StageKind, StageOutcome>,
    calls: Mutex<Vec<StageKind>>,
    completed: Mutex<Vec<StageKind>>,
}

impl FakeStageRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, kind: StageKind, delay: Duration) -> Self {
        self.delays.insert(kind, delay);
        self
    }

    /// Blocks the thread instead of yielding, so the stage only returns
    /// once the delay is over, whatever else is racing it
    pub fn with_blocking_delay(mut self, kind: StageKind, delay: Duration) -> Self {
        self.blocking.insert(kind, delay);
        self
    }

    pub fn with_outcome(mut self, kind: StageKind, outcome: StageOutcome) -> Self {
        self.outcomes.insert(kind, outcome);
        self
    }

    /// Stages that were started
    pub fn calls(&self) -> Vec<StageKind> {
        self.calls.lock().unwrap().clone()
    }

    /// Stages that ran to the end of their delay
    pub fn completed(&self) -> Vec<StageKind> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageRunner for FakeStageRunner {
    async fn run(&self, stage: &Stage) -> StageOutcome {
        let kind = stage.kind();
        self.calls.lock().unwrap().push(kind);

        if let Some(delay) = self.delays.get(&kind) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(delay) = self.blocking.get(&kind) {
            std::thread::sleep(*delay);
        }

        self.completed.lock().unwrap().push(kind);
        self.outcomes
            .get(&kind)
            .cloned()
            .unwrap_or_else(StageOutcome::succeeded)
    }
}

/// Lease client replaying scripted claim responses
///
/// Once the script runs out every claim returns "no job".
#[derive(Default)]
pub struct FakeLeaseClient {
    claims: Mutex<VecDeque<Result<Option<Job>, ClientError>>>,
    claim_calls: AtomicU32,
    renew_calls: AtomicU32,
    renew_fails: AtomicBool,
    renew_by: Mutex<Option<ChronoDuration>>,
}

impl FakeLeaseClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_job(&self, job: Job) -> &Self {
        self.claims.lock().unwrap().push_back(Ok(Some(job)));
        self
    }

    pub fn push_error(&self, error: ClientError) -> &Self {
        self.claims.lock().unwrap().push_back(Err(error));
        self
    }

    /// Each successful renewal moves the deadline to now + `by`
    pub fn renew_by(&self, by: ChronoDuration) -> &Self {
        *self.renew_by.lock().unwrap() = Some(by);
        self
    }

    pub fn fail_renewals(&self) -> &Self {
        self.renew_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn claim_calls(&self) -> u32 {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> u32 {
        self.renew_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseClient for FakeLeaseClient {
    async fn claim(&self) -> Result<Option<Job>, ClientError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        self.claims.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn renew(&self, _job_id: &JobId) -> Result<DateTime<Utc>, ClientError> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        if self.renew_fails.load(Ordering::SeqCst) {
            return Err(ClientError::api_error(503, "unavailable"));
        }
        let by = *self.renew_by.lock().unwrap();
        Ok(Utc::now() + by.unwrap_or_else(|| ChronoDuration::seconds(30)))
    }
}

/// Report client failing a scripted number of times before accepting
#[derive(Default)]
pub struct FakeReportClient {
    failures: Mutex<VecDeque<ClientError>>,
    attempts: AtomicU32,
    delivered: Mutex<Vec<(JobId, ExecutionResult)>>,
}

impl FakeReportClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: ClientError) -> &Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Reports that were accepted, in order
    pub fn delivered(&self) -> Vec<(JobId, ExecutionResult)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportClient for FakeReportClient {
    async fn report(&self, job_id: &JobId, result: &ExecutionResult) -> Result<(), ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.delivered
            .lock()
            .unwrap()
            .push((job_id.clone(), result.clone()));
        Ok(())
    }
}
