//! Action executor
//!
//! Runs the stages of one claimed job in order and turns what happened into
//! an [`ExecutionOutcome`]. The lease is checked before every stage, raced
//! while the stage runs and checked again once it returns: a job whose lease
//! lapsed is abandoned, never reported as succeeded.

use keel_core::domain::job::Job;
use keel_core::domain::result::{
    ExecutionOutcome, ExecutionResult, StageKind, StageRecord, StageStatus, format_trace,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{RegistryConfig, StageTimeouts};
use crate::lease::LeaseWindow;
use crate::service::plan::DeploymentPlan;
use crate::service::stages::{StageOutcome, StageRunner};

pub struct ActionExecutor {
    runner: Arc<dyn StageRunner>,
    timeouts: StageTimeouts,
    registry: RegistryConfig,
}

/// How one stage attempt ended, as seen by the executor
enum StageEnd {
    Done(StageOutcome),
    TimedOut,
    LeaseLost,
}

impl ActionExecutor {
    pub fn new(runner: Arc<dyn StageRunner>, timeouts: StageTimeouts, registry: RegistryConfig) -> Self {
        Self {
            runner,
            timeouts,
            registry,
        }
    }

    /// Executes `job` while `lease` holds
    pub async fn execute(&self, job: &Job, mut lease: LeaseWindow) -> ExecutionOutcome {
        let plan = match DeploymentPlan::from_job(job, &self.registry) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Job {} has an invalid spec: {}", job.id, e);
                return ExecutionOutcome::Finished(ExecutionResult::failed(
                    format!("invalid job spec: {}", e),
                    Vec::new(),
                ));
            }
        };

        info!(
            "Executing job {} (attempt {}): stages={:?} image={}",
            job.id,
            job.attempt,
            plan.stage_kinds(),
            plan.image
        );

        let mut trace: Vec<StageRecord> = Vec::with_capacity(plan.stages.len());
        let mut artifact: Option<String> = None;

        for stage in &plan.stages {
            let kind = stage.kind();

            if lease.is_expired() {
                return abandon(job, kind, trace);
            }

            let timeout = self.timeouts.for_stage(kind);
            debug!("Job {}: starting stage {} (timeout {:?})", job.id, kind, timeout);

            let end = tokio::select! {
                biased;
                result = tokio::time::timeout(timeout, self.runner.run(stage)) => match result {
                    Ok(outcome) => StageEnd::Done(outcome),
                    Err(_) => StageEnd::TimedOut,
                },
                _ = lease.expired() => StageEnd::LeaseLost,
            };

            // A stage may return after the deadline without the race noticing
            if lease.is_expired() {
                return abandon(job, kind, trace);
            }

            match end {
                StageEnd::LeaseLost => return abandon(job, kind, trace),
                StageEnd::TimedOut => {
                    return fail(job, kind, format!("timed out after {:?}", timeout), trace);
                }
                StageEnd::Done(StageOutcome::Failed { diagnostic }) => {
                    return fail(job, kind, diagnostic, trace);
                }
                StageEnd::Done(StageOutcome::Succeeded { artifact: produced }) => {
                    trace.push(StageRecord::new(kind, StageStatus::Success));
                    if produced.is_some() {
                        artifact = produced;
                    }
                    debug!("Job {}: stage {} succeeded", job.id, kind);
                }
            }
        }

        let detail = artifact.unwrap_or(plan.image);
        info!(
            "Job {} succeeded: artifact={} trace={}",
            job.id,
            detail,
            format_trace(&trace)
        );
        ExecutionOutcome::Finished(ExecutionResult::succeeded(detail, trace))
    }
}

fn fail(job: &Job, kind: StageKind, diagnostic: String, mut trace: Vec<StageRecord>) -> ExecutionOutcome {
    trace.push(StageRecord::new(kind, StageStatus::Failed));
    let detail = format!("{}: {}", kind, diagnostic);
    warn!("Job {} failed: {} trace={}", job.id, detail, format_trace(&trace));
    ExecutionOutcome::Finished(ExecutionResult::failed(detail, trace))
}

fn abandon(job: &Job, kind: StageKind, mut trace: Vec<StageRecord>) -> ExecutionOutcome {
    trace.push(StageRecord::new(kind, StageStatus::Skipped));
    warn!(
        "Lease on job {} lapsed at stage {}; abandoning without report, trace={}",
        job.id,
        kind,
        format_trace(&trace)
    );
    ExecutionOutcome::Abandoned {
        stage: kind,
        stage_trace: trace,
    }
}
