//! Job loop
//!
//! Claims one job at a time from the control plane, executes it and reports
//! the result. A cycle is always awaited to completion before the next claim,
//! so at most one job is in flight per runner.
//!
//! While a job executes, a renewal task extends its lease every half lease
//! duration. The task is aborted as soon as execution ends.

use chrono::Utc;
use keel_core::domain::job::JobId;
use keel_core::domain::result::{ExecutionOutcome, format_trace};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::lease::{LeaseHandle, lease_window};
use crate::repository::LeaseClient;
use crate::service::{ActionExecutor, ReportOutcome, Reporter};

/// Log an error (rather than a warning) every this many failed claims in a row
const CLAIM_FAILURE_ESCALATION: u32 = 10;

/// Floor on the renewal period for very short leases
const MIN_RENEWAL_PERIOD: Duration = Duration::from_millis(100);

/// How one claim → execute → report pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    NoJob,
    ClaimFailed,
    Reported,
    Undeliverable,
    Abandoned,
}

/// Single-flight job loop
pub struct JobLoop {
    lease_client: Arc<dyn LeaseClient>,
    executor: ActionExecutor,
    reporter: Reporter,
    poll_interval: Duration,
    lease_duration: Duration,
    lease_renewal: bool,
    shutdown_grace: Duration,
}

/// Lease renewal running next to the job; aborted on drop
struct RenewalTask(JoinHandle<()>);

impl Drop for RenewalTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl JobLoop {
    pub fn new(
        config: &Config,
        lease_client: Arc<dyn LeaseClient>,
        executor: ActionExecutor,
        reporter: Reporter,
    ) -> Self {
        Self {
            lease_client,
            executor,
            reporter,
            poll_interval: config.poll_interval,
            lease_duration: config.lease_duration,
            lease_renewal: config.lease_renewal,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Runs cycles until `shutdown` flips to true (or its sender goes away)
    ///
    /// A cycle in flight when shutdown is requested gets `shutdown_grace` to
    /// finish; after that it is dropped, which kills its child processes and
    /// removes its workspace.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting job loop (poll interval: {:?}, lease: {:?}, renewal: {})",
            self.poll_interval, self.lease_duration, self.lease_renewal
        );

        let mut claim_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let cycle = self.run_cycle();
            tokio::pin!(cycle);

            let mut stopping = false;
            let outcome = tokio::select! {
                outcome = &mut cycle => outcome,
                _ = shutdown_requested(&mut shutdown) => {
                    stopping = true;
                    info!(
                        "Shutdown requested; waiting up to {:?} for the current cycle",
                        self.shutdown_grace
                    );
                    match time::timeout(self.shutdown_grace, &mut cycle).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!("Cycle still running after shutdown grace; dropping it");
                            break;
                        }
                    }
                }
            };

            if outcome == CycleOutcome::ClaimFailed {
                claim_failures += 1;
                if claim_failures % CLAIM_FAILURE_ESCALATION == 0 {
                    error!(
                        "{} consecutive claim failures; control plane may be down",
                        claim_failures
                    );
                }
            } else {
                if claim_failures > 0 {
                    info!("Control plane reachable again after {} failed claim(s)", claim_failures);
                }
                claim_failures = 0;
            }

            if stopping {
                break;
            }

            tokio::select! {
                _ = time::sleep(self.poll_interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!("Job loop stopped");
    }

    /// Performs one claim → execute → report pass
    pub async fn run_cycle(&self) -> CycleOutcome {
        let job = match self.lease_client.claim().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("No job available");
                return CycleOutcome::NoJob;
            }
            Err(e) => {
                warn!("Failed to claim job: {}", e);
                return CycleOutcome::ClaimFailed;
            }
        };

        info!(
            "Claimed job {} (attempt {}), lease until {}",
            job.id, job.attempt, job.lease_expires_at
        );

        if job.lease_expired_at(Utc::now()) {
            warn!(
                "Lease on job {} had already lapsed when the claim arrived; abandoning",
                job.id
            );
            return CycleOutcome::Abandoned;
        }

        let (handle, lease) = lease_window(job.lease_expires_at);
        let renewal = self
            .lease_renewal
            .then(|| self.spawn_renewal(job.id.clone(), handle));

        let outcome = self.executor.execute(&job, lease).await;
        drop(renewal);
        debug!(
            "Job {} execution ended, trace={}",
            job.id,
            format_trace(outcome.stage_trace())
        );

        match outcome {
            ExecutionOutcome::Abandoned { .. } => CycleOutcome::Abandoned,
            ExecutionOutcome::Finished(result) => {
                match self.reporter.deliver(&job.id, &result).await {
                    ReportOutcome::Delivered { .. } => CycleOutcome::Reported,
                    ReportOutcome::Undeliverable { .. } => CycleOutcome::Undeliverable,
                }
            }
        }
    }

    fn spawn_renewal(&self, job_id: JobId, handle: LeaseHandle) -> RenewalTask {
        let client = Arc::clone(&self.lease_client);
        let period = (self.lease_duration / 2).max(MIN_RENEWAL_PERIOD);

        RenewalTask(tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; the claim itself just set the lease
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match client.renew(&job_id).await {
                    Ok(expires_at) => {
                        debug!("Renewed lease on job {} until {}", job_id, expires_at);
                        handle.extend_to(expires_at);
                    }
                    Err(e) => warn!(
                        "Failed to renew lease on job {}: {}; current deadline stands",
                        job_id, e
                    ),
                }
            }
        }))
    }
}

/// Resolves once shutdown is requested or the sender is dropped
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
