//! Result delivery
//!
//! Wraps a [`ReportClient`] with a bounded retry budget. Delivery never
//! fails the loop: once the budget is spent the outcome is logged and the
//! runner moves on to the next claim.

use keel_core::domain::job::JobId;
use keel_core::domain::result::ExecutionResult;
use std::sync::Arc;
use tracing::{error, info};

use crate::backoff::{self, RetryPolicy};
use crate::repository::ReportClient;

/// What happened to a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The control plane acknowledged the report
    Delivered { attempts: u32 },
    /// Budget exhausted or report rejected outright
    Undeliverable { attempts: u32, error: String },
}

pub struct Reporter {
    client: Arc<dyn ReportClient>,
    policy: RetryPolicy,
}

impl Reporter {
    pub fn new(client: Arc<dyn ReportClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Delivers `result` for `job_id`, retrying transient failures
    pub async fn deliver(&self, job_id: &JobId, result: &ExecutionResult) -> ReportOutcome {
        let what = format!("report for job {}", job_id);
        let (sent, attempts) =
            backoff::retry(&self.policy, &what, || self.client.report(job_id, result)).await;

        match sent {
            Ok(()) => {
                info!(
                    "Reported job {} as {} (attempts: {})",
                    job_id, result.status, attempts
                );
                ReportOutcome::Delivered { attempts }
            }
            Err(e) => {
                error!(
                    "Giving up on report for job {} ({}: {}) after {} attempt(s): {}",
                    job_id, result.status, result.detail, attempts, e
                );
                ReportOutcome::Undeliverable {
                    attempts,
                    error: e.to_string(),
                }
            }
        }
    }
}
