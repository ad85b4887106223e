//! Execution result types

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed stages of a deployment, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Build,
    Push,
    Deploy,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Build => "build",
            StageKind::Push => "push",
            StageKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failed,
    /// Not run (or interrupted) because the lease ran out
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Success => write!(f, "success"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One entry of a stage trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub status: StageStatus,
}

impl StageRecord {
    pub fn new(stage: StageKind, status: StageStatus) -> Self {
        Self { stage, status }
    }
}

impl fmt::Display for StageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stage, self.status)
    }
}

/// Renders a trace as `[build:success, push:failed]` for logs
pub fn format_trace(trace: &[StageRecord]) -> String {
    let entries: Vec<String> = trace.iter().map(ToString::to_string).collect();
    format!("[{}]", entries.join(", "))
}

/// Terminal status reported to the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of running a job's stages
///
/// `detail` holds the artifact reference on success and a
/// `"<stage>: <diagnostic>"` message on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub detail: String,
    pub stage_trace: Vec<StageRecord>,
}

impl ExecutionResult {
    pub fn succeeded(artifact: impl Into<String>, stage_trace: Vec<StageRecord>) -> Self {
        Self {
            status: ExecutionStatus::Succeeded,
            detail: artifact.into(),
            stage_trace,
        }
    }

    pub fn failed(detail: impl Into<String>, stage_trace: Vec<StageRecord>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            detail: detail.into(),
            stage_trace,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

/// What the executor hands back to the job loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Ran to a definitive result that must be reported
    Finished(ExecutionResult),
    /// The lease lapsed before, during or right after `stage`
    Abandoned {
        stage: StageKind,
        stage_trace: Vec<StageRecord>,
    },
}

impl ExecutionOutcome {
    pub fn stage_trace(&self) -> &[StageRecord] {
        match self {
            ExecutionOutcome::Finished(result) => &result.stage_trace,
            ExecutionOutcome::Abandoned { stage_trace, .. } => stage_trace,
        }
    }
}
