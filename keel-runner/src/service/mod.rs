//! Service layer
//!
//! Business logic of a single job: planning its stages, running them under
//! the lease, and delivering the result. Stage execution goes through the
//! [`StageRunner`] capability so the executor can be tested with fakes.

mod executor;
pub mod plan;
mod reporter;
pub mod stages;

pub use executor::ActionExecutor;
pub use reporter::{ReportOutcome, Reporter};
pub use stages::{StageRunner, ToolchainStageRunner};
