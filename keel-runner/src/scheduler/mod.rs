//! Scheduler layer for the runner
//!
//! Drives the claim → execute → report cycle against the control plane and
//! owns the lease of the job in flight.

mod job_loop;

pub use job_loop::{CycleOutcome, JobLoop};
