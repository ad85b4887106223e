//! Core domain types
//!
//! These types describe a claimed job and the outcome of running it. They are
//! produced by the client (claim) and consumed by the runner (execute/report).

pub mod job;
pub mod result;
