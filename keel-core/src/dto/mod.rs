//! Data Transfer Objects
//!
//! Request and response bodies exchanged with the control plane and the
//! deployment agent. Field names follow the camelCase JSON those services use.

pub mod agent;
pub mod job;
