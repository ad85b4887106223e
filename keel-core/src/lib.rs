//! Keel Core
//!
//! Core types shared by the Keel runner and its control-plane client.
//!
//! This crate contains:
//! - Domain types: jobs, leases, execution results and stage traces
//! - DTOs: request/response bodies exchanged with the control plane and
//!   the deployment agent
//! - Wire helpers for the loosely-typed JSON the control plane emits

pub mod domain;
pub mod dto;
pub mod wire;
