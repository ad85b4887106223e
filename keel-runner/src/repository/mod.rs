//! Repository layer
//!
//! Repositories are thin adapters over the control-plane HTTP client. They
//! make exactly one request per call and carry no retry policy; the job loop
//! and the reporter decide what to do with a failure.
//!
//! All repositories are trait-based so the job loop can be tested with fakes.

mod lease;
mod report;

// Re-export traits
pub use lease::LeaseClient;
pub use report::ReportClient;

// Re-export implementations
pub use lease::HttpLeaseClient;
pub use report::HttpReportClient;
