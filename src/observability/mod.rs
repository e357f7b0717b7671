//! Observability
//!
//! Audit records for executions served over the API.

pub mod audit;
