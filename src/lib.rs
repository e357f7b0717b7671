//! snipbox: bounded execution of untrusted code snippets
//!
//! Each snippet runs in its own worker process under a wall-clock timeout and
//! a memory ceiling; the caller always gets back a typed result.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Executor config, request/result types and the closed `ErrorKind`
//! - [`config::validator`]: Server-wide bounds and their validation
//! - [`config::settings`]: JSON server configuration
//!
//! ## Process Model ([`core`])
//! - [`core::launcher`]: One worker process per execution
//! - [`core::channel`]: One-shot result channel on a dedicated descriptor
//! - [`core::worker`]: Body of the worker process
//! - [`core::interpreter`]: Python interpreter discovery and the snippet bootstrap
//! - [`core::reconciler`]: Deadline wait, termination escalation, typed result
//!
//! ## Execution Control ([`exec`])
//! - [`exec::executor`]: The synchronous `execute` entry point
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimit`]: Memory ceiling and peak memory accounting
//! - [`kernel::signal`]: Process group signalling
//!
//! ## Adapters
//! - [`server`]: HTTP API (axum)
//! - [`observability::audit`]: Audit records
//! - [`cli`]: `snipbox` binary wiring

// Configuration & Policy
pub mod config;

// Worker process model
pub mod core;

// Execution Control
pub mod exec;

// Kernel Primitives
pub mod kernel;

// Observability
pub mod observability;

// HTTP adapter
pub mod server;

// CLI entrypoint wiring for the snipbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::{execute, Executor};
