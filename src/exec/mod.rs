//! Execution control
//!
//! Ties the launcher and reconciler into the synchronous `execute` entry point.

pub mod executor;

pub use executor::{execute, Executor};
