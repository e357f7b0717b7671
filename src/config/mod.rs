//! Configuration and policy
//!
//! Executor configuration, server bounds, and their validation.

pub mod settings;
pub mod types;
pub mod validator;
