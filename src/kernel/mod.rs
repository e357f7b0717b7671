//! OS primitives used by the engine
//!
//! Resource ceilings and signal delivery for worker processes.

pub mod rlimit;
pub mod signal;
