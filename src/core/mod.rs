//! Process model of the engine.
//!
//! One worker process per execution: `launcher` spawns it bound to a fresh
//! result channel (`channel`), `worker` is what runs inside it and drives
//! the Python `interpreter`, and `reconciler` waits under the deadline and
//! rebuilds a typed result.

pub mod channel;
pub mod interpreter;
pub mod launcher;
pub mod reconciler;
pub mod types;
pub mod worker;
