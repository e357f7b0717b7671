//! Signal delivery for worker termination
//!
//! Workers run as leaders of their own process group, so termination
//! targets the group first and falls back to the single pid.

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// Outcome of one signal delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered to the whole process group
    Group,
    /// Group delivery failed; delivered to the leader pid only
    Leader { group_error: String },
    /// Target already gone
    Gone,
}

/// Send `signal` to the process group led by `pid`.
pub fn signal_worker_group(pid: i32, signal: Signal) -> Delivery {
    let target = Pid::from_raw(pid);
    match killpg(target, signal) {
        Ok(()) => Delivery::Group,
        Err(group_err) => match kill(target, signal) {
            Ok(()) => Delivery::Leader {
                group_error: group_err.to_string(),
            },
            Err(_) => Delivery::Gone,
        },
    }
}

/// Graceful termination request.
pub fn request_termination(pid: i32) -> Delivery {
    signal_worker_group(pid, Signal::SIGTERM)
}

/// Forced termination; cannot be caught by the worker.
pub fn force_kill(pid: i32) -> Delivery {
    signal_worker_group(pid, Signal::SIGKILL)
}
