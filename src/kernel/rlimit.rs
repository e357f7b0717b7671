//! Memory ceiling and peak-memory accounting for the interpreter process.
//!
//! The ceiling is an address-space rlimit set on the running interpreter
//! once it has started: its virtual size at that point plus `limit_mb`. The
//! interpreter's own startup mappings therefore never count against the
//! caller's budget. Enforcement is advisory: platforms without `prlimit`
//! report `Unsupported`, and callers continue anyway. Stricter enforcement
//! (cgroups) is out of scope for this engine.
//!
//! The reported memory figure is the interpreter's peak resident set size,
//! which includes its startup footprint.

use serde::{Deserialize, Serialize};

/// Result of trying to apply the ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryLimitStatus {
    Applied { baseline_bytes: u64, bytes: u64 },
    Unsupported(String),
    Failed(String),
}

impl MemoryLimitStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, MemoryLimitStatus::Applied { .. })
    }
}

/// Platform capability, reported by `/health` and `/limits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimitSupport {
    pub enforced: bool,
    pub mechanism: String,
    pub note: String,
}

pub fn memory_limit_support() -> MemoryLimitSupport {
    if cfg!(target_os = "linux") {
        MemoryLimitSupport {
            enforced: true,
            mechanism: "rlimit_as".to_string(),
            note: "address-space rlimit of memory_limit_mb above the interpreter's startup footprint"
                .to_string(),
        }
    } else {
        MemoryLimitSupport {
            enforced: false,
            mechanism: "none".to_string(),
            note: "prlimit(RLIMIT_AS) is not available on this platform; memory_limit_mb is advisory"
                .to_string(),
        }
    }
}

/// Cap the address space of process `pid` at its current size plus `limit_mb`.
pub fn apply_memory_ceiling(pid: u32, limit_mb: u64) -> MemoryLimitStatus {
    let headroom = limit_mb.saturating_mul(1024 * 1024);

    #[cfg(target_os = "linux")]
    {
        let Some(baseline_bytes) = address_space_bytes(pid) else {
            return MemoryLimitStatus::Failed(format!(
                "cannot read address space size of pid {}",
                pid
            ));
        };
        let bytes = baseline_bytes.saturating_add(headroom);
        let limit = libc::rlimit {
            rlim_cur: bytes as libc::rlim_t,
            rlim_max: bytes as libc::rlim_t,
        };
        let rc = unsafe {
            libc::prlimit(
                pid as libc::pid_t,
                libc::RLIMIT_AS,
                &limit,
                std::ptr::null_mut(),
            )
        };
        if rc == 0 {
            MemoryLimitStatus::Applied {
                baseline_bytes,
                bytes,
            }
        } else {
            MemoryLimitStatus::Failed(format!(
                "prlimit(RLIMIT_AS) failed: {}",
                std::io::Error::last_os_error()
            ))
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = (pid, headroom);
        MemoryLimitStatus::Unsupported(memory_limit_support().note)
    }
}

/// Virtual size of process `pid`, from `/proc/<pid>/statm`.
#[cfg(target_os = "linux")]
fn address_space_bytes(pid: u32) -> Option<u64> {
    let statm = std::fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
    let pages: u64 = statm.split_whitespace().next()?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(pages.saturating_mul(page_size as u64))
}

/// Largest peak resident set size among reaped children, in MB.
pub fn peak_child_memory_mb() -> f64 {
    use nix::sys::resource::{getrusage, UsageWho};

    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => {
            let max_rss = usage.max_rss().max(0) as f64;
            // ru_maxrss is bytes on macOS and kilobytes elsewhere.
            if cfg!(target_os = "macos") {
                max_rss / (1024.0 * 1024.0)
            } else {
                max_rss / 1024.0
            }
        }
        Err(e) => {
            log::debug!("getrusage failed: {}", e);
            0.0
        }
    }
}
