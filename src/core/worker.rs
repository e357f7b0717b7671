//! Worker role: the body of the spawned process.
//!
//! Reads one `WorkerLaunchRequest` from stdin, starts the Python interpreter
//! with the bootstrap, caps the interpreter's address space once it is up,
//! hands it the snippet and writes exactly one `RawWorkerOutcome` to the
//! status descriptor. The interpreter inherits the worker's process group,
//! so the reconciler's group signals reach both.

use crate::config::types::{ErrorKind, Result, SnipboxError};
use crate::core::channel::{
    drain_bounded, read_json, write_json, write_outcome_to_fd, DIAGNOSTIC_LIMIT,
};
use crate::core::interpreter::{self, InterpreterReport, READY_LINE};
use crate::core::types::{RawWorkerOutcome, WorkerLaunchRequest};
use crate::kernel::rlimit::{apply_memory_ceiling, peak_child_memory_mb, MemoryLimitStatus};
use std::io::{BufRead, BufReader};
use std::os::fd::RawFd;
use std::process::{Child, Command, Stdio};

/// Exit status after the outcome was written.
pub const EXIT_OUTCOME_WRITTEN: i32 = 0;
/// Exit status when no outcome could be delivered.
pub const EXIT_INTERNAL_FAILURE: i32 = 70;

/// Marker the interpreter prints when it dies on a failed allocation.
const MEMORY_ERROR_MARKER: &str = "MemoryError";

fn failure(kind: ErrorKind, message: impl Into<String>) -> RawWorkerOutcome {
    RawWorkerOutcome {
        success: false,
        error_kind: Some(kind.as_str().to_string()),
        error_message: Some(message.into()),
        memory_used_mb: peak_child_memory_mb(),
        ..RawWorkerOutcome::default()
    }
}

/// Outcome for an interpreter that exited without a report.
fn unreported(child: &mut Child, diagnostics: String, limit_applied: bool) -> RawWorkerOutcome {
    let status = match child.wait() {
        Ok(status) => status.to_string(),
        Err(e) => format!("unknown status ({})", e),
    };
    let kind = if diagnostics.contains(MEMORY_ERROR_MARKER) {
        ErrorKind::MemoryLimit
    } else {
        ErrorKind::ExecutionFailed
    };
    RawWorkerOutcome {
        stderr: diagnostics,
        memory_limit_applied: limit_applied,
        ..failure(
            kind,
            format!("interpreter ended ({}) without reporting an outcome", status),
        )
    }
}

/// Run one launch request to completion under a fresh interpreter.
pub fn execute_launch(launch: WorkerLaunchRequest) -> RawWorkerOutcome {
    let spawned = Command::new(&launch.interpreter)
        .args(interpreter::bootstrap_args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return failure(
                ErrorKind::ExecutionFailed,
                format!(
                    "failed to start interpreter {}: {}",
                    launch.interpreter.display(),
                    e
                ),
            )
        }
    };

    let diagnostics = child
        .stderr
        .take()
        .map(|stderr| drain_bounded(stderr, DIAGNOSTIC_LIMIT));
    let collect = |handle: Option<std::thread::JoinHandle<String>>| {
        handle.and_then(|h| h.join().ok()).unwrap_or_default()
    };

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.kill();
        return unreported(&mut child, collect(diagnostics), false);
    };
    let mut reports = BufReader::new(stdout);

    let mut ready = String::new();
    if reports.read_line(&mut ready).is_err() || ready.trim_end() != READY_LINE {
        drop(stdin);
        let _ = child.kill();
        return unreported(&mut child, collect(diagnostics), false);
    }

    let ceiling = apply_memory_ceiling(child.id(), launch.memory_limit_mb);
    match &ceiling {
        MemoryLimitStatus::Applied {
            baseline_bytes,
            bytes,
        } => log::debug!(
            "address-space ceiling for execution {} set to {} bytes (baseline {})",
            launch.execution_id,
            bytes,
            baseline_bytes
        ),
        MemoryLimitStatus::Unsupported(reason) | MemoryLimitStatus::Failed(reason) => {
            log::warn!(
                "memory ceiling of {} MB not enforced by the OS: {}",
                launch.memory_limit_mb,
                reason
            )
        }
    }
    let limit_applied = ceiling.is_applied();

    if let Err(e) = write_json(stdin, &launch.request) {
        log::warn!("failed to hand snippet to interpreter: {}", e);
    }

    let report = read_json::<InterpreterReport, _>(&mut reports);
    let report = match report {
        Ok(Some(report)) => report,
        Ok(None) => return unreported(&mut child, collect(diagnostics), limit_applied),
        Err(e) => {
            log::warn!("unreadable interpreter report: {}", e);
            return unreported(&mut child, collect(diagnostics), limit_applied);
        }
    };

    if let Err(e) = child.wait() {
        log::warn!("failed to reap interpreter: {}", e);
    }
    let stray = collect(diagnostics);
    if !stray.is_empty() {
        log::debug!("interpreter diagnostics: {}", stray.trim_end());
    }

    outcome_from_report(
        report,
        launch.request.capture_final_locals,
        peak_child_memory_mb(),
        limit_applied,
    )
}

fn outcome_from_report(
    report: InterpreterReport,
    capture_final_locals: bool,
    memory_used_mb: f64,
    memory_limit_applied: bool,
) -> RawWorkerOutcome {
    if report.success {
        return RawWorkerOutcome {
            success: true,
            stdout: report.stdout,
            stderr: report.stderr,
            memory_used_mb,
            final_locals: if capture_final_locals {
                Some(report.final_locals.unwrap_or_default())
            } else {
                None
            },
            error_kind: None,
            error_message: None,
            memory_limit_applied,
        };
    }

    let class = report.error_class.unwrap_or_default();
    RawWorkerOutcome {
        success: false,
        stdout: report.stdout,
        stderr: report.stderr,
        memory_used_mb,
        final_locals: None,
        error_kind: Some(interpreter::classify(&class).as_str().to_string()),
        error_message: Some(report.error_message.unwrap_or(class)),
        memory_limit_applied,
    }
}

fn read_launch_request() -> Result<WorkerLaunchRequest> {
    read_json(std::io::stdin().lock())?
        .ok_or_else(|| SnipboxError::Channel("no launch request on stdin".to_string()))
}

/// Keep the status descriptor out of the interpreter.
fn seal_status_fd(fd: RawFd) {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
        log::warn!("failed to mark status descriptor close-on-exec: {}", e);
    }
}

/// Entry point for `--internal-role worker`.
pub fn run_worker_main(status_fd: RawFd) -> ! {
    seal_status_fd(status_fd);

    let outcome = match read_launch_request() {
        Ok(launch) => execute_launch(launch),
        Err(err) => failure(
            ErrorKind::ExecutionFailed,
            format!("invalid launch request: {}", err),
        ),
    };

    let code = match write_outcome_to_fd(status_fd, &outcome) {
        Ok(()) => EXIT_OUTCOME_WRITTEN,
        Err(err) => {
            eprintln!("snipbox worker: failed to report outcome: {}", err);
            EXIT_INTERNAL_FAILURE
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Bindings, ExecutionRequest};
    use crate::core::interpreter::resolve_python_program;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn launch(code: &str) -> WorkerLaunchRequest {
        WorkerLaunchRequest {
            execution_id: "test".to_string(),
            memory_limit_mb: 256,
            interpreter: resolve_python_program(),
            request: ExecutionRequest::new(code),
        }
    }

    #[test]
    fn success_outcome_respects_capture_flag() {
        let outcome = execute_launch(launch("x = 2\nprint(x)"));
        assert!(outcome.success);
        assert_eq!(outcome.stdout, "2\n");
        assert!(outcome.final_locals.is_none());
        assert!(outcome.memory_used_mb > 0.0);

        let mut captured = launch("x = 2");
        captured.request.capture_final_locals = true;
        let outcome = execute_launch(captured);
        let mut expected = Bindings::new();
        expected.insert("x".to_string(), json!(2));
        assert_eq!(outcome.final_locals, Some(expected));
    }

    #[test]
    fn faults_become_tagged_outcomes() {
        let outcome = execute_launch(launch("print('partial')\nint('abc')"));
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind.as_deref(), Some("VALUE"));
        assert_eq!(outcome.stdout, "partial\n");
        assert!(outcome
            .error_message
            .unwrap()
            .contains("invalid literal for int()"));

        let outcome = execute_launch(launch("1 / 0"));
        assert_eq!(outcome.error_kind.as_deref(), Some("ZERO_DIVISION"));
    }

    #[test]
    fn full_language_is_available() {
        let code = r#"
squares = [n * n for n in range(5) if n % 2 == 0]
double = lambda v: v * 2

class Counter:
    def __init__(self):
        self.total = 0

    def add(self, v):
        self.total += v
        return self

try:
    {}['missing']
except KeyError as exc:
    caught = str(exc)

def fact(n):
    return 1 if n <= 1 else n * fact(n - 1)

print(f"{squares} {double(21)} {Counter().add(3).total} {caught} {fact(5)}")
"#;
        let outcome = execute_launch(launch(code));
        assert!(outcome.success, "{:?}", outcome.error_message);
        assert_eq!(outcome.stdout, "[0, 4, 16] 42 3 'missing' 120\n");
    }

    #[test]
    fn rounding_uses_binary_floats() {
        let outcome = execute_launch(launch("print(round(2.675, 2))"));
        assert_eq!(outcome.stdout, "2.67\n");
    }

    #[test]
    fn empty_sequence_repetition_is_immediate() {
        let started = Instant::now();
        let outcome = execute_launch(launch("x = [] * 10**18\nprint(len(x))"));
        assert!(outcome.success);
        assert_eq!(outcome.stdout, "0\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn hex_escapes_are_decoded() {
        let outcome = execute_launch(launch(r"print('a\x41')"));
        assert_eq!(outcome.stdout, "aA\n");
    }

    #[test]
    fn oversized_allocation_is_a_memory_fault() {
        let outcome = execute_launch(launch("x = bytearray(2 * 1024 ** 3)"));
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind.as_deref(), Some("MEMORY_LIMIT"));
        assert!(outcome.memory_limit_applied);
    }

    #[test]
    fn missing_interpreter_is_an_execution_failure() {
        let mut missing = launch("print(1)");
        missing.interpreter = PathBuf::from("/nonexistent/python3");
        let outcome = execute_launch(missing);
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind.as_deref(), Some("EXECUTION_FAILED"));
        assert!(outcome
            .error_message
            .unwrap()
            .contains("failed to start interpreter"));
    }

    #[test]
    fn report_without_class_keeps_execution_failed() {
        let report = InterpreterReport {
            success: false,
            stdout: "out".to_string(),
            ..InterpreterReport::default()
        };
        let outcome = outcome_from_report(report, true, 1.0, false);
        assert_eq!(outcome.error_kind.as_deref(), Some("EXECUTION_FAILED"));
        assert_eq!(outcome.stdout, "out");
        assert!(outcome.final_locals.is_none());
    }
}
