//! Waits for a worker under a deadline and turns what it left behind into a
//! typed `ExecutionResult`.

use crate::config::types::{ErrorKind, ExecutionResult};
use crate::core::launcher::PendingExecution;
use crate::core::types::KillReport;
use crate::kernel::signal::{force_kill, request_termination, Delivery};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of waiting on the worker.
enum Exit {
    Finished(ExitStatus),
    TimedOut(KillReport),
    WaitFailed(String, KillReport),
}

fn note_delivery(report: &mut KillReport, signal: &str, delivery: Delivery) -> bool {
    match delivery {
        Delivery::Group => true,
        Delivery::Leader { group_error } => {
            report
                .notes
                .push(format!("group {} fallback used: {}", signal, group_error));
            true
        }
        Delivery::Gone => {
            report
                .notes
                .push(format!("{}: worker already gone", signal));
            false
        }
    }
}

/// SIGTERM the worker group, allow `grace`, then SIGKILL and reap.
pub fn terminate_worker(child: &mut Child, grace: Duration) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();
    let pid = child.id() as i32;

    let term_sent = note_delivery(&mut report, "SIGTERM", request_termination(pid));
    report.term_sent = term_sent;

    let grace_deadline = start + grace;
    let mut exited = false;
    while Instant::now() < grace_deadline {
        match child.try_wait() {
            Ok(Some(_)) => {
                exited = true;
                break;
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                report.notes.push(format!("try_wait during grace: {}", e));
                break;
            }
        }
    }

    if !exited {
        let kill_sent = note_delivery(&mut report, "SIGKILL", force_kill(pid));
        report.kill_sent = kill_sent;
        if let Err(e) = child.wait() {
            report.notes.push(format!("wait after SIGKILL: {}", e));
        }
    }

    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}

fn wait_with_deadline(child: &mut Child, deadline: Instant, grace: Duration) -> Exit {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Exit::Finished(status),
            Ok(None) if Instant::now() >= deadline => {
                return Exit::TimedOut(terminate_worker(child, grace));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let report = terminate_worker(child, Duration::ZERO);
                return Exit::WaitFailed(e.to_string(), report);
            }
        }
    }
}

fn describe_kill(report: &KillReport) -> String {
    format!(
        "term_sent={} kill_sent={} waited_ms={} notes={:?}",
        report.term_sent, report.kill_sent, report.waited_ms, report.notes
    )
}

fn describe_exit(status: &ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("worker exited with status {} without reporting an outcome", code),
        (None, Some(signal)) => {
            let name = nix::sys::signal::Signal::try_from(signal)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| signal.to_string());
            format!("worker terminated by signal {} without reporting an outcome", name)
        }
        (None, None) => "worker ended without reporting an outcome".to_string(),
    }
}

/// Wait for the worker, enforce the timeout and build the result.
///
/// A worker still running at the deadline yields `TIMEOUT` regardless of
/// anything it may have written. A worker that exits without an outcome
/// yields `EXECUTION_FAILED` with its diagnostics in `stderr`.
pub fn reconcile(pending: PendingExecution, timeout: Duration, grace: Duration) -> ExecutionResult {
    let PendingExecution {
        execution_id,
        mut child,
        outcome,
        request_writer,
        diagnostics,
        started,
    } = pending;

    let exit = wait_with_deadline(&mut child, started + timeout, grace);
    let elapsed = started.elapsed().as_secs_f64();

    // The worker is gone, so every pipe has reached EOF and these joins return.
    let received = outcome.finish();
    let diagnostics = diagnostics.join().unwrap_or_default();
    match request_writer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::debug!("execution {}: request write failed: {}", execution_id, e),
        Err(_) => log::debug!("execution {}: request writer panicked", execution_id),
    }

    let status = match exit {
        Exit::TimedOut(report) => {
            log::warn!(
                "execution {} timed out after {}s; {}",
                execution_id,
                timeout.as_secs(),
                describe_kill(&report)
            );
            return ExecutionResult::failure(
                ErrorKind::Timeout,
                format!("execution exceeded the {} second timeout", timeout.as_secs()),
                timeout.as_secs_f64(),
            );
        }
        Exit::WaitFailed(reason, report) => {
            log::error!(
                "execution {}: wait failed ({}); {}",
                execution_id,
                reason,
                describe_kill(&report)
            );
            return ExecutionResult::failure(
                ErrorKind::ExecutionFailed,
                format!("failed to wait for worker: {}", reason),
                elapsed,
            );
        }
        Exit::Finished(status) => status,
    };

    match received {
        Ok(Some(raw)) => {
            log::debug!(
                "execution {} finished in {:.3}s success={}",
                execution_id,
                elapsed,
                raw.success
            );
            raw.to_execution_result(elapsed)
        }
        Ok(None) => {
            log::warn!("execution {}: {}", execution_id, describe_exit(&status));
            let mut result = ExecutionResult::failure(
                ErrorKind::ExecutionFailed,
                describe_exit(&status),
                elapsed,
            );
            result.stderr = diagnostics;
            result
        }
        Err(e) => {
            let mut result = ExecutionResult::failure(
                ErrorKind::ExecutionFailed,
                format!("malformed worker outcome: {}", e),
                elapsed,
            );
            result.stderr = diagnostics;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::{cloexec_pipe, drain_bounded, OutcomeReceiver, DIAGNOSTIC_LIMIT};
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    /// Pending execution around an arbitrary shell command that never reports.
    fn pending_shell(script: &str) -> PendingExecution {
        let (read_end, write_end) = cloexec_pipe().unwrap();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        drop(write_end);
        let diagnostics = drain_bounded(child.stderr.take().unwrap(), DIAGNOSTIC_LIMIT);
        PendingExecution {
            execution_id: "test".to_string(),
            child,
            outcome: OutcomeReceiver::spawn(read_end),
            request_writer: std::thread::spawn(|| Ok(())),
            diagnostics,
            started: Instant::now(),
        }
    }

    #[test]
    fn deadline_produces_timeout_with_configured_duration() {
        let pending = pending_shell("sleep 30");
        let start = Instant::now();
        let result = reconcile(pending, Duration::from_secs(1), Duration::from_millis(200));

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.execution_time_seconds, 1.0);
        assert!(result.final_locals.is_none());
    }

    #[test]
    fn term_ignoring_worker_is_killed() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .process_group(0)
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let report = terminate_worker(&mut child, Duration::from_millis(200));
        assert!(report.term_sent);
        assert!(report.kill_sent);
        assert!(report.waited_ms >= 200);
    }

    #[test]
    fn exit_without_outcome_reports_status_and_diagnostics() {
        let pending = pending_shell("echo boom >&2; exit 3");
        let result = reconcile(pending, Duration::from_secs(5), Duration::from_millis(100));

        assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionFailed));
        let message = &result.error.as_ref().unwrap().message;
        assert!(message.contains("status 3"), "{}", message);
        assert_eq!(result.stderr, "boom\n");
    }

    #[test]
    fn signalled_worker_names_the_signal() {
        let pending = pending_shell("kill -ABRT $$");
        let result = reconcile(pending, Duration::from_secs(5), Duration::from_millis(100));

        assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionFailed));
        assert!(result.error.unwrap().message.contains("SIGABRT"));
    }

    #[test]
    fn kill_report_description_lists_every_step() {
        let report = KillReport {
            term_sent: true,
            kill_sent: false,
            waited_ms: 0,
            notes: vec!["SIGKILL: worker already gone".to_string()],
        };
        let text = describe_kill(&report);
        assert!(text.contains("term_sent=true"));
        assert!(text.contains("kill_sent=false"));
        assert!(text.contains("worker already gone"));
    }

    #[test]
    fn immediate_termination_reaps_a_running_worker() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30")
            .process_group(0)
            .spawn()
            .unwrap();

        let report = terminate_worker(&mut child, Duration::ZERO);
        assert!(report.term_sent);
        assert!(child.try_wait().unwrap().is_some());
    }
}
