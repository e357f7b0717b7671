/// Engine entry point: one launch plus one reconcile per call
use crate::config::types::{ErrorKind, ExecutionRequest, ExecutionResult, ExecutorConfig, Result};
use crate::core::launcher::{launch, WorkerCommand};
use crate::core::reconciler::reconcile;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default pause between SIGTERM and SIGKILL on timeout.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Runs snippets in worker processes started from `worker`.
///
/// Holds no per-execution state, so one executor can serve concurrent calls.
#[derive(Clone, Debug)]
pub struct Executor {
    worker: WorkerCommand,
    grace: Duration,
}

impl Executor {
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            worker,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Executor whose workers re-exec the running binary.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(WorkerCommand::current_exe()?))
    }

    pub fn with_program(program: &Path) -> Self {
        Self::new(WorkerCommand::new(program))
    }

    /// Drive `interpreter` instead of the `python3` found on `PATH`.
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.worker = self.worker.with_interpreter(interpreter);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn worker(&self) -> &WorkerCommand {
        &self.worker
    }

    /// Run `request` under `config`. Blocks for at most the timeout plus the
    /// grace period; every failure comes back inside the result.
    pub fn execute(&self, config: &ExecutorConfig, request: &ExecutionRequest) -> ExecutionResult {
        match launch(&self.worker, config, request) {
            Ok(pending) => reconcile(pending, config.timeout(), self.grace),
            Err(e) => {
                log::error!("failed to launch worker: {}", e);
                ExecutionResult::failure(
                    ErrorKind::ExecutionFailed,
                    format!("failed to launch worker: {}", e),
                    0.0,
                )
            }
        }
    }
}

/// Run `request` in a re-exec of the current binary.
pub fn execute(config: &ExecutorConfig, request: &ExecutionRequest) -> ExecutionResult {
    match Executor::current_exe() {
        Ok(executor) => executor.execute(config, request),
        Err(e) => ExecutionResult::failure(
            ErrorKind::ExecutionFailed,
            format!("cannot locate worker binary: {}", e),
            0.0,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_failure_becomes_execution_failed() {
        let executor = Executor::with_program(Path::new("/nonexistent/snipbox"));
        let config = ExecutorConfig::new(1, 64).unwrap();
        let result = executor.execute(&config, &ExecutionRequest::new("print(1)"));

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionFailed));
        assert!(result
            .error
            .unwrap()
            .message
            .contains("failed to launch worker"));
    }

    #[test]
    fn grace_defaults_to_one_second() {
        let executor = Executor::with_program(Path::new("/bin/true"));
        assert_eq!(executor.grace(), DEFAULT_GRACE_PERIOD);
        let executor = executor.with_grace(Duration::from_millis(250));
        assert_eq!(executor.grace(), Duration::from_millis(250));
    }
}
