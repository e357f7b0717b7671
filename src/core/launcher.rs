//! Worker process creation.
//!
//! `launch` spawns one worker per execution and returns immediately with a
//! [`PendingExecution`]; waiting, timeout enforcement and result
//! reconstruction belong to the reconciler.

use crate::config::types::{ExecutionRequest, ExecutorConfig, Result, SnipboxError};
use crate::core::channel::{
    cloexec_pipe, drain_bounded, write_json, OutcomeReceiver, DIAGNOSTIC_LIMIT, WORKER_STATUS_FD,
};
use crate::core::interpreter::{is_runnable, resolve_python_program};
use crate::core::types::WorkerLaunchRequest;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Program and arguments that start a worker, plus the interpreter it drives.
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
    interpreter: PathBuf,
}

impl WorkerCommand {
    /// A snipbox binary started in the hidden worker role.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![
                "--internal-role".to_string(),
                "worker".to_string(),
                "--status-fd".to_string(),
                WORKER_STATUS_FD.to_string(),
            ],
            interpreter: resolve_python_program(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Re-exec of the running binary.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn is_available(&self) -> bool {
        self.program.is_file()
    }

    pub fn interpreter_available(&self) -> bool {
        is_runnable(&self.interpreter)
    }
}

/// A running worker plus the handles needed to reconcile it.
///
/// Consumed by `reconcile`, so a result channel is read at most once.
pub struct PendingExecution {
    pub(crate) execution_id: String,
    pub(crate) child: Child,
    pub(crate) outcome: OutcomeReceiver,
    pub(crate) request_writer: JoinHandle<Result<()>>,
    pub(crate) diagnostics: JoinHandle<String>,
    pub(crate) started: Instant,
}

impl PendingExecution {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// Start one worker process for `request` under `config`.
pub fn launch(
    worker: &WorkerCommand,
    config: &ExecutorConfig,
    request: &ExecutionRequest,
) -> Result<PendingExecution> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    let (status_read, status_write) = cloexec_pipe()?;
    let status_write_fd = status_write.as_raw_fd();

    let mut command = Command::new(worker.program());
    command
        .args(&worker.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .process_group(0);

    // Only async-signal-safe calls between fork and exec.
    unsafe {
        command.pre_exec(move || {
            if status_write_fd == WORKER_STATUS_FD {
                let flags = libc::fcntl(status_write_fd, libc::F_GETFD);
                if flags < 0
                    || libc::fcntl(status_write_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                {
                    return Err(std::io::Error::last_os_error());
                }
            } else if libc::dup2(status_write_fd, WORKER_STATUS_FD) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| {
        SnipboxError::Process(format!(
            "failed to spawn worker {}: {}",
            worker.program().display(),
            e
        ))
    })?;
    // The worker holds the only write end now; EOF follows its exit.
    drop(status_write);

    let outcome = OutcomeReceiver::spawn(status_read);

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| SnipboxError::Process("worker stdin was not captured".to_string()))?;
    let payload = WorkerLaunchRequest {
        execution_id: execution_id.clone(),
        memory_limit_mb: config.memory_limit_mb(),
        interpreter: worker.interpreter().to_path_buf(),
        request: request.clone(),
    };
    let request_writer = thread::spawn(move || write_json(stdin, &payload));

    let diagnostics = match child.stderr.take() {
        Some(stderr) => drain_bounded(stderr, DIAGNOSTIC_LIMIT),
        None => thread::spawn(String::new),
    };

    log::debug!(
        "launched worker pid={} execution_id={} timeout={}s memory={}MB",
        child.id(),
        execution_id,
        config.timeout_seconds(),
        config.memory_limit_mb()
    );

    Ok(PendingExecution {
        execution_id,
        child,
        outcome,
        request_writer,
        diagnostics,
        started,
    })
}
