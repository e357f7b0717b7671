/// Core types and structures for the snipbox engine
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Name -> value bindings exchanged with the snippet namespace.
pub type Bindings = Map<String, Value>;

/// Validated resource ceilings for a single execution.
///
/// Both values are strictly positive; this is checked once at construction
/// and the value is immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutorConfig {
    timeout_seconds: u64,
    memory_limit_mb: u64,
}

impl ExecutorConfig {
    pub fn new(timeout_seconds: i64, memory_limit_mb: i64) -> Result<Self> {
        if timeout_seconds <= 0 {
            return Err(SnipboxError::Config(format!(
                "timeout_seconds must be positive, got {}",
                timeout_seconds
            )));
        }
        if memory_limit_mb <= 0 {
            return Err(SnipboxError::Config(format!(
                "memory_limit_mb must be positive, got {}",
                memory_limit_mb
            )));
        }
        Ok(Self {
            timeout_seconds: timeout_seconds as u64,
            memory_limit_mb: memory_limit_mb as u64,
        })
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit_mb
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}

/// A snippet plus its starting namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source code of the snippet
    pub code: String,
    /// Global bindings; a minimal builtin set is used when absent
    #[serde(default)]
    pub initial_globals: Option<Bindings>,
    /// Local bindings; empty when absent
    #[serde(default)]
    pub initial_locals: Option<Bindings>,
    /// Return the local namespace after a successful run
    #[serde(default)]
    pub capture_final_locals: bool,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_globals(mut self, globals: Bindings) -> Self {
        self.initial_globals = Some(globals);
        self
    }

    pub fn with_locals(mut self, locals: Bindings) -> Self {
        self.initial_locals = Some(locals);
        self
    }

    pub fn capture_locals(mut self, capture: bool) -> Self {
        self.capture_final_locals = capture;
        self
    }
}

/// Failure classification - CLOSED TAXONOMY
///
/// Every failed execution carries exactly one of these kinds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The code failed to parse
    Syntax,
    /// An undefined name was referenced
    Name,
    /// A value-level runtime fault
    Value,
    /// Division or modulo by zero
    ZeroDivision,
    /// The memory ceiling was exceeded (advisory on some platforms)
    MemoryLimit,
    /// The wall-clock ceiling was exceeded
    Timeout,
    /// Any other runtime fault, including a worker that never reported
    ExecutionFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SYNTAX",
            ErrorKind::Name => "NAME",
            ErrorKind::Value => "VALUE",
            ErrorKind::ZeroDivision => "ZERO_DIVISION",
            ErrorKind::MemoryLimit => "MEMORY_LIMIT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ExecutionFailed => "EXECUTION_FAILED",
        }
    }

    /// Reconstruct a kind from the tag a worker put on the wire.
    /// Unknown tags collapse to `ExecutionFailed`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "SYNTAX" => ErrorKind::Syntax,
            "NAME" => ErrorKind::Name,
            "VALUE" => ErrorKind::Value,
            "ZERO_DIVISION" => ErrorKind::ZeroDivision,
            "MEMORY_LIMIT" => ErrorKind::MemoryLimit,
            "TIMEOUT" => ErrorKind::Timeout,
            _ => ErrorKind::ExecutionFailed,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural error carried by a failed result.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Caller-facing outcome of one execution
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Success flag
    pub success: bool,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Failure classification, absent on success
    pub error: Option<ExecutionError>,
    /// Wall clock time observed by the reconciler (in seconds)
    pub execution_time_seconds: f64,
    /// Peak memory reported by the worker (in MB)
    pub memory_used_mb: f64,
    /// Filtered local namespace, present only when requested and successful
    pub final_locals: Option<Bindings>,
}

impl ExecutionResult {
    /// Failure result with no output, used for synthesized outcomes.
    pub fn failure(kind: ErrorKind, message: impl Into<String>, elapsed_seconds: f64) -> Self {
        Self {
            success: false,
            error: Some(ExecutionError::new(kind, message)),
            execution_time_seconds: elapsed_seconds,
            ..Self::default()
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Custom error types for snipbox
#[derive(Error, Debug)]
pub enum SnipboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<nix::errno::Errno> for SnipboxError {
    fn from(err: nix::errno::Errno) -> Self {
        SnipboxError::Process(err.to_string())
    }
}

/// Result type alias for snipbox operations
pub type Result<T> = std::result::Result<T, SnipboxError>;
