//! The Python interpreter a worker drives.
//!
//! The worker starts the interpreter with a bootstrap that announces
//! readiness, reads the execution request from stdin, runs the snippet in an
//! explicit namespace and prints an [`InterpreterReport`] on its original
//! stdout.

use crate::config::types::{Bindings, ErrorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PYTHON_PROGRAM: &str = "python3";
pub const PYTHON_PROGRAM_FALLBACK: &str = "python";
pub const BOOTSTRAP: &str = include_str!("../../python/bootstrap.py");

/// First line the bootstrap prints once the interpreter has started.
pub const READY_LINE: &str = "ready";

/// What the bootstrap reports after running a snippet.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InterpreterReport {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub error_class: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub final_locals: Option<Bindings>,
}

/// Arguments that start the bootstrap in isolated mode.
pub fn bootstrap_args() -> Vec<String> {
    vec!["-I".to_string(), "-c".to_string(), BOOTSTRAP.to_string()]
}

/// Map the reported exception class onto the caller-visible kind.
pub fn classify(error_class: &str) -> ErrorKind {
    match error_class {
        "SyntaxError" => ErrorKind::Syntax,
        "NameError" => ErrorKind::Name,
        "ValueError" => ErrorKind::Value,
        "ZeroDivisionError" => ErrorKind::ZeroDivision,
        "MemoryError" => ErrorKind::MemoryLimit,
        _ => ErrorKind::ExecutionFailed,
    }
}

pub fn find_program_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// `python3` from `PATH`, then `python`, else the bare name.
pub fn resolve_python_program() -> PathBuf {
    find_program_on_path(PYTHON_PROGRAM)
        .or_else(|| find_program_on_path(PYTHON_PROGRAM_FALLBACK))
        .unwrap_or_else(|| PathBuf::from(PYTHON_PROGRAM))
}

/// Whether `program` names an executable, either as a path or via `PATH`.
pub fn is_runnable(program: &Path) -> bool {
    if program.components().count() > 1 {
        return is_executable(program);
    }
    program
        .to_str()
        .map(|name| find_program_on_path(name).is_some())
        .unwrap_or(false)
}
