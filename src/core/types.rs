use crate::config::types::{
    Bindings, ErrorKind, ExecutionError, ExecutionRequest, ExecutionResult,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Host->worker launch contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerLaunchRequest {
    pub execution_id: String,
    pub memory_limit_mb: u64,
    /// Python interpreter the worker drives
    pub interpreter: PathBuf,
    pub request: ExecutionRequest,
}

/// Worker->host payload transferred through the status pipe.
///
/// Faults cross the process boundary as a (tag, message) pair only.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RawWorkerOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub memory_used_mb: f64,
    pub final_locals: Option<Bindings>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub memory_limit_applied: bool,
}

impl RawWorkerOutcome {
    pub fn to_execution_result(&self, elapsed_seconds: f64) -> ExecutionResult {
        let error = if self.success {
            None
        } else {
            let kind = self
                .error_kind
                .as_deref()
                .map(ErrorKind::from_tag)
                .unwrap_or(ErrorKind::ExecutionFailed);
            let message = self
                .error_message
                .clone()
                .unwrap_or_else(|| "execution failed".to_string());
            Some(ExecutionError::new(kind, message))
        };

        ExecutionResult {
            success: self.success,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            error,
            execution_time_seconds: elapsed_seconds,
            memory_used_mb: self.memory_used_mb,
            final_locals: if self.success {
                self.final_locals.clone()
            } else {
                None
            },
        }
    }
}

/// Signal escalation report for timeout/forced termination paths.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_outcome_keeps_locals() {
        let mut locals = Bindings::new();
        locals.insert("result".to_string(), json!(42));
        let outcome = RawWorkerOutcome {
            success: true,
            stdout: "hi\n".to_string(),
            memory_used_mb: 3.5,
            final_locals: Some(locals.clone()),
            ..RawWorkerOutcome::default()
        };

        let result = outcome.to_execution_result(0.25);
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.final_locals, Some(locals));
        assert_eq!(result.execution_time_seconds, 0.25);
        assert_eq!(result.memory_used_mb, 3.5);
    }

    #[test]
    fn failure_outcome_reconstructs_kind_from_tag() {
        let outcome = RawWorkerOutcome {
            success: false,
            stdout: "partial\n".to_string(),
            error_kind: Some("ZERO_DIVISION".to_string()),
            error_message: Some("division by zero".to_string()),
            ..RawWorkerOutcome::default()
        };

        let result = outcome.to_execution_result(0.1);
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::ZeroDivision));
        assert_eq!(result.stdout, "partial\n");
    }

    #[test]
    fn failure_without_tag_is_execution_failed() {
        let outcome = RawWorkerOutcome::default();
        let result = outcome.to_execution_result(0.0);
        assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionFailed));
    }

    #[test]
    fn outcome_decodes_without_capability_flag() {
        let raw = r#"{"success":true,"stdout":"","stderr":"","memory_used_mb":1.0,
            "final_locals":null,"error_kind":null,"error_message":null}"#;
        let outcome: RawWorkerOutcome = serde_json::from_str(raw).unwrap();
        assert!(outcome.success);
        assert!(!outcome.memory_limit_applied);
    }
}
