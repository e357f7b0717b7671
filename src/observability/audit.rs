/// Audit trail for executions served by the API adapter
///
/// Every record is logged as a JSON line on the `snipbox::audit` target and,
/// when an audit file is configured, appended to that file as well.
use crate::config::types::{ExecutionResult, Result, SnipboxError};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const AUDIT_TARGET: &str = "snipbox::audit";

/// One executed snippet, as seen by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub caller: String,
    pub code_length: usize,
    pub duration_seconds: f64,
    pub success: bool,
    pub error_kind: Option<String>,
}

impl AuditRecord {
    pub fn new(caller: impl Into<String>, code_length: usize, result: &ExecutionResult) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            caller: caller.into(),
            code_length,
            duration_seconds: result.execution_time_seconds,
            success: result.success,
            error_kind: result.error_kind().map(|kind| kind.as_str().to_string()),
        }
    }
}

/// Append-only audit file.
pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SnipboxError::Config(format!("Failed to create audit log directory: {}", e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SnipboxError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, line: &str) {
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write audit record to {}: {}", self.path.display(), e);
                }
            }
            Err(_) => error!("Failed to acquire lock on audit file"),
        }
    }
}

static AUDIT_LOG: OnceLock<AuditLog> = OnceLock::new();

/// Install the process-wide audit file. Later calls are ignored.
pub fn init_audit_log(path: &Path) -> Result<()> {
    let log = AuditLog::open(path)?;
    if AUDIT_LOG.set(log).is_err() {
        error!("Audit log already initialized");
    } else {
        info!("Audit log writing to {}", path.display());
    }
    Ok(())
}

/// Log `record` and append it to the audit file when one is installed.
pub fn emit(record: &AuditRecord) {
    let line = match serde_json::to_string(record) {
        Ok(line) => line,
        Err(e) => {
            error!("Failed to serialize audit record {}: {}", record.event_id, e);
            return;
        }
    };

    info!(target: AUDIT_TARGET, "{}", line);
    if let Some(log) = AUDIT_LOG.get() {
        log.append(&line);
    }
}
