/// Server configuration loading from a JSON file
use crate::config::types::{Result, SnipboxError};
use crate::config::validator::{validate_limits, ServerLimits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_bind_addr() -> String {
    "127.0.0.1:8700".to_string()
}

fn default_max_code_bytes() -> usize {
    64 * 1024
}

fn default_grace_period_ms() -> u64 {
    1000
}

/// Full server configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub limits: ServerLimits,
    /// Largest accepted snippet, in bytes
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
    /// Time between SIGTERM and SIGKILL on timeout
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Worker binary; the running executable when unset
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    /// Python interpreter; `python3` from `PATH` when unset
    #[serde(default)]
    pub python_program: Option<PathBuf>,
    /// Append audit records here in addition to the log
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            limits: ServerLimits::default(),
            max_code_bytes: default_max_code_bytes(),
            grace_period_ms: default_grace_period_ms(),
            worker_program: None,
            python_program: None,
            audit_log: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SnipboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: ServerConfig = serde_json::from_str(&content)
            .map_err(|e| SnipboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let report = validate_limits(&self.limits)?;
        for warning in &report.warnings {
            log::warn!("config: {}", warning);
        }
        if self.max_code_bytes == 0 {
            return Err(SnipboxError::Config(
                "max_code_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
