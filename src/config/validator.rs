// Server-wide bounds for executor configuration.
// Requests are clamped into these bounds before an ExecutorConfig is built,
// so the engine only ever sees resolved, positive values.

use crate::config::types::{ExecutorConfig, Result, SnipboxError};
use serde::{Deserialize, Serialize};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Inclusive range with a default used when the caller gives no value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
    pub default: i64,
}

impl Bounds {
    pub const fn new(min: i64, max: i64, default: i64) -> Self {
        Self { min, max, default }
    }

    /// Requested value (or the default) clamped into `[min, max]`.
    pub fn resolve(&self, requested: Option<i64>) -> i64 {
        requested.unwrap_or(self.default).clamp(self.min, self.max)
    }

    fn check(&self, name: &str, result: &mut ValidationResult) {
        if self.min <= 0 {
            result.add_error(format!("{}.min must be positive, got {}", name, self.min));
        }
        if self.min > self.max {
            result.add_error(format!(
                "{}.min ({}) must be <= {}.max ({})",
                name, self.min, name, self.max
            ));
        }
        if self.default < self.min || self.default > self.max {
            result.add_error(format!(
                "{}.default ({}) must lie within [{}, {}]",
                name, self.default, self.min, self.max
            ));
        }
    }
}

/// Server-owned limits for timeout and memory ceilings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLimits {
    /// Wall clock ceiling in seconds
    pub timeout_seconds: Bounds,
    /// Memory ceiling in MB
    pub memory_limit_mb: Bounds,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: Bounds::new(1, 30, 5),
            memory_limit_mb: Bounds::new(32, 1024, 128),
        }
    }
}

impl ServerLimits {
    /// Clamp caller-supplied values and build a validated config.
    pub fn resolve(&self, timeout: Option<i64>, memory_mb: Option<i64>) -> Result<ExecutorConfig> {
        ExecutorConfig::new(
            self.timeout_seconds.resolve(timeout),
            self.memory_limit_mb.resolve(memory_mb),
        )
    }
}

/// Validate limits at startup; invalid bounds are fatal.
pub fn validate_limits(limits: &ServerLimits) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    limits.timeout_seconds.check("timeout_seconds", &mut result);
    limits.memory_limit_mb.check("memory_limit_mb", &mut result);

    if limits.memory_limit_mb.min < 32 {
        result.add_warning(format!(
            "memory_limit_mb.min {} is very low (< 32MB), workers may fail before reporting",
            limits.memory_limit_mb.min
        ));
    }
    if limits.timeout_seconds.max > 300 {
        result.add_warning(format!(
            "timeout_seconds.max {} ties up a worker for over five minutes",
            limits.timeout_seconds.max
        ));
    }

    if !result.is_valid() {
        return Err(SnipboxError::Config(format!(
            "limit validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_valid() {
        let result = validate_limits(&ServerLimits::default()).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn resolve_clamps_into_bounds() {
        let limits = ServerLimits::default();

        let config = limits.resolve(None, None).unwrap();
        assert_eq!(config.timeout_seconds(), 5);
        assert_eq!(config.memory_limit_mb(), 128);

        let config = limits.resolve(Some(999), Some(1)).unwrap();
        assert_eq!(config.timeout_seconds(), 30);
        assert_eq!(config.memory_limit_mb(), 32);

        let config = limits.resolve(Some(-4), Some(4096)).unwrap();
        assert_eq!(config.timeout_seconds(), 1);
        assert_eq!(config.memory_limit_mb(), 1024);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let limits = ServerLimits {
            timeout_seconds: Bounds::new(10, 5, 7),
            ..ServerLimits::default()
        };
        let err = validate_limits(&limits).unwrap_err();
        assert!(err.to_string().contains("timeout_seconds.min"));
    }

    #[test]
    fn default_outside_bounds_is_rejected() {
        let limits = ServerLimits {
            memory_limit_mb: Bounds::new(64, 256, 512),
            ..ServerLimits::default()
        };
        assert!(validate_limits(&limits).is_err());
    }

    #[test]
    fn zero_minimum_is_rejected() {
        let limits = ServerLimits {
            timeout_seconds: Bounds::new(0, 5, 1),
            ..ServerLimits::default()
        };
        assert!(validate_limits(&limits).is_err());
    }

    #[test]
    fn low_memory_floor_only_warns() {
        let limits = ServerLimits {
            memory_limit_mb: Bounds::new(8, 64, 32),
            ..ServerLimits::default()
        };
        let result = validate_limits(&limits).unwrap();
        assert_eq!(result.warnings.len(), 1);
    }
}
