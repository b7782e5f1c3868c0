//! Reconciliation configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, ReconcileResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Closed orders fetched per cycle.
    #[serde(default = "default_max_recent_history")]
    pub max_recent_history: usize,
    /// Count mismatch ratio above which quoting pauses.
    #[serde(default = "default_hard_desync_threshold")]
    pub hard_desync_threshold: f64,
    /// Failed cycles in a row that pause quoting.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_interval_ms() -> u64 {
    25_000
}

fn default_max_recent_history() -> usize {
    100
}

fn default_hard_desync_threshold() -> f64 {
    0.1
}

fn default_max_consecutive_failures() -> u32 {
    3
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_recent_history: default_max_recent_history(),
            hard_desync_threshold: default_hard_desync_threshold(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.interval_ms == 0 {
            return Err(ReconcileError::ConfigError("interval_ms must be > 0".into()));
        }
        if !(self.hard_desync_threshold > 0.0 && self.hard_desync_threshold.is_finite()) {
            return Err(ReconcileError::ConfigError(
                "hard_desync_threshold must be a positive number".into(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ReconcileError::ConfigError(
                "max_consecutive_failures must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.interval_ms, 25_000);
        assert_eq!(config.max_recent_history, 100);
        assert_eq!(config.max_consecutive_failures, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let config = ReconcileConfig {
            hard_desync_threshold: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ReconcileError::ConfigError(_))
        ));
    }
}
