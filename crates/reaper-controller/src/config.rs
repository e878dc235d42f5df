use crate::error::{ControllerError, Result};
use std::time::Duration;

/// Configuration shared by the teardown controllers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Concurrent reconcile workers per controller
    pub workers: usize,
    /// Delay before re-checking a teardown that is still waiting
    pub requeue_delay: Duration,
    /// First retry delay after a failed reconcile
    pub backoff_base: Duration,
    /// Upper bound for the retry delay
    pub backoff_max: Duration,
    /// Interval between full re-lists of every object
    pub resync_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            requeue_delay: Duration::from_secs(5),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(60),
            resync_interval: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    /// Reject settings the controllers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ControllerError::invalid_config(
                "workers must be at least 1",
                "Set --workers (or REAPER_WORKERS) to a positive number",
            ));
        }

        if self.backoff_base.is_zero() {
            return Err(ControllerError::invalid_config(
                "backoff base must be greater than zero",
                "Set --backoff-base-ms to a positive number of milliseconds",
            ));
        }

        if self.backoff_base > self.backoff_max {
            return Err(ControllerError::invalid_config(
                format!(
                    "backoff base {:?} exceeds backoff max {:?}",
                    self.backoff_base, self.backoff_max
                ),
                "Lower --backoff-base-ms or raise --backoff-max-secs",
            ));
        }

        if self.resync_interval.is_zero() {
            return Err(ControllerError::invalid_config(
                "resync interval must be greater than zero",
                "Set --resync-secs to a positive number",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.requeue_delay, Duration::from_secs(5));
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ControllerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ControllerError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let config = ControllerConfig {
            backoff_base: Duration::from_secs(120),
            backoff_max: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
