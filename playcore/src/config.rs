//! Core configuration
//!
//! `CoreConfig` holds the settings fixed at startup. Runtime-adjustable
//! settings are options in the `OptionStore`.

use std::time::Duration;

/// Configuration for a `Core` instance
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Number of threads in the command worker pool
    /// Default: 4
    pub worker_threads: usize,

    /// Maximum number of queued worker commands before submissions fail
    /// Default: 64
    pub worker_queue_capacity: usize,

    /// Initial value of the `osd-duration` option, in milliseconds
    /// Default: 1000
    pub osd_duration_ms: i64,

    /// How often blocking waits re-check hooks for vanished clients
    /// Default: 50 milliseconds
    pub hook_poll_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            worker_queue_capacity: 64,
            osd_duration_ms: 1000,
            hook_poll_interval: Duration::from_millis(50),
        }
    }
}

impl CoreConfig {
    /// Create a new CoreConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issue as a message
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_threads == 0 {
            return Err("Worker thread count must be greater than 0".to_string());
        }

        if self.worker_queue_capacity == 0 {
            return Err("Worker queue capacity must be greater than 0".to_string());
        }

        if self.osd_duration_ms < 0 {
            return Err("OSD duration must not be negative".to_string());
        }

        if self.hook_poll_interval == Duration::ZERO {
            return Err("Hook poll interval must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.worker_queue_capacity = capacity;
        self
    }

    pub fn with_osd_duration(mut self, millis: i64) -> Self {
        self.osd_duration_ms = millis;
        self
    }

    pub fn with_hook_poll_interval(mut self, interval: Duration) -> Self {
        self.hook_poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.worker_queue_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(CoreConfig::new().with_worker_threads(0).validate().is_err());
        assert!(CoreConfig::new().with_queue_capacity(0).validate().is_err());
        assert!(CoreConfig::new()
            .with_hook_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
