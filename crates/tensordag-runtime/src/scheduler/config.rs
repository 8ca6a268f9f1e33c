//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the per-device scheduler.
///
/// Controls the worker pool size per device queue and the back-off applied
/// when a request's inputs are still being produced elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads per device queue.
    ///
    /// Every device queue gets its own pool of this size; queues never
    /// steal work from each other.
    ///
    /// Default: 1
    #[serde(default = "default_threads_per_queue")]
    pub threads_per_queue: usize,

    /// Sleep applied, in microseconds, when the head request is waiting on
    /// another device and the queue holds nothing else to run.
    ///
    /// Default: 1000us (1 millisecond)
    #[serde(default = "default_retry_sleep_us")]
    pub retry_sleep_us: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads_per_queue: default_threads_per_queue(),
            retry_sleep_us: default_retry_sleep_us(),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker pool size per device queue.
    pub fn with_threads_per_queue(mut self, threads_per_queue: usize) -> Self {
        self.threads_per_queue = threads_per_queue;
        self
    }

    /// Set the retry back-off in microseconds.
    pub fn with_retry_sleep_us(mut self, retry_sleep_us: u64) -> Self {
        self.retry_sleep_us = retry_sleep_us;
        self
    }

    /// Validate the configuration.
    ///
    /// Returns an error message if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads_per_queue == 0 {
            return Err("threads_per_queue must be > 0".to_string());
        }
        if self.retry_sleep_us == 0 {
            return Err("retry_sleep_us must be > 0".to_string());
        }
        Ok(())
    }
}

fn default_threads_per_queue() -> usize {
    1
}

fn default_retry_sleep_us() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.threads_per_queue, 1);
        assert_eq!(config.retry_sleep_us, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = SchedulerConfig::new()
            .with_threads_per_queue(4)
            .with_retry_sleep_us(500);
        assert_eq!(config.threads_per_queue, 4);
        assert_eq!(config.retry_sleep_us, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_threads() {
        let config = SchedulerConfig {
            threads_per_queue: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: SchedulerConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(config.threads_per_queue, 1);
    }
}
