//! Job engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Job execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineConfig {
    /// Number of worker slots in the pool.
    #[serde(default = "default_max_workers")]
    #[validate(range(min = 1, max = 64))]
    pub max_workers: usize,
    /// Poll timeout in milliseconds while collecting results.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1, max = 60000))]
    pub poll_interval_ms: u64,
    /// Poll timeout in milliseconds while waiting for aborted jobs that
    /// were already running.
    #[serde(default = "default_abort_poll_interval")]
    #[validate(range(min = 1, max = 60000))]
    pub abort_poll_interval_ms: u64,
    /// Default timeout for external commands run by `CommandSubtask`.
    #[serde(default = "default_command_timeout")]
    #[validate(range(min = 1))]
    pub command_timeout_seconds: u64,
}

impl EngineConfig {
    /// Result-collection poll timeout.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Abort wait-phase poll timeout.
    pub fn abort_poll_interval(&self) -> Duration {
        Duration::from_millis(self.abort_poll_interval_ms)
    }

    /// Override the worker count, keeping every other setting.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            poll_interval_ms: default_poll_interval(),
            abort_poll_interval_ms: default_abort_poll_interval(),
            command_timeout_seconds: default_command_timeout(),
        }
    }
}

fn default_max_workers() -> usize {
    1
}

fn default_poll_interval() -> u64 {
    10
}

fn default_abort_poll_interval() -> u64 {
    100
}

fn default_command_timeout() -> u64 {
    3600
}
