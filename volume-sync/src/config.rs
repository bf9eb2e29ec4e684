//! Configuration for the sync controller

use std::time::Duration;

use crate::error::SyncError;

/// Configuration for the [`SyncController`](crate::SyncController)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How often the desktop volume is sampled
    /// Default: 500 milliseconds
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample twice as often as the default
    pub fn responsive() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Sample rarely, for machines where spawning the mixer tool is costly
    pub fn relaxed() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.poll_interval.is_zero() {
            return Err(SyncError::Configuration(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
