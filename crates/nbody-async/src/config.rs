//! Runner configuration.

use std::time::Duration;

/// Tuning for the simulation worker.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Name of the simulation thread.
    pub thread_name: String,
    /// Length of one compute fence wait before the exit flag is rechecked.
    ///
    /// The worker keeps waiting until the fence signals, so this only bounds
    /// how long shutdown can take while a dispatch is in flight.
    pub compute_wait_slice: Duration,
    /// Longest wait on a returning slot's fence while no slot is ready.
    pub return_poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            thread_name: "nbody-sim".to_string(),
            compute_wait_slice: Duration::from_millis(100),
            return_poll_interval: Duration::from_millis(1),
        }
    }
}

impl RunnerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the simulation thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the compute fence wait slice.
    #[must_use]
    pub fn with_compute_wait_slice(mut self, slice: Duration) -> Self {
        self.compute_wait_slice = slice;
        self
    }

    /// Set the return fence poll interval.
    #[must_use]
    pub fn with_return_poll_interval(mut self, interval: Duration) -> Self {
        self.return_poll_interval = interval;
        self
    }
}
