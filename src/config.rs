//! Relay tuning knobs
//!
//! Timeouts and chunk sizes for the forwarding loop and the graceful
//! shutdown path. Defaults match the relay's long-standing behavior;
//! the `with_*` helpers exist mostly so tests can shrink timeouts.

use std::time::Duration;

/// Default poll timeout for one relay loop iteration
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default read chunk size for PTY master output
const DEFAULT_PTY_CHUNK: usize = 4096;

/// Default read chunk size for controlling input
const DEFAULT_STDIN_CHUNK: usize = 1024;

/// Default grace period between SIGTERM and SIGKILL at shutdown
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Configuration for a relay session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Bounded wait per loop iteration, so child exit is polled even
    /// when neither stream has data
    pub poll_interval: Duration,
    /// Maximum bytes read from the PTY master per iteration
    pub pty_chunk: usize,
    /// Maximum bytes read from standard input per iteration
    pub stdin_chunk: usize,
    /// How long to wait after SIGTERM before escalating to SIGKILL
    pub grace_period: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            pty_chunk: DEFAULT_PTY_CHUNK,
            stdin_chunk: DEFAULT_STDIN_CHUNK,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl RelayConfig {
    /// Override the per-iteration poll timeout
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the SIGTERM-to-SIGKILL grace period
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// The poll timeout in the form `poll(2)` wants
    ///
    /// Saturates at `i32::MAX` milliseconds for absurdly large values.
    pub fn poll_timeout_ms(&self) -> i32 {
        i32::try_from(self.poll_interval.as_millis()).unwrap_or(i32::MAX)
    }
}
