//! Timing policy for job runners.
//!
//! All windows are measured from the moment the backend accepted the
//! submission. The connect and request timeouts bound single backend calls
//! so none of them can hold a runner past its deadline.

use std::time::Duration;

/// How long the push channel alone is trusted before polling starts.
pub const DEFAULT_PUSH_WINDOW: Duration = Duration::from_secs(60);

/// How long polling may continue after the push window closes.
pub const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(90);

/// Delay between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Delay before re-checking outputs after a bare "completed" status.
pub const DEFAULT_COMPLETION_GRACE: Duration = Duration::from_secs(1);

/// How many status fetches are attempted to collect outputs after a
/// terminal signal.
pub const DEFAULT_SETTLE_ATTEMPTS: u32 = 3;

/// Longest wait for the push channel handshake before falling back to
/// polling.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest wait for one HTTP call to the backend (submit, status, download).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerTiming {
    pub push_window: Duration,
    pub poll_window: Duration,
    pub poll_interval: Duration,
    pub completion_grace: Duration,
    pub settle_attempts: u32,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RunnerTiming {
    fn default() -> Self {
        Self {
            push_window: DEFAULT_PUSH_WINDOW,
            poll_window: DEFAULT_POLL_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            completion_grace: DEFAULT_COMPLETION_GRACE,
            settle_attempts: DEFAULT_SETTLE_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RunnerTiming {
    /// Outer bound on a job: push window plus poll window.
    pub fn overall_deadline(&self) -> Duration {
        self.push_window + self.poll_window
    }
}
