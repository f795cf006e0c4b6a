//! Connection timing and framing limits.

use std::time::Duration;

/// How long to wait for a new worker's ready signal.
pub const WORKER_INITIAL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(16);

/// The general time to wait for a reply to a request.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(8);

/// The largest frame a stream transport accepts by default.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerConfig {
    pub ready_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            ready_timeout: WORKER_INITIAL_CONNECTION_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }
}

impl HandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}
