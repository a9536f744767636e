//! Environment-driven configuration.
//!
//! These functions read `FERROGROUP_*` environment variables. They return
//! `None` if the variable is not set or cannot be parsed.
//!
//! # Environment Variables
//!
//! | Function | Variable | Description |
//! |----------|----------|-------------|
//! | `recv_timeout()` | `FERROGROUP_RECV_TIMEOUT_MS` | Bound on blocking waits in [`LocalTransport`](crate::LocalTransport) |
//! | `world_size()` | `FERROGROUP_WORLD_SIZE` | Group size used by the demos |

use std::env;
use std::time::Duration;

/// Variable bounding blocking waits of the in-process transport.
pub const RECV_TIMEOUT_VAR: &str = "FERROGROUP_RECV_TIMEOUT_MS";

/// Variable selecting the demo group size.
pub const WORLD_SIZE_VAR: &str = "FERROGROUP_WORLD_SIZE";

/// Get the receive timeout, if configured.
pub fn recv_timeout() -> Option<Duration> {
    env::var(RECV_TIMEOUT_VAR)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Get the requested group size, if configured and positive.
pub fn world_size() -> Option<i32> {
    env::var(WORLD_SIZE_VAR)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .filter(|&n| n >= 1)
}

/// Configuration of a [`LocalFabric`](crate::LocalFabric).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalConfig {
    /// Fail blocking receives and probes that wait longer than this.
    ///
    /// `None` waits forever, matching a real transport.
    pub recv_timeout: Option<Duration>,
}

impl LocalConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> Self {
        LocalConfig {
            recv_timeout: recv_timeout(),
        }
    }

    /// Set the receive timeout.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }
}
