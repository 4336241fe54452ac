//! Constants for the transport module (timeouts, retry schedule).

use std::time::Duration;

/// Default total request timeout (80 seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 80;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Each retry waits this many times longer than the previous one.
pub const DEFAULT_BACKOFF_FACTOR: u32 = 4;

/// The only status code the server is known to return spuriously under load.
pub const DEFAULT_TRANSIENT_STATUS: u16 = 400;
