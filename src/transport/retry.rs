//! Retry logic with exponential backoff for transient request failures.
//!
//! The iLMS server occasionally answers perfectly valid requests with a
//! spurious error status when it is overloaded. Only that narrowly classified
//! status is retried; every other failure is fatal to the request.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ilmsdump_core::transport::{RetryDecision, RetryPolicy, TransportError};
//!
//! let policy = RetryPolicy::default();
//! let error = TransportError::http_status("http://lms.example/home.php", 400);
//!
//! match policy.should_retry(&error, 0) {
//!     RetryDecision::Retry { delay, remaining } => {
//!         assert_eq!(delay, Duration::from_secs(5));
//!         assert_eq!(remaining, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::TransportError;
use super::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_TRANSIENT_STATUS,
};

/// Classification of request failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// The designated transient status; may succeed on retry.
    Transient,

    /// Anything else. Never retried.
    Permanent,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Retries still available after this one.
        remaining: u32,
    },

    /// Do not retry the request.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3 (so at most 4 attempts)
/// - `initial_delay`: 5 seconds
/// - `backoff_factor`: 4
/// - `transient_status`: 400
///
/// With defaults the sleeps are exactly 5s, 20s and 80s. There is no jitter:
/// requests are issued by a single sequential worker.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    backoff_factor: u32,
    transient_status: u16,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            transient_status: DEFAULT_TRANSIENT_STATUS,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `backoff_factor` is clamped to at least 1 so delays never shrink.
    #[must_use]
    pub fn new(max_retries: u32, initial_delay: Duration, backoff_factor: u32) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor: backoff_factor.max(1),
            ..Self::default()
        }
    }

    /// Overrides the status code treated as transient.
    #[must_use]
    pub fn with_transient_status(mut self, status: u16) -> Self {
        self.transient_status = status;
        self
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the status code treated as transient.
    #[must_use]
    pub fn transient_status(&self) -> u16 {
        self.transient_status
    }

    /// Classifies an error for retry purposes.
    #[must_use]
    pub fn classify(&self, error: &TransportError) -> FailureType {
        match error.status() {
            Some(status) if status == self.transient_status => FailureType::Transient,
            _ => FailureType::Permanent,
        }
    }

    /// Decides what to do after a failure.
    ///
    /// `retries_used` is the number of retries already performed for this
    /// request (0 after the first attempt fails).
    #[instrument(skip(self, error), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, error: &TransportError, retries_used: u32) -> RetryDecision {
        if self.classify(error) == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if retries_used >= self.max_retries {
            debug!(retries_used, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        RetryDecision::Retry {
            delay: self.delay_for(retries_used),
            remaining: self.max_retries - retries_used - 1,
        }
    }

    /// Delay before retry number `retry` (0-indexed): `initial * factor^retry`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = self.backoff_factor.saturating_pow(retry);
        self.initial_delay.saturating_mul(multiplier)
    }

    /// Calls `attempt` until it succeeds or [`should_retry`](Self::should_retry)
    /// declines, sleeping the scheduled delay before each retry.
    ///
    /// `on_retry` sees every retried failure with its delay and the retries
    /// left after it. The last failure is returned unchanged.
    pub(crate) async fn run<T, A, Fut>(
        &self,
        mut attempt: A,
        mut on_retry: impl FnMut(&TransportError, Duration, u32),
    ) -> Result<T, TransportError>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut retries_used = 0u32;
        loop {
            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            match self.should_retry(&error, retries_used) {
                RetryDecision::Retry { delay, remaining } => {
                    on_retry(&error, delay, remaining);
                    tokio::time::sleep(delay).await;
                    retries_used += 1;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying request");
                    return Err(error);
                }
            }
        }
    }
}
