//! Retrying HTTP transport used by every work item expansion.
//!
//! # Features
//!
//! - One shared cookie-aware client per run (connection pooling, session cookie)
//! - Bounded retry with exponential backoff for the server's spurious status
//! - Cumulative body byte counter read by the progress reporter
//! - Streaming file writes with partial-file cleanup
//!
//! # Example
//!
//! ```no_run
//! use ilmsdump_core::transport::Transport;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Transport::new()?;
//! let page = transport
//!     .get(Url::parse("http://lms.example/home.php")?)
//!     .await?
//!     .text()
//!     .await?;
//! println!("{} bytes so far ({} chars)", transport.bytes().total(), page.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod retry;

pub use client::{ByteCounter, Fetched, Request, Transport};
pub use constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_TRANSIENT_STATUS,
    REQUEST_TIMEOUT_SECS,
};
pub use error::TransportError;
pub use retry::{FailureType, RetryDecision, RetryPolicy};
