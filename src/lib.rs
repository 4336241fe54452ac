//! ilmsdump Core Library
//!
//! This library archives iLMS course content: courses, their announcements,
//! materials, discussions, homework, and every attached file. The tree is
//! discovered breadth-first and the run can be interrupted and resumed.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`transport`] - Retrying HTTP transport with a shared byte counter
//! - [`engine`] - Resumable expansion engine, checkpoints and progress reporting
//! - [`ilms`] - iLMS work items, login and course discovery
//! - [`util`] - Small helpers shared across modules

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod ilms;
pub mod transport;
pub mod util;

// Re-export commonly used types
pub use engine::{
    Engine, EngineError, EngineOptions, RunOutcome, RunSummary, SkipRule, SkipRules, WorkItem,
};
pub use ilms::{CourseSelector, Item, Session, SiteError, TYPE_TAGS};
pub use transport::{ByteCounter, RetryPolicy, Transport, TransportError};
