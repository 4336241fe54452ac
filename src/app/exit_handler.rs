//! Exit code logic and user-facing outcome messages.
//!
//! Single responsibility: turn a [`RunOutcome`] into the text printed after a
//! run and the process exit outcome.

use std::error::Error;
use std::path::Path;

use ilmsdump_core::RunOutcome;
use ilmsdump_core::util::shell_quote;

use crate::ProcessExit;

/// Determines the process exit outcome of a finished run.
pub(crate) fn determine_exit_outcome<E>(outcome: &RunOutcome<E>) -> ProcessExit {
    if outcome.is_completed() {
        ProcessExit::Success
    } else {
        ProcessExit::Failure
    }
}

/// The two remediation hints printed after an unfinished run.
pub(crate) fn resume_hints(checkpoint: &Path, identity: &str) -> String {
    format!(
        "Run with --resume={} to resume download.\nRun with --ignore={identity} to ignore this item.",
        shell_quote(&checkpoint.to_string_lossy())
    )
}

/// Renders `err` followed by every error in its source chain.
pub(crate) fn cause_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Message printed to stderr after the summary, if the run did not complete.
pub(crate) fn outcome_message<E: Error + 'static>(outcome: &RunOutcome<E>) -> Option<String> {
    match outcome {
        RunOutcome::Completed { .. } => None,
        RunOutcome::Interrupted {
            checkpoint,
            last_completed,
            ..
        } => Some(format!(
            "Interrupted.\n{}",
            resume_hints(checkpoint, last_completed)
        )),
        RunOutcome::Failed {
            checkpoint,
            item,
            cause,
            ..
        } => Some(format!(
            "Error occurred while handling {item}: {}\n{}",
            cause_chain(cause),
            resume_hints(checkpoint, item)
        )),
    }
}
