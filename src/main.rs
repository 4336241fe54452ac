//! CLI entry point for ilmsdump.

use std::process::ExitCode;

use clap::Parser;

mod app;
mod app_config;
mod cli;

use cli::Args;

/// Process exit status of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything requested was done.
    Success,
    /// A run failed or was interrupted; a checkpoint was written.
    Failure,
    /// The arguments were rejected.
    Usage,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Usage => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let force_cli_level = args.quiet || args.verbose > 0;
    let no_color = app::terminal::should_disable_color(
        app::terminal::no_color_env_requested(),
        app::terminal::is_dumb_terminal(),
    );
    app::terminal::init_tracing(args.log_level(), force_cli_level, no_color);

    match app::runtime::run_ilmsdump(args).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ProcessExit::Failure.into()
        }
    }
}
