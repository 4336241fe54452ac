use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use tracing::{debug, info};

use ilmsdump_core::engine::CheckpointStore;
use ilmsdump_core::{Engine, EngineOptions, Item, Session, SkipRules, Transport};

use crate::app::{exit_handler, login, table, terminal};
use crate::app_config::{self, Settings, TARGET_ORIGIN_ENV};
use crate::cli::Args;
use crate::ProcessExit;

const RESUME_CONFLICT: &str = "\
Error. Under usual cases, you do not need to specify COURSE_IDS when resuming.
Specifying --resume and COURSE_IDS at the same time may download a resource multiple times.
You can add --no-resume-check to bypass this check if you are sure what you are doing.";

const BANNER_WIDTH: usize = 79;

/// Returns true if `--resume` and course ids were combined without
/// `--no-resume-check`.
pub(crate) fn resume_conflicts(args: &Args) -> bool {
    !args.no_resume_check && args.resume.is_some() && !args.course_ids.is_empty()
}

fn load_settings(args: &Args) -> Result<Settings> {
    let file = app_config::load_file_config(args.config.as_deref())?;
    let env_origin = std::env::var(TARGET_ORIGIN_ENV).ok();
    app_config::resolve_settings(args, file.as_ref(), env_origin.as_deref())
}

pub(crate) async fn run_ilmsdump(args: Args) -> Result<ProcessExit> {
    if resume_conflicts(&args) {
        eprintln!("{RESUME_CONFLICT}");
        return Ok(ProcessExit::Usage);
    }

    let settings = load_settings(&args)?;
    debug!(?settings, "settings resolved");

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                settings.output_dir.display()
            )
        })?;

    let transport = Transport::with_policy(settings.retry_policy, settings.request_timeout)
        .context("Failed to build HTTP client")?;
    let session = Session::new(
        transport,
        settings.target_origin.clone(),
        settings.output_dir.clone(),
    );

    let mut changed = false;
    if args.logout {
        changed |= login::logout(&session).await?;
    }
    if !args.anonymous {
        login::ensure_authenticated(&session, args.login).await?;
        changed |= args.login;
    }

    let mut targets: Vec<Item> = Vec::new();
    let mut skip: SkipRules = args.ignore.iter().cloned().collect();
    if let Some(resume) = &args.resume {
        let (pending, saved_rules) = CheckpointStore::load::<Item>(resume)
            .await
            .with_context(|| format!("Failed to resume from {}", resume.display()))?;
        info!(
            pending = pending.len(),
            skip_rules = saved_rules.len(),
            "Loaded checkpoint"
        );
        targets.extend(pending);
        skip.extend(saved_rules);
    }

    if !args.course_ids.is_empty() {
        let courses = session.resolve_courses(&args.course_ids).await?;
        if !courses.is_empty() {
            print!("{}", table::render(&courses));
        }
        targets.extend(courses.into_iter().map(Item::Course));
    }

    if targets.is_empty() {
        if !changed {
            eprintln!("Nothing to do");
        }
        return Ok(ProcessExit::Success);
    }
    if args.dry {
        return Ok(ProcessExit::Success);
    }

    let show_progress = terminal::should_show_progress(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
        args.no_progress,
    );
    let bytes = session.transport().bytes().clone();
    let engine = Engine::<Item>::new(session, settings.output_dir.clone(), bytes).with_options(
        EngineOptions {
            report_interval: settings.report_interval,
            show_progress,
            listen_for_signals: true,
        },
    );

    println!("{:-<BANNER_WIDTH$}", "--- Starting Download ");
    let outcome = engine.run(targets, skip).await?;

    println!("{}", outcome.summary());
    if let Some(message) = exit_handler::outcome_message(&outcome) {
        eprintln!("{message}");
    }
    Ok(exit_handler::determine_exit_outcome(&outcome))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_resume_with_course_ids_conflicts() {
        let args = Args::try_parse_from(["ilmsdump", "--resume", "r.json", "74"]).unwrap();
        assert!(resume_conflicts(&args));
    }

    #[test]
    fn test_resume_check_can_be_bypassed() {
        let args =
            Args::try_parse_from(["ilmsdump", "--resume", "r.json", "--no-resume-check", "74"])
                .unwrap();
        assert!(!resume_conflicts(&args));
    }

    #[test]
    fn test_resume_alone_does_not_conflict() {
        let args = Args::try_parse_from(["ilmsdump", "--resume", "r.json"]).unwrap();
        assert!(!resume_conflicts(&args));
        let args = Args::try_parse_from(["ilmsdump", "74"]).unwrap();
        assert!(!resume_conflicts(&args));
    }
}
