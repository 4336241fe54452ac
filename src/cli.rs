//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use ilmsdump_core::{CourseSelector, SkipRule, TYPE_TAGS};

/// Dump the courses given by their ID.
///
/// The string "enrolled" can be used as a special ID to dump all courses
/// enrolled by the logged in user.
///
/// The string "open" can be used as a special ID to dump all open courses.
/// Downloading all open courses generates a lot of load and traffic on the
/// server. Proceed with caution.
#[derive(Parser, Debug, Clone)]
#[command(name = "ilmsdump")]
#[command(author, version, about)]
pub struct Args {
    /// Course ids, "enrolled" or "open"
    #[arg(value_name = "COURSE_IDS")]
    pub course_ids: Vec<CourseSelector>,

    /// Clear iLMS credentials. With --login, credentials are cleared first,
    /// then login is performed
    #[arg(long)]
    pub logout: bool,

    /// Login to iLMS interactively before accessing iLMS
    #[arg(long)]
    pub login: bool,

    /// Ignore stored credentials
    #[arg(long)]
    pub anonymous: bool,

    /// Output directory to store login credentials and downloads [default: ilmsdump.out]
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Ignore items specified as TYPE or TYPE-ID, e.g. --ignore=Course-74 or --ignore=Video
    #[arg(long, value_name = "RULE", value_parser = parse_skip_rule)]
    pub ignore: Vec<SkipRule>,

    /// List matched courses only. Do not download
    #[arg(long)]
    pub dry: bool,

    /// Resume download from a checkpoint file
    #[arg(long, value_name = "FILE")]
    pub resume: Option<PathBuf>,

    /// Allow --resume and COURSE_IDS specified at the same time
    #[arg(long)]
    pub no_resume_check: bool,

    /// Read defaults from this config file instead of the default location
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Do not draw the live status line
    #[arg(long)]
    pub no_progress: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Log level implied by `-q`/`-v`.
    #[must_use]
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}

fn parse_skip_rule(raw: &str) -> Result<SkipRule, String> {
    SkipRule::parse_known(raw, TYPE_TAGS).map_err(|e| e.to_string())
}
