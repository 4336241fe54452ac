//! Resumable breadth-first expansion engine.
//!
//! The engine drains a FIFO queue of [`WorkItem`]s one at a time. Each item is
//! checked against the skip rules, expanded into children, summarised into
//! its `meta.json`, and marked completed; its children go to the tail of the
//! queue. A fault or an interruption stops the run with a checkpoint of the
//! remaining frontier that a later run can resume from.
//!
//! # Example
//!
//! ```no_run
//! # use ilmsdump_core::engine::{Engine, RunOutcome, SkipRules, WorkItem};
//! # use ilmsdump_core::transport::ByteCounter;
//! # async fn example<T: WorkItem>(context: T::Context, seeds: Vec<T>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::<T>::new(context, "ilmsdump.out", ByteCounter::new());
//! match engine.run(seeds, SkipRules::new()).await? {
//!     RunOutcome::Completed { summary } => println!("{summary}"),
//!     RunOutcome::Interrupted { checkpoint, .. } => println!("resume from {}", checkpoint.display()),
//!     RunOutcome::Failed { item, cause, .. } => eprintln!("{item} failed: {cause}"),
//! }
//! # Ok(())
//! # }
//! ```

mod checkpoint;
mod interrupt;
mod item;
mod reporter;
mod stats;
mod storage;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

pub use checkpoint::{CHECKPOINT_VERSION, CheckpointError, CheckpointStore};
pub use interrupt::{InterruptLatch, SignalGuard};
pub use item::{Discovery, SkipRule, SkipRuleError, SkipRules, WorkItem};
pub use reporter::{
    DEFAULT_REPORT_INTERVAL, RATE_WINDOW_CAPACITY, RateWindow, Reporter, format_rate, status_line,
};
pub use stats::{RunStats, StatSnapshot};
pub use storage::{META_FILE, Storage, StorageError};

use crate::transport::ByteCounter;

const SUMMARY_WIDTH: usize = 79;

/// Errors that abort a run without a usable outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The interruption checkpoint could not be written.
    #[error("failed to write checkpoint")]
    Checkpoint(#[from] CheckpointError),

    /// An item failed and the checkpoint preserving it could not be written.
    #[error("{item} failed ({cause}) and its checkpoint could not be written")]
    CheckpointAfterFault {
        /// Identity string of the failing item.
        item: String,
        /// Rendered fault of the item.
        cause: String,
        /// Checkpoint failure.
        #[source]
        source: CheckpointError,
    },
}

/// Why an item could not be processed.
#[derive(Debug, Error)]
pub enum ItemFault<E> {
    /// The expansion itself failed.
    #[error(transparent)]
    Expand(E),

    /// The item's `meta.json` could not be written.
    #[error(transparent)]
    Storage(StorageError),
}

/// Completion tallies reported at the end of every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Completed items per type tag, in first-completion order.
    pub completions: Vec<(&'static str, u64)>,
    /// Final per-group counters.
    pub groups: Vec<StatSnapshot>,
}

impl RunSummary {
    fn capture(stats: &RunStats) -> Self {
        Self {
            completions: stats.completions(),
            groups: stats.snapshot(),
        }
    }

    /// Items of `type_tag` completed during the run.
    #[must_use]
    pub fn completed(&self, type_tag: &str) -> u64 {
        self.completions
            .iter()
            .find(|(name, _)| *name == type_tag)
            .map_or(0, |(_, n)| *n)
    }

    /// Items of every type completed during the run.
    #[must_use]
    pub fn total_completed(&self) -> u64 {
        self.completions.iter().map(|(_, n)| n).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-<SUMMARY_WIDTH$}", "--- Summary ")?;
        for (name, count) in &self.completions {
            writeln!(f, "{name}: {count}")?;
        }
        write!(f, "{:-<SUMMARY_WIDTH$}", "")
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome<E> {
    /// The queue drained.
    Completed {
        /// Completion tallies.
        summary: RunSummary,
    },

    /// An interruption was observed after an item completed.
    Interrupted {
        /// Checkpoint of the remaining queue.
        checkpoint: PathBuf,
        /// Identity string of the last completed item.
        last_completed: String,
        /// Completion tallies.
        summary: RunSummary,
    },

    /// An item failed. The checkpoint still lists it first.
    Failed {
        /// Checkpoint of the queue including the failing item.
        checkpoint: PathBuf,
        /// Identity string of the failing item.
        item: String,
        /// The fault.
        cause: ItemFault<E>,
        /// Completion tallies.
        summary: RunSummary,
    },
}

impl<E> RunOutcome<E> {
    /// Completion tallies of the run.
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Completed { summary }
            | Self::Interrupted { summary, .. }
            | Self::Failed { summary, .. } => summary,
        }
    }

    /// Checkpoint written by the run, if it did not complete.
    pub fn checkpoint(&self) -> Option<&Path> {
        match self {
            Self::Completed { .. } => None,
            Self::Interrupted { checkpoint, .. } | Self::Failed { checkpoint, .. } => {
                Some(checkpoint)
            }
        }
    }

    /// Returns true if the queue drained.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Period of the status line refresh.
    pub report_interval: Duration,
    /// Draw the status line on stderr.
    pub show_progress: bool,
    /// Translate SIGINT/SIGTERM into the interrupt latch during the run.
    pub listen_for_signals: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            report_interval: DEFAULT_REPORT_INTERVAL,
            show_progress: true,
            listen_for_signals: true,
        }
    }
}

/// Sequential queue drainer, generic over the work item type.
pub struct Engine<T: WorkItem> {
    context: T::Context,
    storage: Storage,
    checkpoints: CheckpointStore,
    bytes: ByteCounter,
    latch: InterruptLatch,
    options: EngineOptions,
}

impl<T: WorkItem> Engine<T> {
    /// Creates an engine writing item directories and checkpoints under
    /// `data_dir`. `bytes` is the counter the context's transport increments.
    pub fn new(context: T::Context, data_dir: impl Into<PathBuf>, bytes: ByteCounter) -> Self {
        let data_dir = data_dir.into();
        Self {
            context,
            storage: Storage::new(&data_dir),
            checkpoints: CheckpointStore::new(data_dir),
            bytes,
            latch: InterruptLatch::new(),
            options: EngineOptions::default(),
        }
    }

    /// Replaces the run options.
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// The latch observed between items. Setting it stops the run after the
    /// current item. Each run clears it on entry.
    #[must_use]
    pub fn latch(&self) -> &InterruptLatch {
        &self.latch
    }

    /// The collaborator context handed to every expansion.
    #[must_use]
    pub fn context(&self) -> &T::Context {
        &self.context
    }

    /// Drains the queue seeded with `seeds`.
    ///
    /// Items matching `skip` are dropped before expansion. Duplicate
    /// identities, among seeds or discovered children, are processed once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] only when a checkpoint cannot be written;
    /// item faults are reported through [`RunOutcome::Failed`].
    #[instrument(skip_all, fields(seeds = seeds.len(), skip_rules = skip.len()))]
    pub async fn run(
        &self,
        seeds: Vec<T>,
        skip: SkipRules,
    ) -> Result<RunOutcome<T::Error>, EngineError> {
        let stats = Arc::new(RunStats::new());
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<T> = VecDeque::with_capacity(seeds.len());

        for seed in seeds {
            if seen.insert(seed.id_string()) {
                stats.mark_total(seed.stats_group());
                queue.push_back(seed);
            } else {
                debug!(item = %seed.id_string(), "duplicate seed dropped");
            }
        }
        info!(queued = queue.len(), "starting run");

        self.latch.clear();
        let _signals = self.options.listen_for_signals.then(|| self.latch.listen());
        let reporter = Reporter::spawn(
            Arc::clone(&stats),
            self.bytes.clone(),
            self.options.report_interval,
            self.options.show_progress,
        );

        while let Some(item) = queue.pop_front() {
            let id = item.id_string();

            if let Some(rule) = skip.find_match(&item) {
                debug!(item = %id, %rule, "skipped");
                continue;
            }

            let mut found = Discovery::new(&mut seen, &stats);
            let expanded = item
                .expand(&self.context, &mut found)
                .await
                .map_err(ItemFault::Expand);
            let children = found.into_children();

            let processed = match expanded {
                Ok(()) => self
                    .storage
                    .write_meta(&item, &children)
                    .await
                    .map(|_| ())
                    .map_err(ItemFault::Storage),
                Err(fault) => Err(fault),
            };

            if let Err(cause) = processed {
                error!(item = %id, error = %cause, "item failed, writing checkpoint");
                let saved = self
                    .checkpoints
                    .save(std::iter::once(&item).chain(queue.iter()), &skip)
                    .await;
                reporter.stop().await;
                let checkpoint = saved.map_err(|source| EngineError::CheckpointAfterFault {
                    item: id.clone(),
                    cause: cause.to_string(),
                    source,
                })?;
                return Ok(RunOutcome::Failed {
                    checkpoint,
                    item: id,
                    cause,
                    summary: RunSummary::capture(&stats),
                });
            }

            debug!(item = %id, children = children.len(), "item completed");
            queue.extend(children);
            stats.mark_completed(item.stats_group(), item.type_tag());

            if self.latch.is_set() {
                warn!(last_completed = %id, remaining = queue.len(), "interrupted");
                reporter.stop().await;
                let checkpoint = self.checkpoints.save(queue.iter(), &skip).await?;
                return Ok(RunOutcome::Interrupted {
                    checkpoint,
                    last_completed: id,
                    summary: RunSummary::capture(&stats),
                });
            }
        }

        reporter.stop().await;
        let summary = RunSummary::capture(&stats);
        info!(completed = summary.total_completed(), "run completed");
        Ok(RunOutcome::Completed { summary })
    }
}
