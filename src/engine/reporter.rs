//! Live one-line status: throughput, bytes received, and per-group progress.
//!
//! The reporter runs as its own task for the duration of a run. It only reads
//! the shared [`RunStats`] and [`ByteCounter`]; it never touches the queue.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::stats::{RunStats, StatSnapshot};
use crate::transport::ByteCounter;

/// Number of samples kept for the sliding throughput window.
pub const RATE_WINDOW_CAPACITY: usize = 20;

/// Default period between status line refreshes.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Bounded ring of `(timestamp, cumulative bytes)` samples.
#[derive(Debug, Clone, Default)]
pub struct RateWindow {
    samples: VecDeque<(Instant, u64)>,
}

impl RateWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample and returns the throughput in bytes per second
    /// measured against the oldest sample still in the window.
    ///
    /// The first sample yields zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, now: Instant, bytes: u64) -> f64 {
        let rate = match self.samples.front() {
            Some(&(then, old_bytes)) => {
                let elapsed = now.saturating_duration_since(then).as_secs_f64();
                if elapsed > 0.0 {
                    bytes.saturating_sub(old_bytes) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        if self.samples.len() == RATE_WINDOW_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back((now, bytes));
        rate
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if no sample was recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Formats bytes per second as megabits per second, right-aligned.
#[must_use]
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{:6.2}Mbps", bytes_per_sec * 8e-6)
}

/// Builds the status line, e.g. `"  8.00Mbps  DL:1.0MB  Course:1/2  Page:0/5"`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn status_line(rate: &str, bytes: u64, groups: &[StatSnapshot]) -> String {
    let mut line = format!("{rate}  DL:{:.1}MB", bytes as f64 / 1e6);
    for group in groups {
        let _ = write!(line, "  {}:{}/{}", group.name, group.completed, group.total);
    }
    line
}

/// Handle to the running reporter task.
#[derive(Debug)]
pub struct Reporter {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    /// Spawns the reporter.
    ///
    /// With `visible == false` the status line is computed but not drawn,
    /// which keeps logs and tests free of terminal control sequences.
    #[must_use]
    pub fn spawn(
        stats: Arc<RunStats>,
        bytes: ByteCounter,
        interval: Duration,
        visible: bool,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let bar = if visible {
                ProgressBar::new_spinner()
            } else {
                ProgressBar::hidden()
            };
            bar.set_style(
                ProgressStyle::with_template("{msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );

            let mut window = RateWindow::new();
            let mut rate = format_rate(0.0);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        rate = format_rate(window.record(Instant::now(), bytes.total()));
                        bar.set_message(status_line(&rate, bytes.total(), &stats.snapshot()));
                    }
                }
            }

            let last = status_line(&rate, bytes.total(), &stats.snapshot());
            debug!(status = %last, "reporter stopped");
            bar.finish_with_message(last);
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stops the task after a final status refresh and waits for it.
    pub async fn stop(mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_reports_zero() {
        let mut window = RateWindow::new();
        assert!(window.record(Instant::now(), 5_000).abs() < f64::EPSILON);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_one_megabyte_per_second_is_eight_mbps() {
        let t0 = Instant::now();
        let mut window = RateWindow::new();
        window.record(t0, 0);
        let rate = window.record(t0 + Duration::from_secs(1), 1_000_000);

        assert!((rate - 1_000_000.0).abs() < 1e-6, "{rate}");
        assert_eq!(format_rate(rate), "  8.00Mbps");
    }

    #[test]
    fn test_rate_measured_against_oldest_sample() {
        let t0 = Instant::now();
        let mut window = RateWindow::new();
        window.record(t0, 0);
        window.record(t0 + Duration::from_secs(1), 4_000_000);
        let rate = window.record(t0 + Duration::from_secs(2), 4_000_000);
        assert!((rate - 2_000_000.0).abs() < 1e-6, "{rate}");
    }

    #[test]
    fn test_window_evicts_beyond_capacity() {
        let t0 = Instant::now();
        let mut window = RateWindow::new();
        for i in 0..30u64 {
            window.record(t0 + Duration::from_secs(i), i * 1_000);
        }
        assert_eq!(window.len(), RATE_WINDOW_CAPACITY);

        // Oldest retained sample is t=10s, 10_000 bytes.
        let rate = window.record(t0 + Duration::from_secs(30), 30_000);
        assert!((rate - 1_000.0).abs() < 1e-6, "{rate}");
    }

    #[test]
    fn test_same_instant_does_not_divide_by_zero() {
        let t0 = Instant::now();
        let mut window = RateWindow::new();
        window.record(t0, 0);
        assert!(window.record(t0, 100).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_line_lists_groups_in_order() {
        let groups = vec![
            StatSnapshot {
                name: "Course",
                total: 2,
                completed: 1,
            },
            StatSnapshot {
                name: "Page",
                total: 5,
                completed: 0,
            },
        ];
        assert_eq!(
            status_line("  8.00Mbps", 1_000_000, &groups),
            "  8.00Mbps  DL:1.0MB  Course:1/2  Page:0/5"
        );
    }

    #[tokio::test]
    async fn test_reporter_stops_promptly() {
        let stats = Arc::new(RunStats::new());
        stats.mark_total("Course");
        let reporter = Reporter::spawn(
            Arc::clone(&stats),
            ByteCounter::new(),
            Duration::from_millis(10),
            false,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        tokio::time::timeout(Duration::from_secs(2), reporter.stop())
            .await
            .unwrap();
    }
}
