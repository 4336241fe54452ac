//! Run-scoped counters shared between the engine and the progress reporter.
//!
//! The engine is the only writer. The reporter takes snapshots concurrently,
//! so every counter is an atomic inside a [`DashMap`] entry.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;

/// Per-group counter pair.
#[derive(Debug, Default)]
struct Stat {
    order: usize,
    total: AtomicU64,
    completed: AtomicU64,
}

/// Point-in-time copy of one group's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatSnapshot {
    /// Group name (stats group of the items).
    pub name: &'static str,
    /// Items discovered so far.
    pub total: u64,
    /// Items expanded successfully so far.
    pub completed: u64,
}

/// Counters for one engine run.
///
/// `stats` is keyed by stats group and drives the live status line;
/// `completions` is keyed by type tag and drives the final summary.
/// Both keep first-sighting order for display.
#[derive(Debug, Default)]
pub struct RunStats {
    stats: DashMap<&'static str, Stat>,
    completions: DashMap<&'static str, (usize, u64)>,
    next_order: AtomicUsize,
}

impl RunStats {
    /// Creates an empty set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one more discovered item in `group`.
    pub fn mark_total(&self, group: &'static str) {
        self.entry(group).total.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts one more completed item.
    ///
    /// The completed counter never overtakes the total: an item is only
    /// completed after it was discovered.
    pub fn mark_completed(&self, group: &'static str, type_tag: &'static str) {
        {
            let stat = self.entry(group);
            let total = stat.total.load(Ordering::SeqCst);
            let _ = stat
                .completed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |done| {
                    (done < total).then_some(done + 1)
                });
        }
        self.completions
            .entry(type_tag)
            .or_insert_with(|| (self.next_order.fetch_add(1, Ordering::SeqCst), 0))
            .1 += 1;
    }

    /// Snapshot of the per-group counters, in first-sighting order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StatSnapshot> {
        let mut rows: Vec<(usize, StatSnapshot)> = self
            .stats
            .iter()
            .map(|entry| {
                (
                    entry.order,
                    StatSnapshot {
                        name: *entry.key(),
                        total: entry.total.load(Ordering::SeqCst),
                        completed: entry.completed.load(Ordering::SeqCst),
                    },
                )
            })
            .collect();
        rows.sort_by_key(|(order, _)| *order);
        rows.into_iter().map(|(_, row)| row).collect()
    }

    /// Completed items per type tag, in first-completion order.
    #[must_use]
    pub fn completions(&self) -> Vec<(&'static str, u64)> {
        let mut rows: Vec<(usize, &'static str, u64)> = self
            .completions
            .iter()
            .map(|entry| (entry.value().0, *entry.key(), entry.value().1))
            .collect();
        rows.sort_by_key(|(order, ..)| *order);
        rows.into_iter().map(|(_, name, n)| (name, n)).collect()
    }

    /// Counters of a single group, if it has been seen.
    #[must_use]
    pub fn get(&self, group: &str) -> Option<StatSnapshot> {
        self.stats.get(group).map(|entry| StatSnapshot {
            name: *entry.key(),
            total: entry.total.load(Ordering::SeqCst),
            completed: entry.completed.load(Ordering::SeqCst),
        })
    }

    fn entry(&self, group: &'static str) -> RefMut<'_, &'static str, Stat> {
        self.stats.entry(group).or_insert_with(|| Stat {
            order: self.next_order.fetch_add(1, Ordering::SeqCst),
            ..Stat::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_created_lazily_in_first_sighting_order() {
        let stats = RunStats::new();
        assert!(stats.snapshot().is_empty());

        stats.mark_total("Course");
        stats.mark_total("Page");
        stats.mark_total("Page");
        stats.mark_total("File");

        let names: Vec<_> = stats.snapshot().iter().map(|s| s.name).collect();
        assert_eq!(names, ["Course", "Page", "File"]);
        assert_eq!(stats.get("Page").unwrap().total, 2);
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let stats = RunStats::new();
        stats.mark_total("Page");
        stats.mark_completed("Page", "Announcement");
        stats.mark_completed("Page", "Announcement");

        let page = stats.get("Page").unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.completed, 1);
    }

    #[test]
    fn test_completions_keyed_by_type_tag() {
        let stats = RunStats::new();
        for _ in 0..3 {
            stats.mark_total("Page");
        }
        stats.mark_completed("Page", "Homework");
        stats.mark_completed("Page", "Announcement");
        stats.mark_completed("Page", "Homework");

        assert_eq!(
            stats.completions(),
            vec![("Homework", 2), ("Announcement", 1)]
        );
    }

    #[test]
    fn test_snapshot_while_writing_from_another_thread() {
        use std::sync::Arc;

        let stats = Arc::new(RunStats::new());
        let writer = {
            let stats = Arc::clone(&stats);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.mark_total("File");
                    stats.mark_completed("File", "Attachment");
                }
            })
        };
        for _ in 0..100 {
            for row in stats.snapshot() {
                assert!(row.completed <= row.total);
            }
        }
        writer.join().unwrap();
        let file = stats.get("File").unwrap();
        assert_eq!((file.total, file.completed), (1000, 1000));
    }
}
