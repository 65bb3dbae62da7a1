//! Scan cycle driver
//!
//! [`DirectoryMonitor`] owns the arena and the two live snapshots. A cycle is
//! [`DirectoryMonitor::rescan`] followed, once every subscriber has been
//! notified, by [`DirectoryMonitor::finish_cycle`].

use std::mem;
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::arena::{ArenaStats, EntryArena};
use super::diff::{collect_changes, compute_diff, Change};
use super::snapshot::{scan, Snapshot};

/// Outcome of one rescan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Number of changes found; equals `changes.len()`
    pub count: usize,
    /// Changes in reporting order
    pub changes: Vec<Change>,
}

/// Watches one directory across scan cycles
#[derive(Debug)]
pub struct DirectoryMonitor {
    root: PathBuf,
    arena: EntryArena,
    previous: Snapshot,
    current: Snapshot,
    in_cycle: bool,
}

impl DirectoryMonitor {
    /// Create a monitor and record the initial state of `root`
    pub fn open(root: impl Into<PathBuf>, arena_capacity: usize) -> Result<Self> {
        let root = root.into();
        let mut arena = EntryArena::with_capacity(arena_capacity);
        let mut previous = Snapshot::new();
        scan(&root, &mut arena, &mut previous)?;

        tracing::info!(
            "Monitoring {} ({} entries, arena of {} nodes)",
            root.display(),
            previous.len(),
            arena.capacity()
        );

        Ok(Self {
            root,
            arena,
            previous,
            current: Snapshot::new(),
            in_cycle: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entries recorded by the last completed scan
    pub fn entry_count(&self) -> usize {
        self.previous.len()
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Scan the directory again and diff it against the last completed scan
    ///
    /// On failure the partial scan is discarded and the previous state kept.
    pub fn rescan(&mut self) -> Result<CycleReport> {
        if self.in_cycle {
            // A cycle was abandoned before finish_cycle; start over from the last good scan
            self.discard_current();
        }

        if let Err(e) = scan(&self.root, &mut self.arena, &mut self.current) {
            self.discard_current();
            return Err(e);
        }
        self.in_cycle = true;

        let count = compute_diff(&mut self.arena, &mut self.previous, &mut self.current);
        let changes = collect_changes(&self.arena, &self.previous, &self.current);
        debug_assert_eq!(count, changes.len());

        tracing::debug!("Rescan of {} found {} changes", self.root.display(), count);
        Ok(CycleReport { count, changes })
    }

    /// Retire the previous snapshot: the fresh scan becomes the baseline, the
    /// stale nodes go back to the arena and every retained mask is cleared.
    pub fn finish_cycle(&mut self) {
        if !self.in_cycle {
            return;
        }
        mem::swap(&mut self.previous, &mut self.current);
        self.current.recycle(&mut self.arena);
        self.previous.clear_masks(&mut self.arena);
        self.in_cycle = false;
    }

    fn discard_current(&mut self) {
        self.current.recycle(&mut self.arena);
        self.previous.clear_masks(&mut self.arena);
        self.in_cycle = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_initial_scan_then_quiet_cycle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "a").unwrap();

        let mut monitor = DirectoryMonitor::open(dir.path(), 4).unwrap();
        assert_eq!(monitor.entry_count(), 1);

        let report = monitor.rescan().unwrap();
        assert_eq!(report.count, 0);
        monitor.finish_cycle();

        let report = monitor.rescan().unwrap();
        assert_eq!(report.count, 0);
        monitor.finish_cycle();
    }

    #[test]
    fn test_added_then_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = DirectoryMonitor::open(dir.path(), 4).unwrap();

        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let report = monitor.rescan().unwrap();
        assert_eq!(report.changes, vec![Change::Added(b"a.txt".to_vec())]);
        monitor.finish_cycle();
        assert_eq!(monitor.entry_count(), 1);

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        let report = monitor.rescan().unwrap();
        assert_eq!(report.changes, vec![Change::Removed(b"a.txt".to_vec())]);
        monitor.finish_cycle();
        assert_eq!(monitor.entry_count(), 0);
    }

    #[test]
    fn test_nodes_are_recycled_across_cycles() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let mut monitor = DirectoryMonitor::open(dir.path(), 8).unwrap();

        for _ in 0..5 {
            monitor.rescan().unwrap();
            monitor.finish_cycle();
            let stats = monitor.arena_stats();
            assert_eq!(stats.allocated, 3);
            assert_eq!(stats.free + stats.allocated, stats.capacity);
        }
    }

    #[test]
    fn test_failed_rescan_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched");
        fs::create_dir(&watched).unwrap();
        fs::write(watched.join("keep"), "k").unwrap();

        let mut monitor = DirectoryMonitor::open(&watched, 4).unwrap();
        fs::remove_dir_all(&watched).unwrap();

        assert!(monitor.rescan().is_err());
        assert_eq!(monitor.entry_count(), 1);
        assert_eq!(monitor.arena_stats().allocated, 1);
    }
}
