//! Snapshot comparison
//!
//! Entries are matched across scans by inode number only. A renamed file
//! keeps its inode and is reported as unchanged unless one of the monitored
//! attributes also differs; the protocol has no notion of a rename.

use std::collections::HashMap;

use super::arena::EntryArena;
use super::entry::{Attribute, ChangeMask, FileMeta};
use super::snapshot::Snapshot;

/// One reportable change, produced from the masks left by [`compute_diff`]
///
/// Filenames are the raw bytes of the directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(Vec<u8>),
    Removed(Vec<u8>),
    Modified(Vec<u8>, Attribute),
}

impl Change {
    pub fn filename(&self) -> &[u8] {
        match self {
            Change::Added(name) | Change::Removed(name) | Change::Modified(name, _) => name,
        }
    }
}

/// Compare `previous` against `current`, flag every entry's mask in place and
/// return the number of changes.
///
/// Each differing attribute of an inode-matched pair counts once; an entry
/// only in `previous` counts as removed, one only in `current` as added.
pub fn compute_diff(arena: &mut EntryArena, previous: &mut Snapshot, current: &mut Snapshot) -> usize {
    if previous.is_empty() && current.is_empty() {
        return 0;
    }

    let prev_meta: Vec<FileMeta> = previous.iter(arena).map(|e| e.meta).collect();
    let cur_meta: Vec<FileMeta> = current.iter(arena).map(|e| e.meta).collect();
    let mut prev_masks: Vec<ChangeMask> = previous.iter(arena).map(|e| e.mask).collect();
    let mut cur_masks: Vec<ChangeMask> = current.iter(arena).map(|e| e.mask).collect();

    // Hard links share an inode, so keep every position per inode
    let mut by_inode: HashMap<u64, Vec<usize>> = HashMap::with_capacity(cur_meta.len());
    for (index, meta) in cur_meta.iter().enumerate() {
        by_inode.entry(meta.inode).or_default().push(index);
    }

    let mut count = 0;

    for (p, meta) in prev_meta.iter().enumerate() {
        if prev_masks[p].contains(ChangeMask::CHECKED) {
            continue;
        }

        let matched = by_inode.get(&meta.inode).and_then(|candidates| {
            candidates
                .iter()
                .copied()
                .find(|&c| !cur_masks[c].contains(ChangeMask::CHECKED))
        });

        match matched {
            Some(c) => {
                for attr in Attribute::ALL {
                    if attr.differs(meta, &cur_meta[c]) {
                        prev_masks[p].set(ChangeMask::MODIFIED | attr.mask());
                        count += 1;
                    }
                }
                prev_masks[p].set(ChangeMask::CHECKED);
                cur_masks[c].set(ChangeMask::CHECKED);
            }
            None => {
                prev_masks[p].set(ChangeMask::REMOVED);
                count += 1;
            }
        }
    }

    for mask in cur_masks.iter_mut() {
        if !mask.contains(ChangeMask::CHECKED) {
            mask.set(ChangeMask::ADDED);
            count += 1;
        }
    }

    write_masks(arena, previous, &prev_masks);
    write_masks(arena, current, &cur_masks);

    count
}

fn write_masks(arena: &mut EntryArena, snapshot: &mut Snapshot, masks: &[ChangeMask]) {
    for (index, mask) in masks.iter().enumerate() {
        if let Some(entry) = snapshot.entry_mut(arena, index) {
            entry.mask = *mask;
        }
    }
}

/// List the changes flagged by [`compute_diff`] in reporting order:
/// modifications and removals from `previous` in scan order, then additions
/// from `current` in scan order.
pub fn collect_changes(arena: &EntryArena, previous: &Snapshot, current: &Snapshot) -> Vec<Change> {
    let mut changes = Vec::new();

    for entry in previous.iter(arena) {
        if entry.mask.contains(ChangeMask::REMOVED) {
            changes.push(Change::Removed(entry.filename.clone()));
        } else if entry.mask.contains(ChangeMask::MODIFIED) {
            for attr in entry.mask.attributes() {
                changes.push(Change::Modified(entry.filename.clone(), attr));
            }
        }
    }

    for entry in current.iter(arena) {
        if entry.mask.contains(ChangeMask::ADDED) {
            changes.push(Change::Added(entry.filename.clone()));
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(inode: u64) -> FileMeta {
        FileMeta {
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            size: 10,
            atime: 100,
            mtime: 100,
            ctime: 100,
            inode,
        }
    }

    fn snapshot(arena: &mut EntryArena, entries: &[(&str, FileMeta)]) -> Snapshot {
        let mut snap = Snapshot::new();
        for (name, m) in entries {
            snap.push_entry(arena, name.as_bytes(), *m);
        }
        snap
    }

    #[test]
    fn test_both_empty() {
        let mut arena = EntryArena::with_capacity(4);
        let mut prev = Snapshot::new();
        let mut cur = Snapshot::new();
        assert_eq!(compute_diff(&mut arena, &mut prev, &mut cur), 0);
        assert!(collect_changes(&arena, &prev, &cur).is_empty());
    }

    #[test]
    fn test_added_file() {
        let mut arena = EntryArena::with_capacity(4);
        let mut prev = Snapshot::new();
        let mut cur = snapshot(&mut arena, &[("a.txt", meta(7))]);

        assert_eq!(compute_diff(&mut arena, &mut prev, &mut cur), 1);
        assert_eq!(
            collect_changes(&arena, &prev, &cur),
            vec![Change::Added(b"a.txt".to_vec())]
        );
    }

    #[test]
    fn test_removed_file() {
        let mut arena = EntryArena::with_capacity(4);
        let mut prev = snapshot(&mut arena, &[("gone", meta(3))]);
        let mut cur = Snapshot::new();

        assert_eq!(compute_diff(&mut arena, &mut prev, &mut cur), 1);
        assert_eq!(
            collect_changes(&arena, &prev, &cur),
            vec![Change::Removed(b"gone".to_vec())]
        );
    }

    #[test]
    fn test_permissions_and_size_in_order() {
        let mut arena = EntryArena::with_capacity(4);
        let mut changed = meta(5);
        changed.size = 99;
        changed.mode = 0o100600;

        let mut prev = snapshot(&mut arena, &[("a.txt", meta(5))]);
        let mut cur = snapshot(&mut arena, &[("a.txt", changed)]);

        assert_eq!(compute_diff(&mut arena, &mut prev, &mut cur), 2);
        assert_eq!(
            collect_changes(&arena, &prev, &cur),
            vec![
                Change::Modified(b"a.txt".to_vec(), Attribute::Permissions),
                Change::Modified(b"a.txt".to_vec(), Attribute::Size),
            ]
        );
    }

    #[test]
    fn test_rename_of_same_inode_is_unchanged() {
        let mut arena = EntryArena::with_capacity(4);
        let mut prev = snapshot(&mut arena, &[("old", meta(9))]);
        let mut cur = snapshot(&mut arena, &[("new", meta(9))]);

        assert_eq!(compute_diff(&mut arena, &mut prev, &mut cur), 0);
    }

    #[test]
    fn test_identical_snapshots_diff_to_zero_twice() {
        let mut arena = EntryArena::with_capacity(8);
        let entries = [("a", meta(1)), ("b", meta(2)), ("c", meta(3))];
        let mut prev = snapshot(&mut arena, &entries);
        let mut cur = snapshot(&mut arena, &entries);

        assert_eq!(compute_diff(&mut arena, &mut prev, &mut cur), 0);
        prev.clear_masks(&mut arena);
        cur.clear_masks(&mut arena);
        assert_eq!(compute_diff(&mut arena, &mut prev, &mut cur), 0);
    }

    #[test]
    fn test_count_matches_independent_tally() {
        let mut arena = EntryArena::with_capacity(4);
        let mut touched = meta(2);
        touched.atime = 500;
        touched.mtime = 500;
        touched.uid = 0;

        // inode 1 removed, inode 2 three attributes, inode 3 untouched, inode 4 added
        let mut prev = snapshot(&mut arena, &[("a", meta(1)), ("b", meta(2)), ("c", meta(3))]);
        let mut cur = snapshot(&mut arena, &[("b", touched), ("c", meta(3)), ("d", meta(4))]);

        let count = compute_diff(&mut arena, &mut prev, &mut cur);
        assert_eq!(count, 1 + 3 + 1);

        let changes = collect_changes(&arena, &prev, &cur);
        assert_eq!(changes.len(), count);
        assert_eq!(
            changes,
            vec![
                Change::Removed(b"a".to_vec()),
                Change::Modified(b"b".to_vec(), Attribute::Uid),
                Change::Modified(b"b".to_vec(), Attribute::AccessTime),
                Change::Modified(b"b".to_vec(), Attribute::ModifyTime),
                Change::Added(b"d".to_vec()),
            ]
        );
    }

    #[test]
    fn test_hard_links_match_one_to_one() {
        let mut arena = EntryArena::with_capacity(8);
        let mut prev = snapshot(&mut arena, &[("x", meta(4)), ("y", meta(4))]);
        let mut cur = snapshot(&mut arena, &[("x", meta(4))]);

        // One link disappeared
        assert_eq!(compute_diff(&mut arena, &mut prev, &mut cur), 1);
        assert_eq!(
            collect_changes(&arena, &prev, &cur),
            vec![Change::Removed(b"y".to_vec())]
        );
    }
}
