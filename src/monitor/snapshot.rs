//! Directory snapshots
//!
//! A [`Snapshot`] is the ordered list of entries recorded by one scan. The
//! entries themselves live in an [`EntryArena`]; the snapshot only holds
//! the nodes, in scan order.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{DirappError, FsOp, Result};

use super::arena::{EntryArena, Node};
use super::entry::{Entry, FileMeta};

/// Ordered sequence of entries from one directory scan
#[derive(Debug, Default)]
pub struct Snapshot {
    nodes: Vec<Node>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a populated node, preserving scan order
    pub(crate) fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Append a new entry allocated from `arena`
    pub fn push_entry(&mut self, arena: &mut EntryArena, filename: &[u8], meta: FileMeta) {
        let mut node = arena.allocate();
        if let Some(entry) = arena.get_mut(&mut node) {
            entry.fill(filename, meta);
        }
        self.push(node);
    }

    /// Iterate over entries in scan order
    pub fn iter<'a>(&'a self, arena: &'a EntryArena) -> impl Iterator<Item = &'a Entry> + 'a {
        self.nodes.iter().filter_map(move |node| arena.get(node))
    }

    /// Entry at position `index` in scan order
    pub fn entry<'a>(&'a self, arena: &'a EntryArena, index: usize) -> Option<&'a Entry> {
        self.nodes.get(index).and_then(|node| arena.get(node))
    }

    /// Mutable entry at position `index` in scan order
    pub fn entry_mut<'a>(
        &'a mut self,
        arena: &'a mut EntryArena,
        index: usize,
    ) -> Option<&'a mut Entry> {
        match self.nodes.get_mut(index) {
            Some(node) => arena.get_mut(node),
            None => None,
        }
    }

    /// Clear every entry's change mask
    pub fn clear_masks(&mut self, arena: &mut EntryArena) {
        for node in &mut self.nodes {
            if let Some(entry) = arena.get_mut(node) {
                entry.mask.clear();
            }
        }
    }

    /// Hand every node back to the arena, leaving the snapshot empty
    pub fn recycle(&mut self, arena: &mut EntryArena) {
        for node in self.nodes.drain(..) {
            if let Err(e) = arena.release(node) {
                // Only reachable if a node from another arena was pushed here
                tracing::error!("Dropping entry that does not belong to the arena: {}", e);
            }
        }
    }
}

/// Scan `path` into `into`, in alphabetical order
///
/// `into` is expected to be empty. Any failure to list the directory or to
/// stat one of its entries is reported as [`DirappError::Filesystem`], tagged
/// with the failing step; the caller treats it as fatal. Names are kept as
/// the raw bytes the listing returned.
pub fn scan(path: &Path, arena: &mut EntryArena, into: &mut Snapshot) -> Result<()> {
    let filesystem = |source| DirappError::Filesystem {
        op: FsOp::ListDirectory,
        path: path.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for dirent in fs::read_dir(path).map_err(filesystem)? {
        let dirent = dirent.map_err(filesystem)?;
        names.push(dirent.file_name());
    }
    // read_dir never yields "." or ".."
    names.sort_unstable_by(|a, b| a.as_encoded_bytes().cmp(b.as_encoded_bytes()));

    for name in names {
        let full = path.join(&name);
        let meta = fs::metadata(&full).map_err(|source| DirappError::Filesystem {
            op: FsOp::Stat,
            path: full.clone(),
            source,
        })?;
        into.push_entry(arena, name.as_bytes(), FileMeta::from(&meta));
    }

    tracing::debug!("Scanned {} entries in {}", into.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::fs;

    #[test]
    fn test_scan_is_alphabetical() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("c")).unwrap();

        let mut arena = EntryArena::with_capacity(8);
        let mut snapshot = Snapshot::new();
        scan(dir.path(), &mut arena, &mut snapshot).unwrap();

        let names: Vec<&[u8]> = snapshot
            .iter(&arena)
            .map(|e| e.filename.as_slice())
            .collect();
        let expected: [&[u8]; 3] = [b"a.txt", b"b.txt", b"c"];
        assert_eq!(names, expected);
    }

    #[test]
    fn test_scan_records_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sized"), "12345").unwrap();

        let mut arena = EntryArena::with_capacity(2);
        let mut snapshot = Snapshot::new();
        scan(dir.path(), &mut arena, &mut snapshot).unwrap();

        let entry = snapshot.entry(&arena, 0).unwrap();
        assert_eq!(entry.meta.size, 5);
        assert_ne!(entry.meta.inode, 0);
        assert!(entry.mask.is_empty());
    }

    #[test]
    fn test_scan_missing_directory_is_filesystem_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");

        let mut arena = EntryArena::with_capacity(2);
        let mut snapshot = Snapshot::new();
        let err = scan(&gone, &mut arena, &mut snapshot).unwrap_err();
        assert!(matches!(
            err,
            DirappError::Filesystem {
                op: FsOp::ListDirectory,
                ..
            }
        ));
    }

    #[test]
    fn test_scan_dangling_link_is_stat_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("dangling"))
            .unwrap();

        let mut arena = EntryArena::with_capacity(2);
        let mut snapshot = Snapshot::new();
        match scan(dir.path(), &mut arena, &mut snapshot).unwrap_err() {
            DirappError::Filesystem { op, path, .. } => {
                assert_eq!(op, FsOp::Stat);
                assert_eq!(path, dir.path().join("dangling"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scan_keeps_raw_name_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let name = OsStr::from_bytes(b"caf\xe9.txt");
        fs::write(dir.path().join(name), "x").unwrap();

        let mut arena = EntryArena::with_capacity(2);
        let mut snapshot = Snapshot::new();
        scan(dir.path(), &mut arena, &mut snapshot).unwrap();

        let entry = snapshot.entry(&arena, 0).unwrap();
        assert_eq!(entry.filename, b"caf\xe9.txt");
    }

    #[test]
    fn test_recycle_returns_nodes() {
        let mut arena = EntryArena::with_capacity(4);
        let mut snapshot = Snapshot::new();
        for name in ["a", "b", "c", "d", "e"] {
            snapshot.push_entry(&mut arena, name.as_bytes(), FileMeta::default());
        }
        assert_eq!(arena.stats().allocated, 4);
        assert_eq!(arena.stats().spilled, 1);

        snapshot.recycle(&mut arena);
        assert!(snapshot.is_empty());
        assert_eq!(arena.stats().free, 4);
        assert_eq!(arena.stats().spilled, 0);
    }
}
