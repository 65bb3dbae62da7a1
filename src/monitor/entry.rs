//! Directory entries and their change masks

use std::fmt;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

/// Longest filename kept in an entry, in bytes
pub const MAX_FILENAME: usize = 255;

/// Metadata captured for one directory entry during a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMeta {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Timestamps are whole seconds since the epoch
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub inode: u64,
}

impl From<&Metadata> for FileMeta {
    fn from(meta: &Metadata) -> Self {
        Self {
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            atime: meta.atime(),
            mtime: meta.mtime(),
            ctime: meta.ctime(),
            inode: meta.ino(),
        }
    }
}

/// One monitored attribute category
///
/// Declaration order is the order in which modifications are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Permissions,
    Uid,
    Gid,
    Size,
    AccessTime,
    ModifyTime,
    StatusTime,
}

impl Attribute {
    pub const ALL: [Attribute; 7] = [
        Attribute::Permissions,
        Attribute::Uid,
        Attribute::Gid,
        Attribute::Size,
        Attribute::AccessTime,
        Attribute::ModifyTime,
        Attribute::StatusTime,
    ];

    /// Bit for this category in a [`ChangeMask`]
    pub const fn mask(self) -> ChangeMask {
        match self {
            Attribute::Permissions => ChangeMask::PERMISSIONS,
            Attribute::Uid => ChangeMask::UID,
            Attribute::Gid => ChangeMask::GID,
            Attribute::Size => ChangeMask::SIZE,
            Attribute::AccessTime => ChangeMask::ATIME,
            Attribute::ModifyTime => ChangeMask::MTIME,
            Attribute::StatusTime => ChangeMask::CTIME,
        }
    }

    /// Human readable name sent to subscribers
    pub const fn describe(self) -> &'static str {
        match self {
            Attribute::Permissions => "permissions",
            Attribute::Uid => "UID owner",
            Attribute::Gid => "GID owner",
            Attribute::Size => "size",
            Attribute::AccessTime => "last access time",
            Attribute::ModifyTime => "last modification time",
            Attribute::StatusTime => "last file status time",
        }
    }

    /// Whether this attribute differs between two metadata snapshots
    pub fn differs(self, a: &FileMeta, b: &FileMeta) -> bool {
        match self {
            Attribute::Permissions => a.mode != b.mode,
            Attribute::Uid => a.uid != b.uid,
            Attribute::Gid => a.gid != b.gid,
            Attribute::Size => a.size != b.size,
            Attribute::AccessTime => a.atime != b.atime,
            Attribute::ModifyTime => a.mtime != b.mtime,
            Attribute::StatusTime => a.ctime != b.ctime,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Per-entry change classification
///
/// Bits are only ever set or cleared, never toggled.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChangeMask(u16);

impl ChangeMask {
    pub const EMPTY: ChangeMask = ChangeMask(0);
    pub const PERMISSIONS: ChangeMask = ChangeMask(1 << 0);
    pub const UID: ChangeMask = ChangeMask(1 << 1);
    pub const GID: ChangeMask = ChangeMask(1 << 2);
    pub const SIZE: ChangeMask = ChangeMask(1 << 3);
    pub const ATIME: ChangeMask = ChangeMask(1 << 4);
    pub const MTIME: ChangeMask = ChangeMask(1 << 5);
    pub const CTIME: ChangeMask = ChangeMask(1 << 6);
    pub const ADDED: ChangeMask = ChangeMask(1 << 7);
    pub const REMOVED: ChangeMask = ChangeMask(1 << 8);
    pub const MODIFIED: ChangeMask = ChangeMask(1 << 9);
    pub const CHECKED: ChangeMask = ChangeMask(1 << 10);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: ChangeMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: ChangeMask) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Attribute categories flagged in this mask, in reporting order
    pub fn attributes(self) -> impl Iterator<Item = Attribute> {
        Attribute::ALL
            .into_iter()
            .filter(move |attr| self.contains(attr.mask()))
    }
}

impl std::ops::BitOr for ChangeMask {
    type Output = ChangeMask;

    fn bitor(self, rhs: ChangeMask) -> ChangeMask {
        ChangeMask(self.0 | rhs.0)
    }
}

impl fmt::Debug for ChangeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ChangeMask, &str); 11] = [
            (ChangeMask::PERMISSIONS, "PERMISSIONS"),
            (ChangeMask::UID, "UID"),
            (ChangeMask::GID, "GID"),
            (ChangeMask::SIZE, "SIZE"),
            (ChangeMask::ATIME, "ATIME"),
            (ChangeMask::MTIME, "MTIME"),
            (ChangeMask::CTIME, "CTIME"),
            (ChangeMask::ADDED, "ADDED"),
            (ChangeMask::REMOVED, "REMOVED"),
            (ChangeMask::MODIFIED, "MODIFIED"),
            (ChangeMask::CHECKED, "CHECKED"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ChangeMask({})", set.join(" | "))
    }
}

/// A directory entry as recorded by one scan
#[derive(Debug, Clone, Default)]
pub struct Entry {
    /// Raw name bytes as returned by the directory listing
    pub filename: Vec<u8>,
    pub meta: FileMeta,
    pub mask: ChangeMask,
}

impl Entry {
    /// Overwrite this entry in place, reusing the filename allocation
    pub fn fill(&mut self, filename: &[u8], meta: FileMeta) {
        self.filename.clear();
        self.filename
            .extend_from_slice(&filename[..filename.len().min(MAX_FILENAME)]);
        self.meta = meta;
        self.mask.clear();
    }

    pub fn is_checked(&self) -> bool {
        self.mask.contains(ChangeMask::CHECKED)
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_is_idempotent() {
        let mut mask = ChangeMask::EMPTY;
        mask.set(ChangeMask::SIZE);
        mask.set(ChangeMask::SIZE);
        assert!(mask.contains(ChangeMask::SIZE));
        mask.clear();
        assert!(mask.is_empty());
    }

    #[test]
    fn test_attributes_follow_report_order() {
        let mask = ChangeMask::CTIME | ChangeMask::PERMISSIONS | ChangeMask::SIZE;
        let attrs: Vec<Attribute> = mask.attributes().collect();
        assert_eq!(
            attrs,
            vec![Attribute::Permissions, Attribute::Size, Attribute::StatusTime]
        );
    }

    #[test]
    fn test_fill_truncates_long_names() {
        let mut entry = Entry::default();
        let long = vec![b'x'; 300];
        entry.fill(&long, FileMeta::default());
        assert_eq!(entry.filename.len(), MAX_FILENAME);
    }

    #[test]
    fn test_fill_keeps_non_utf8_bytes() {
        let mut entry = Entry::default();
        entry.fill(b"caf\xe9.txt", FileMeta::default());
        assert_eq!(entry.filename, b"caf\xe9.txt");
    }

    #[test]
    fn test_fill_clears_mask() {
        let mut entry = Entry::default();
        entry.mask.set(ChangeMask::ADDED | ChangeMask::CHECKED);
        entry.fill(b"a.txt", FileMeta::default());
        assert!(entry.mask.is_empty());
        assert_eq!(entry.filename, b"a.txt");
    }

    #[test]
    fn test_mask_debug_lists_bits() {
        let mask = ChangeMask::MODIFIED | ChangeMask::UID;
        assert_eq!(format!("{:?}", mask), "ChangeMask(UID | MODIFIED)");
    }
}
