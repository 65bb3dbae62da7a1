//! Directory monitoring
//!
//! Everything that knows about the watched directory: the entry arena, the
//! snapshot scanner, the diff engine and the cycle driver that ties them
//! together. None of it does any locking; the server keeps the
//! [`DirectoryMonitor`] behind an async mutex held for a whole cycle.
//!
//! # Cycle
//!
//! ```text
//!   previous (baseline)        current (fresh scan)
//!          │                          │
//!          └──── compute_diff ────────┘
//!                     │  masks set in place
//!                     ▼
//!             collect_changes ──► fan-out
//!                     │
//!               finish_cycle: swap, recycle stale, clear masks
//! ```

pub mod arena;
pub mod diff;
pub mod entry;
pub mod snapshot;
pub mod state;
pub mod watcher;

pub use arena::{ArenaError, ArenaStats, EntryArena, Node};
pub use diff::{collect_changes, compute_diff, Change};
pub use entry::{Attribute, ChangeMask, Entry, FileMeta, MAX_FILENAME};
pub use snapshot::{scan, Snapshot};
pub use state::ServerStatus;
pub use watcher::{CycleReport, DirectoryMonitor};
