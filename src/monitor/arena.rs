//! Fixed-capacity entry arena
//!
//! Snapshot entries are recycled between scan cycles instead of being
//! reallocated. Slots are addressed by index and generation, so a stale or
//! foreign handle is caught by a bounds/generation check rather than by
//! pointer arithmetic.
//!
//! When every slot is in use the arena spills to ordinary boxed entries.
//! Sizing only affects throughput, never correctness.

use super::entry::Entry;

/// Handle to an entry owned by an [`EntryArena`]
///
/// Nodes are neither `Clone` nor `Copy`: releasing one consumes it, so a slot
/// cannot be returned twice through the same handle.
#[derive(Debug)]
pub struct Node(NodeRepr);

#[derive(Debug)]
enum NodeRepr {
    Pooled { index: u32, generation: u32 },
    Spilled(Box<Entry>),
}

impl Node {
    /// Whether this node lives in the arena's preallocated block
    pub fn is_pooled(&self) -> bool {
        matches!(self.0, NodeRepr::Pooled { .. })
    }
}

/// Error returned when a node does not belong to the arena it is released to
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("slot {index} is outside an arena of {capacity} slots")]
    OutOfBounds { index: u32, capacity: usize },
    #[error("slot {index} was already released (generation {expected}, handle {found})")]
    StaleHandle { index: u32, expected: u32, found: u32 },
}

#[derive(Debug, Default)]
struct Slot {
    entry: Entry,
    generation: u32,
    in_use: bool,
}

/// Arena occupancy figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ArenaStats {
    pub capacity: usize,
    pub free: usize,
    pub allocated: usize,
    /// Entries currently living outside the preallocated block
    pub spilled: usize,
}

/// Preallocated slab of reusable entries
#[derive(Debug)]
pub struct EntryArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    allocated: usize,
    spilled: usize,
}

impl EntryArena {
    /// Create an arena with `capacity` preallocated entries
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        // Reverse so that slot 0 is handed out first
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free,
            allocated: 0,
            spilled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.slots.len(),
            free: self.free.len(),
            allocated: self.allocated,
            spilled: self.spilled,
        }
    }

    /// Take an entry from the free list, or from the heap once the block is
    /// exhausted. Never fails.
    pub fn allocate(&mut self) -> Node {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.in_use = true;
                self.allocated += 1;
                Node(NodeRepr::Pooled {
                    index,
                    generation: slot.generation,
                })
            }
            None => {
                self.spilled += 1;
                Node(NodeRepr::Spilled(Box::default()))
            }
        }
    }

    /// Return a node to the arena. Pooled slots go back on the free list with
    /// their change mask cleared; spilled entries are dropped.
    pub fn release(&mut self, node: Node) -> Result<(), ArenaError> {
        match node.0 {
            NodeRepr::Pooled { index, generation } => {
                let capacity = self.slots.len();
                let slot = self
                    .slots
                    .get_mut(index as usize)
                    .ok_or(ArenaError::OutOfBounds { index, capacity })?;
                if !slot.in_use || slot.generation != generation {
                    return Err(ArenaError::StaleHandle {
                        index,
                        expected: slot.generation,
                        found: generation,
                    });
                }
                slot.entry.mask.clear();
                slot.in_use = false;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
                self.allocated -= 1;
                Ok(())
            }
            NodeRepr::Spilled(_) => {
                self.spilled = self.spilled.saturating_sub(1);
                Ok(())
            }
        }
    }

    /// Borrow the entry behind a node
    ///
    /// Returns `None` for a node that was not issued by this arena or whose
    /// slot has since been released.
    pub fn get<'a>(&'a self, node: &'a Node) -> Option<&'a Entry> {
        match &node.0 {
            NodeRepr::Pooled { index, generation } => self
                .slots
                .get(*index as usize)
                .filter(|slot| slot.in_use && slot.generation == *generation)
                .map(|slot| &slot.entry),
            NodeRepr::Spilled(entry) => Some(&**entry),
        }
    }

    /// Mutable counterpart of [`EntryArena::get`]
    pub fn get_mut<'a>(&'a mut self, node: &'a mut Node) -> Option<&'a mut Entry> {
        match &mut node.0 {
            NodeRepr::Pooled { index, generation } => self
                .slots
                .get_mut(*index as usize)
                .filter(|slot| slot.in_use && slot.generation == *generation)
                .map(|slot| &mut slot.entry),
            NodeRepr::Spilled(entry) => Some(&mut **entry),
        }
    }
}
