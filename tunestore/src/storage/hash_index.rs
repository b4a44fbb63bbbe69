//! Open-addressing hash index from record content to handle.
//!
//! Buckets come from a base-256 fold of the content (see [`fold_hash`]),
//! collisions are resolved by quadratic probing, and deletions leave
//! tombstones so that probe chains stay intact. The table doubles before
//! an insertion would take it past half full.
//!
//! The index stores handles only. Content is resolved through the arena
//! passed to each call, so the index never needs a reference to it.

use crate::storage::arena::{Arena, ArenaError, Relocation, RelocationError};
use crate::storage::handle::Handle;

/// State of one table slot.
///
/// `Empty -> Occupied -> Tombstone -> Occupied`; a tombstone only becomes
/// empty again through a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Occupied(Handle),
    Tombstone,
}

/// Fold content into an integer, four bytes at a time.
///
/// Each group of up to four bytes is read as a little-endian base-256
/// number and the groups are summed. This is a content fold, not a
/// cryptographic hash.
///
/// The fold runs over UTF-8 bytes. For ASCII names that equals folding
/// one character per byte; a non-ASCII character contributes each of its
/// encoded bytes, so its bucket (and its position in an index dump)
/// differs from a fold over 16-bit code units.
#[must_use]
pub fn fold_hash(content: &[u8]) -> u64 {
    content
        .chunks(4)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
        })
        .fold(0u64, u64::wrapping_add)
}

/// Home bucket of `content` in a table of `capacity` slots.
// The modulus is below `capacity`, which is a usize.
#[allow(clippy::cast_possible_truncation)]
fn home_slot(content: &[u8], capacity: usize) -> usize {
    (fold_hash(content) % capacity as u64) as usize
}

/// Quadratic probe sequence `home + i^2 (mod capacity)` for `i` in `0..capacity`.
fn probe(home: usize, capacity: usize) -> impl Iterator<Item = usize> {
    (0..capacity).map(move |i| (home + (i * i) % capacity) % capacity)
}

/// Hash index over one record kind.
///
/// # Invariants
///
/// - `count` equals the number of `Occupied` slots
/// - after every successful insert, `count <= capacity / 2`
/// - every occupied handle resolves to a live record in the arena
#[derive(Debug)]
pub struct HashIndex {
    slots: Vec<Slot>,
    count: usize,
    initial_capacity: usize,
}

impl HashIndex {
    /// Create an empty index with `initial_capacity` slots, at least one.
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        let initial_capacity = initial_capacity.max(1);
        Self {
            slots: vec![Slot::Empty; initial_capacity],
            count: 0,
            initial_capacity,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Whether the index has no live entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current number of slots.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len is not const
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Register a handle.
    ///
    /// Doubles the table first if the new entry would exceed half the
    /// capacity. Does not deduplicate: callers search before inserting.
    /// Returns the slot the handle landed in.
    ///
    /// # Errors
    ///
    /// `IndexError::CapacityExhausted` if a full probe cycle finds no empty
    /// or tombstoned slot. The index is unchanged in that case.
    pub fn insert(&mut self, handle: Handle, arena: &Arena) -> Result<usize, IndexError> {
        if self.count + 1 > self.capacity() / 2 {
            self.grow(arena)?;
        }

        let content = arena.get(&handle)?;
        let capacity = self.capacity();
        let slot = probe(home_slot(content, capacity), capacity)
            .find(|&pos| !matches!(self.slots[pos], Slot::Occupied(_)))
            .ok_or(IndexError::CapacityExhausted { capacity })?;

        self.slots[slot] = Slot::Occupied(handle);
        self.count += 1;
        Ok(slot)
    }

    /// Find the handle whose record content equals `content`.
    ///
    /// Tombstones are skipped; the first empty slot ends the search.
    #[must_use]
    pub fn search(&self, content: &[u8], arena: &Arena) -> Option<Handle> {
        self.find_slot(content, |handle| {
            arena.get(handle).is_ok_and(|bytes| bytes == content)
        })
        .map(|(_, handle)| handle)
    }

    /// Remove the entry for exactly this handle.
    ///
    /// Matches by position, not content, so two records with equal bytes
    /// are never confused. Returns the removed handle, or `None` if absent.
    pub fn delete(&mut self, handle: &Handle, arena: &Arena) -> Result<Option<Handle>, IndexError> {
        let content = arena.get(handle)?;
        let found = self.find_slot(content, |candidate| candidate == handle);

        Ok(found.map(|(slot, removed)| {
            self.slots[slot] = Slot::Tombstone;
            self.count -= 1;
            removed
        }))
    }

    /// Reset to an empty table of the initially configured capacity.
    pub fn clear(&mut self) {
        self.slots = vec![Slot::Empty; self.initial_capacity];
        self.count = 0;
    }

    /// Live entries as `(slot, handle)` in physical slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Handle)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| match entry {
                Slot::Occupied(handle) => Some((slot, *handle)),
                Slot::Empty | Slot::Tombstone => None,
            })
    }

    /// Rewrite every held handle after an arena relocation.
    ///
    /// Content is unchanged by a relocation, so every entry keeps its slot.
    pub fn relocate(&mut self, relocation: &Relocation) -> Result<(), RelocationError> {
        for slot in &mut self.slots {
            if let Slot::Occupied(handle) = slot {
                *handle = relocation.translate(*handle)?;
            }
        }
        Ok(())
    }

    /// Rebuild into a table of at least double the capacity.
    ///
    /// Tombstones are dropped. If quadratic probing cannot place every live
    /// entry, the capacity is doubled again.
    pub fn grow(&mut self, arena: &Arena) -> Result<(), IndexError> {
        let old_capacity = self.capacity();
        let mut capacity = old_capacity * 2;
        loop {
            if let Some(slots) = self.rebuild(capacity, arena)? {
                self.slots = slots;
                break;
            }
            capacity *= 2;
        }

        tracing::debug!(
            "hash index resized: capacity {} -> {}, {} live entries",
            old_capacity,
            capacity,
            self.count
        );
        Ok(())
    }

    /// Rehash every live entry into a fresh table of `capacity` slots.
    ///
    /// Returns `None` if some entry found no empty slot.
    fn rebuild(&self, capacity: usize, arena: &Arena) -> Result<Option<Vec<Slot>>, IndexError> {
        let mut slots = vec![Slot::Empty; capacity];
        for (_, handle) in self.iter() {
            let content = arena.get(&handle)?;
            let Some(pos) = probe(home_slot(content, capacity), capacity)
                .find(|&pos| slots[pos] == Slot::Empty)
            else {
                return Ok(None);
            };
            slots[pos] = Slot::Occupied(handle);
        }
        Ok(Some(slots))
    }

    /// Walk the probe sequence for `content` and return the first occupied
    /// slot accepted by `matches`.
    fn find_slot(
        &self,
        content: &[u8],
        matches: impl Fn(&Handle) -> bool,
    ) -> Option<(usize, Handle)> {
        let capacity = self.capacity();
        for pos in probe(home_slot(content, capacity), capacity) {
            match &self.slots[pos] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(handle) => {
                    if matches(handle) {
                        return Some((pos, *handle));
                    }
                }
            }
        }
        None
    }
}

/// Errors that can occur during hash index operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// A full probe cycle found no open slot.
    CapacityExhausted { capacity: usize },
    /// A handle could not be resolved in the arena.
    Arena(ArenaError),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExhausted { capacity } => {
                write!(f, "no open slot in probe cycle of table with {capacity} slots")
            }
            Self::Arena(e) => write!(f, "arena error: {e}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CapacityExhausted { .. } => None,
            Self::Arena(e) => Some(e),
        }
    }
}

impl From<ArenaError> for IndexError {
    fn from(e: ArenaError) -> Self {
        Self::Arena(e)
    }
}
