//! Growable byte arena holding every string record.
//!
//! # Record Format
//!
//! ```text
//! Offset   Size   Field
//! 0        1      Active flag (0 = deleted, nonzero = live)
//! 1-2      2      Payload length (little-endian u16)
//! 3+       var    Payload bytes
//! ```
//!
//! Records are appended at the write cursor. Deleting a record clears its
//! flag byte; the bytes stay in place until the next growth, which copies
//! only live records into a fresh, larger buffer and bumps the generation.
//! Every relocation is reported to the caller as a [`Relocation`] map so
//! that holders of handles can rewrite them by position.

use std::collections::HashMap;

use crate::storage::handle::{Generation, Handle, RECORD_HEADER_SIZE};

/// Flag byte of a live record.
const FLAG_ACTIVE: u8 = 0x01;

/// Flag byte of a deleted record.
const FLAG_DELETED: u8 = 0x00;

/// Largest payload the 2-byte length header can describe.
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

/// The arena: one owned buffer plus a write cursor.
///
/// # Invariants
///
/// - `[0, cursor)` is a concatenation of well-formed records
/// - `cursor <= buffer.len()`
/// - `buffer.len()` only grows, in steps of `increment`
/// - `generation` changes exactly when `buffer` is replaced
#[derive(Debug)]
pub struct Arena {
    buffer: Vec<u8>,
    cursor: usize,
    increment: usize,
    generation: Generation,
}

/// Result of an arena insertion.
#[derive(Debug)]
pub struct Stored {
    /// Handle to the new record, valid in the current generation.
    pub handle: Handle,
    /// Present when the insertion had to grow the arena first. Every handle
    /// issued before this insertion must be passed through it.
    pub relocation: Option<Relocation>,
}

impl Arena {
    /// Create an arena whose initial capacity and growth step are both
    /// `block_size` bytes.
    ///
    /// Sizes below one record header are raised to [`RECORD_HEADER_SIZE`],
    /// so growth always makes progress.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(RECORD_HEADER_SIZE);
        Self {
            buffer: vec![0u8; block_size],
            cursor: 0,
            increment: block_size,
            generation: 0,
        }
    }

    /// Current generation (buffer identity).
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Total buffer size in bytes.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len is not const
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes in use, live and deleted records alike.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.cursor
    }

    /// Growth step in bytes.
    #[must_use]
    pub const fn increment(&self) -> usize {
        self.increment
    }

    /// Append a record holding `bytes`.
    ///
    /// Grows (and compacts) the arena first if the remaining space is less
    /// than the record size.
    pub fn insert(&mut self, bytes: &[u8]) -> Result<Stored, ArenaError> {
        let len = u16::try_from(bytes.len()).map_err(|_| ArenaError::RecordTooLarge {
            len: bytes.len(),
        })?;
        let needed = RECORD_HEADER_SIZE + bytes.len();

        let relocation = if self.buffer.len() - self.cursor < needed {
            Some(self.grow(needed))
        } else {
            None
        };

        let start = self.cursor;
        self.buffer[start] = FLAG_ACTIVE;
        self.buffer[start + 1..start + RECORD_HEADER_SIZE].copy_from_slice(&len.to_le_bytes());
        let offset = start + RECORD_HEADER_SIZE;
        self.buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.cursor = offset + bytes.len();

        Ok(Stored {
            handle: Handle::new(self.generation, offset, len),
            relocation,
        })
    }

    /// Resolve a handle to its payload bytes.
    pub fn get(&self, handle: &Handle) -> Result<&[u8], ArenaError> {
        self.check(handle)?;
        if self.buffer[handle.record_offset()] == FLAG_DELETED {
            return Err(ArenaError::Inactive {
                offset: handle.offset(),
            });
        }
        Ok(&self.buffer[handle.offset()..handle.end()])
    }

    /// Resolve a handle to its payload as UTF-8 text.
    pub fn get_str(&self, handle: &Handle) -> Result<&str, ArenaError> {
        let bytes = self.get(handle)?;
        std::str::from_utf8(bytes).map_err(|_| ArenaError::NotUtf8 {
            offset: handle.offset(),
        })
    }

    /// Whether the handle is current and its record is live.
    #[must_use]
    pub fn is_active(&self, handle: &Handle) -> bool {
        self.check(handle).is_ok() && self.buffer[handle.record_offset()] != FLAG_DELETED
    }

    /// Mark a record deleted.
    ///
    /// Returns `Ok(false)` if the record was already deleted. Space is only
    /// reclaimed by the next growth.
    pub fn delete(&mut self, handle: &Handle) -> Result<bool, ArenaError> {
        self.check(handle)?;
        let flag = &mut self.buffer[handle.record_offset()];
        if *flag == FLAG_DELETED {
            return Ok(false);
        }
        *flag = FLAG_DELETED;
        Ok(true)
    }

    /// Live records in storage order.
    ///
    /// The iterator borrows the arena; call again to restart.
    #[must_use]
    pub fn records(&self) -> Records<'_> {
        Records {
            raw: RawRecords::new(&self.buffer[..self.cursor]),
            generation: self.generation,
        }
    }

    /// Validate generation, bounds, and header of a handle.
    fn check(&self, handle: &Handle) -> Result<(), ArenaError> {
        if handle.generation() != self.generation {
            return Err(ArenaError::StaleHandle {
                handle_generation: handle.generation(),
                current_generation: self.generation,
            });
        }
        if handle.offset() < RECORD_HEADER_SIZE || handle.end() > self.cursor {
            return Err(ArenaError::OutOfBounds {
                offset: handle.offset(),
                len: handle.len(),
            });
        }
        let found = read_len(&self.buffer, handle.record_offset());
        if usize::from(found) != handle.len() {
            return Err(ArenaError::HeaderMismatch {
                offset: handle.offset(),
                expected: handle.len(),
                found: usize::from(found),
            });
        }
        Ok(())
    }

    /// Copy live records into a buffer with room for `needed` more bytes.
    fn grow(&mut self, needed: usize) -> Relocation {
        let old_capacity = self.buffer.len();
        let live_bytes: usize = RawRecords::new(&self.buffer[..self.cursor])
            .filter(RawRecord::is_active)
            .map(|r| RECORD_HEADER_SIZE + r.len)
            .sum();

        let mut new_capacity = old_capacity + self.increment;
        while new_capacity - live_bytes < needed {
            new_capacity += self.increment;
        }

        let mut buffer = vec![0u8; new_capacity];
        let mut moves = HashMap::new();
        let mut write = 0;
        for record in RawRecords::new(&self.buffer[..self.cursor]).filter(RawRecord::is_active) {
            let start = record.offset - RECORD_HEADER_SIZE;
            let size = RECORD_HEADER_SIZE + record.len;
            buffer[write..write + size].copy_from_slice(&self.buffer[start..start + size]);
            moves.insert(record.offset, write + RECORD_HEADER_SIZE);
            write += size;
        }

        let from = self.generation;
        let reclaimed = self.cursor - write;
        self.buffer = buffer;
        self.cursor = write;
        self.generation += 1;

        tracing::debug!(
            "arena relocated: generation {} -> {}, capacity {} -> {}, {} live records, {} bytes reclaimed",
            from,
            self.generation,
            old_capacity,
            new_capacity,
            moves.len(),
            reclaimed
        );

        Relocation {
            from,
            to: self.generation,
            moves,
        }
    }
}

/// Position map produced by one arena growth.
///
/// Maps every live payload offset of generation `from` to its offset in
/// generation `to`. Records deleted before the growth have no entry.
#[derive(Debug, Clone)]
pub struct Relocation {
    from: Generation,
    to: Generation,
    moves: HashMap<usize, usize>,
}

impl Relocation {
    /// Generation the moved handles were issued against.
    #[must_use]
    pub const fn from_generation(&self) -> Generation {
        self.from
    }

    /// Generation of the new buffer.
    #[must_use]
    pub const fn to_generation(&self) -> Generation {
        self.to
    }

    /// Number of records that survived the move.
    #[must_use]
    pub fn moved(&self) -> usize {
        self.moves.len()
    }

    /// Rewrite a handle into the new generation.
    ///
    /// Handles already in the new generation pass through unchanged.
    pub fn translate(&self, handle: Handle) -> Result<Handle, RelocationError> {
        if handle.generation() == self.to {
            return Ok(handle);
        }
        if handle.generation() != self.from {
            return Err(RelocationError::DanglingHandle { handle });
        }
        let len = u16::try_from(handle.len()).map_err(|_| RelocationError::DanglingHandle { handle })?;
        self.moves
            .get(&handle.offset())
            .map(|&offset| Handle::new(self.to, offset, len))
            .ok_or(RelocationError::DanglingHandle { handle })
    }
}

/// Iterator over live records, yielding each handle with its payload.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    raw: RawRecords<'a>,
    generation: Generation,
}

impl<'a> Iterator for Records<'a> {
    type Item = (Handle, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.raw.bytes;
        for record in self.raw.by_ref() {
            if record.is_active() {
                let payload = &bytes[record.offset..record.offset + record.len];
                // The length came out of a u16 header.
                #[allow(clippy::cast_possible_truncation)]
                let handle = Handle::new(self.generation, record.offset, record.len as u16);
                return Some((handle, payload));
            }
        }
        None
    }
}

/// One record header as found while scanning.
#[derive(Debug, Clone, Copy)]
struct RawRecord {
    flag: u8,
    /// Payload offset.
    offset: usize,
    len: usize,
}

impl RawRecord {
    // Takes a reference so it can be passed to `Iterator::filter` directly.
    #[allow(clippy::trivially_copy_pass_by_ref)]
    const fn is_active(&self) -> bool {
        self.flag != FLAG_DELETED
    }
}

/// Header walk over `[0, cursor)`, live and deleted records alike.
#[derive(Debug, Clone)]
struct RawRecords<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RawRecords<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }
}

impl Iterator for RawRecords<'_> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + RECORD_HEADER_SIZE > self.bytes.len() {
            return None;
        }
        let flag = self.bytes[self.pos];
        let len = usize::from(read_len(self.bytes, self.pos));
        let offset = self.pos + RECORD_HEADER_SIZE;
        debug_assert!(offset + len <= self.bytes.len(), "record overruns cursor");
        self.pos = offset + len;
        Some(RawRecord { flag, offset, len })
    }
}

/// Read the length field of the record whose header starts at `record`.
fn read_len(bytes: &[u8], record: usize) -> u16 {
    u16::from_le_bytes([bytes[record + 1], bytes[record + 2]])
}

/// Errors that can occur when using the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// Payload does not fit the 2-byte length header.
    RecordTooLarge { len: usize },
    /// Handle was issued against an earlier buffer.
    StaleHandle {
        handle_generation: Generation,
        current_generation: Generation,
    },
    /// Handle points outside the written region.
    OutOfBounds { offset: usize, len: usize },
    /// The record header disagrees with the handle length.
    HeaderMismatch {
        offset: usize,
        expected: usize,
        found: usize,
    },
    /// Record has been deleted.
    Inactive { offset: usize },
    /// Payload is not valid UTF-8.
    NotUtf8 { offset: usize },
}

impl std::fmt::Display for ArenaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecordTooLarge { len } => {
                write!(f, "record of {len} bytes exceeds maximum of {MAX_RECORD_LEN}")
            }
            Self::StaleHandle {
                handle_generation,
                current_generation,
            } => write!(
                f,
                "stale handle from generation {handle_generation} (current {current_generation})"
            ),
            Self::OutOfBounds { offset, len } => {
                write!(f, "handle {offset}+{len} is outside the arena")
            }
            Self::HeaderMismatch {
                offset,
                expected,
                found,
            } => write!(
                f,
                "record header at {offset} has length {found}, handle says {expected}"
            ),
            Self::Inactive { offset } => write!(f, "record at {offset} has been deleted"),
            Self::NotUtf8 { offset } => write!(f, "record at {offset} is not valid UTF-8"),
        }
    }
}

impl std::error::Error for ArenaError {}

/// Errors raised while rewriting handles after a relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationError {
    /// A held handle has no live record in the relocation map.
    DanglingHandle { handle: Handle },
}

impl std::fmt::Display for RelocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingHandle { handle } => {
                write!(f, "handle {handle} has no live record to relocate to")
            }
        }
    }
}

impl std::error::Error for RelocationError {}
