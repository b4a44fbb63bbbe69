//! Handles: location descriptors for records stored in the arena.
//!
//! A handle names the payload of one record by byte offset and length,
//! tagged with the arena generation it was issued against. It owns no
//! memory and holds no reference into the arena buffer; content is always
//! resolved through [`Arena::get`](crate::storage::Arena::get), which
//! rejects handles from an older generation.

use std::cmp::Ordering;
use std::fmt;

/// Size of a record header: one flag byte plus a little-endian `u16` length.
pub const RECORD_HEADER_SIZE: usize = 3;

/// Identifier of one arena buffer instance.
///
/// Bumped every time the arena relocates its records into a fresh buffer.
pub type Generation = u64;

/// A reference to one record payload in the arena.
///
/// # Invariants
///
/// - `offset >= RECORD_HEADER_SIZE`; the three bytes before `offset` are
///   the header of this record
/// - `offset + len` never exceeds the arena's write cursor for the
///   generation the handle was issued against
///
/// Equality and ordering use position only (`offset`, then `len`). The
/// generation is carried for validation, not identity.
#[derive(Debug, Clone, Copy)]
pub struct Handle {
    generation: Generation,
    offset: usize,
    len: u16,
}

impl Handle {
    /// Create a handle. Only the arena and relocation maps mint handles.
    #[must_use]
    pub(crate) const fn new(generation: Generation, offset: usize, len: u16) -> Self {
        Self {
            generation,
            offset,
            len,
        }
    }

    /// Generation of the arena buffer this handle points into.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Byte offset of the payload (past the record header).
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Byte offset of the record header.
    #[must_use]
    pub const fn record_offset(&self) -> usize {
        self.offset - RECORD_HEADER_SIZE
    }

    /// Payload length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the payload is empty. Empty records are legal.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last payload byte.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.len as usize
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.len == other.len
    }
}

impl Eq for Handle {}

impl PartialOrd for Handle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Handle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset
            .cmp(&other.offset)
            .then_with(|| self.len.cmp(&other.len))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}@g{}", self.offset, self.len, self.generation)
    }
}
