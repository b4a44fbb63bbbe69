//! Composite keys for the join trees.
//!
//! A join key pairs the handle of one record with an endpoint on the other
//! side of the relationship. Endpoints include `Min` and `Max` sentinels so
//! that "every pair whose primary is H" is the inclusive range
//! `[(H, Min), (H, Max)]`.
//!
//! Keys order by resolved record content, which needs the arena. The tree
//! never holds the arena; the caller passes a [`ContentOrder`] borrowing it.

use std::cmp::Ordering;

use crate::storage::arena::{Arena, Relocation, RelocationError};
use crate::storage::handle::Handle;
use crate::storage::tree::KeyOrder;

/// Secondary component of a join key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Sorts before every record.
    Min,
    /// A real record.
    At(Handle),
    /// Sorts after every record.
    Max,
}

/// Tree key for one side of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinKey {
    pub primary: Handle,
    pub secondary: Endpoint,
}

impl JoinKey {
    /// Key for the pair `(primary, secondary)`.
    #[must_use]
    pub const fn new(primary: Handle, secondary: Handle) -> Self {
        Self {
            primary,
            secondary: Endpoint::At(secondary),
        }
    }

    /// Smallest key with this primary.
    #[must_use]
    pub const fn lower_bound(primary: Handle) -> Self {
        Self {
            primary,
            secondary: Endpoint::Min,
        }
    }

    /// Largest key with this primary.
    #[must_use]
    pub const fn upper_bound(primary: Handle) -> Self {
        Self {
            primary,
            secondary: Endpoint::Max,
        }
    }

    /// The secondary handle, if this is not a bound.
    #[must_use]
    pub const fn secondary_handle(&self) -> Option<Handle> {
        match self.secondary {
            Endpoint::At(handle) => Some(handle),
            Endpoint::Min | Endpoint::Max => None,
        }
    }

    /// Rewrite both handles after an arena relocation.
    pub fn relocate(&mut self, relocation: &Relocation) -> Result<(), RelocationError> {
        self.primary = relocation.translate(self.primary)?;
        if let Endpoint::At(handle) = &mut self.secondary {
            *handle = relocation.translate(*handle)?;
        }
        Ok(())
    }
}

/// Orders join keys by record content, then by arena position.
///
/// Position breaks ties between distinct records with equal bytes.
/// Arena growth keeps live records in their relative order, so relocating
/// keys in place never reorders a tree.
#[derive(Debug, Clone, Copy)]
pub struct ContentOrder<'a> {
    arena: &'a Arena,
}

impl<'a> ContentOrder<'a> {
    #[must_use]
    pub const fn new(arena: &'a Arena) -> Self {
        Self { arena }
    }

    /// Compare two records. A handle that no longer resolves sorts first.
    fn handles(&self, a: &Handle, b: &Handle) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        self.arena
            .get(a)
            .ok()
            .cmp(&self.arena.get(b).ok())
            .then_with(|| a.cmp(b))
    }
}

impl KeyOrder<JoinKey> for ContentOrder<'_> {
    fn compare(&self, a: &JoinKey, b: &JoinKey) -> Ordering {
        self.handles(&a.primary, &b.primary)
            .then_with(|| match (&a.secondary, &b.secondary) {
                (Endpoint::Min, Endpoint::Min) | (Endpoint::Max, Endpoint::Max) => Ordering::Equal,
                (Endpoint::Min, _) | (_, Endpoint::Max) => Ordering::Less,
                (_, Endpoint::Min) | (Endpoint::Max, _) => Ordering::Greater,
                (Endpoint::At(x), Endpoint::At(y)) => self.handles(x, y),
            })
    }
}

/// One relationship as reported by a range query, oriented by the query:
/// `primary` is the record that was queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPair {
    pub primary: Handle,
    pub secondary: Handle,
}
