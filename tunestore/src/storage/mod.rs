//! Storage engine for the tunestore kernel.
//!
//! Every string record lives in one growable byte [`Arena`]. Everything
//! else refers to records through [`Handle`]s:
//!
//! - [`HashIndex`]: content to handle, one per record kind
//! - [`TwoThreeTree`]: ordered [`JoinKey`]s for relationship range queries
//!
//! # Record Format
//!
//! Each record is `[flag:1][len:2 LE][payload:len]`, appended at the arena's
//! write cursor. A handle names the payload and the arena generation it was
//! issued against.
//!
//! # Relocation
//!
//! When the arena grows it compacts live records into a fresh buffer and
//! returns a [`Relocation`] map. Whoever holds handles rewrites them from
//! that map by position; content is never searched to find a handle.
//!
//! # Usage
//!
//! ```
//! use tunestore::storage::{Arena, HashIndex};
//!
//! let mut arena = Arena::new(64);
//! let mut index = HashIndex::new(8);
//!
//! let stored = arena.insert(b"Numb")?;
//! index.insert(stored.handle, &arena)?;
//!
//! assert_eq!(index.search(b"Numb", &arena), Some(stored.handle));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod arena;
mod handle;
mod hash_index;
mod join;
pub mod tree;

pub use arena::{Arena, ArenaError, MAX_RECORD_LEN, Records, Relocation, RelocationError, Stored};
pub use handle::{Generation, Handle, RECORD_HEADER_SIZE};
pub use hash_index::{HashIndex, IndexError, fold_hash};
pub use join::{ContentOrder, Endpoint, JoinKey, JoinPair};
pub use tree::{KeyOrder, NaturalOrder, TwoThreeTree};
