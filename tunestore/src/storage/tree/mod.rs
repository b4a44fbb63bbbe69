//! In-memory 2-3 tree used for the ordered join indexes.
//!
//! # Structure
//!
//! Every node holds one or two entries; internal nodes have one child more
//! than entries, and all leaves sit at the same depth. Insertion splits
//! overfull nodes upward. Removal repairs empty nodes bottom-up with one
//! of three [`Rebalance`] operations, collapsing the root when it empties.
//!
//! # Usage
//!
//! ```
//! use tunestore::storage::tree::{NaturalOrder, TwoThreeTree};
//!
//! let mut tree = TwoThreeTree::new();
//! for (key, value) in [(3, "c"), (1, "a"), (2, "b")] {
//!     tree.insert(key, value, &NaturalOrder);
//! }
//!
//! assert_eq!(tree.range_search(&1, &2, &NaturalOrder), vec![&"a", &"b"]);
//! assert_eq!(tree.remove(&1, &NaturalOrder), Some("a"));
//! ```

mod node;
#[allow(clippy::module_inception)]
mod tree;

pub use node::{KeyOrder, MAX_ENTRIES, NaturalOrder, Rebalance};
pub use tree::{Iter, TreeViolation, TwoThreeTree};
