// Life of a pair insert:
// 1. Look up each name in its kind's hash index
// 2. Append missing names to the arena
//     - If the arena grows, every held handle is relocated
//     - If the index fills up, it resizes and rehashes
// 3. Add the composite key to both join trees
//
// Life of a range query:
// 1. Find the record's handle through its hash index
// 2. Search the join tree between the record's lower and upper bound keys
// 3. Resolve each partner handle to text

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod kernel;
#[cfg(test)]
mod simulation;
pub mod storage;

pub use config::{ConfigError, KernelConfig};
pub use kernel::{
    DumpedPair, IndexDump, Insertion, JoinTree, Kernel, KernelError, PairInsertion, PairRemoval,
    RecordKind, RecordRemoval, TreeDump,
};
