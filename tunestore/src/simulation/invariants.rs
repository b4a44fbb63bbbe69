//! Invariant checking for deterministic simulation testing.
//!
//! [`OperationHistory`] replays every operation against a plain model of the
//! relationships and predicts each outcome. [`InvariantChecker`] compares the
//! kernel's answers with those predictions and verifies the kernel's internal
//! structures after each operation.

// Simulation code legitimately needs cloning for test data
#![allow(clippy::disallowed_methods)]

use std::collections::BTreeSet;

use super::operation_gen::Operation;
use crate::kernel::{Kernel, RecordKind};
use crate::storage::{Handle, JoinKey};

/// What one operation did, as observed or predicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    PairInserted {
        artist_created: bool,
        song_created: bool,
        pair_created: bool,
    },
    RecordInserted {
        created: bool,
    },
    /// Records deleted because their last relationship went away.
    PairDeleted {
        deleted: Vec<(RecordKind, String)>,
    },
    RecordRemoved {
        partners: Vec<String>,
        deleted: Vec<String>,
    },
    RecordDeleted,
    RecordInUse {
        references: usize,
    },
    Listed(Option<Vec<String>>),
    /// Name or relationship not present.
    Missing,
    /// The kernel returned an error.
    Failed(String),
}

/// Tracks the history of operations and the state they should produce.
#[derive(Debug, Default)]
pub struct OperationHistory {
    operations: Vec<Operation>,
    artists: BTreeSet<String>,
    songs: BTreeSet<String>,
    /// `(artist, song)` relationships.
    pairs: BTreeSet<(String, String)>,
}

impl OperationHistory {
    /// Create a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an operation to the model and return the outcome the kernel
    /// should report for it.
    pub fn record(&mut self, operation: Operation) -> Outcome {
        let expected = match &operation {
            Operation::InsertPair { artist, song } => {
                let artist_created = self.artists.insert(artist.clone());
                let song_created = self.songs.insert(song.clone());
                let pair_created = self.pairs.insert((artist.clone(), song.clone()));
                Outcome::PairInserted {
                    artist_created,
                    song_created,
                    pair_created,
                }
            }
            Operation::InsertRecord { kind, name } => Outcome::RecordInserted {
                created: self.records_mut(*kind).insert(name.clone()),
            },
            Operation::DeletePair { artist, song } => {
                if self.pairs.remove(&(artist.clone(), song.clone())) {
                    let mut deleted = Vec::new();
                    for (kind, name) in [(RecordKind::Artist, artist), (RecordKind::Song, song)] {
                        if self.partners(kind, name).is_empty() {
                            self.records_mut(kind).remove(name);
                            deleted.push((kind, name.clone()));
                        }
                    }
                    Outcome::PairDeleted { deleted }
                } else {
                    Outcome::Missing
                }
            }
            Operation::RemoveRecord { kind, name } => self.remove_record(*kind, name),
            Operation::DeleteRecord { kind, name } => {
                if !self.records(*kind).contains(name) {
                    Outcome::Missing
                } else {
                    let references = self.partners(*kind, name).len();
                    if references > 0 {
                        Outcome::RecordInUse { references }
                    } else {
                        self.records_mut(*kind).remove(name);
                        Outcome::RecordDeleted
                    }
                }
            }
            Operation::List { kind, name } => Outcome::Listed(
                self.records(*kind)
                    .contains(name)
                    .then(|| self.partners(*kind, name)),
            ),
        };

        self.operations.push(operation);
        expected
    }

    fn remove_record(&mut self, kind: RecordKind, name: &str) -> Outcome {
        if !self.records(kind).contains(name) {
            return Outcome::Missing;
        }

        let partners = self.partners(kind, name);
        self.pairs.retain(|(artist, song)| match kind {
            RecordKind::Artist => artist != name,
            RecordKind::Song => song != name,
        });

        let mut deleted = Vec::new();
        for partner in &partners {
            if self.partners(kind.other(), partner).is_empty() {
                self.records_mut(kind.other()).remove(partner);
                deleted.push(partner.clone());
            }
        }
        self.records_mut(kind).remove(name);

        Outcome::RecordRemoved { partners, deleted }
    }

    /// Names related to `name`, ascending.
    #[must_use]
    pub fn partners(&self, kind: RecordKind, name: &str) -> Vec<String> {
        let mut partners: Vec<String> = self
            .pairs
            .iter()
            .filter_map(|(artist, song)| match kind {
                RecordKind::Artist if artist == name => Some(song.clone()),
                RecordKind::Song if song == name => Some(artist.clone()),
                _ => None,
            })
            .collect();
        partners.sort();
        partners
    }

    /// Expected live names of one kind.
    #[must_use]
    pub const fn records(&self, kind: RecordKind) -> &BTreeSet<String> {
        match kind {
            RecordKind::Artist => &self.artists,
            RecordKind::Song => &self.songs,
        }
    }

    fn records_mut(&mut self, kind: RecordKind) -> &mut BTreeSet<String> {
        match kind {
            RecordKind::Artist => &mut self.artists,
            RecordKind::Song => &mut self.songs,
        }
    }

    /// Expected relationships.
    #[must_use]
    pub const fn pairs(&self) -> &BTreeSet<(String, String)> {
        &self.pairs
    }

    /// Get the number of operations.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if history is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            total_operations: self.operations.len(),
            expected_artists: self.artists.len(),
            expected_songs: self.songs.len(),
            expected_pairs: self.pairs.len(),
        }
    }
}

/// Statistics about the operation history.
#[derive(Debug, Clone)]
pub struct HistoryStats {
    /// Total number of operations.
    pub total_operations: usize,
    pub expected_artists: usize,
    pub expected_songs: usize,
    pub expected_pairs: usize,
}

/// An invariant violation detected during simulation.
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    /// Description of the violation.
    pub description: String,
    /// Operation index where it was detected.
    pub operation_index: usize,
    /// Additional context.
    pub context: String,
}

/// Checker for kernel invariants.
pub struct InvariantChecker {
    /// Detected violations.
    violations: Vec<InvariantViolation>,
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantChecker {
    /// Create a new invariant checker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    /// Get all violations.
    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    /// Check if any violations were detected.
    #[must_use]
    pub const fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Clear all recorded violations.
    pub fn clear(&mut self) {
        self.violations.clear();
    }

    /// Add a violation.
    pub fn add_violation(&mut self, violation: InvariantViolation) {
        self.violations.push(violation);
    }

    fn violation(&mut self, description: &str, operation_index: usize, context: String) {
        self.violations.push(InvariantViolation {
            description: description.to_string(),
            operation_index,
            context,
        });
    }

    /// Check that the kernel answered an operation the way the model did.
    pub fn check_outcome(
        &mut self,
        operation: &Operation,
        expected: &Outcome,
        actual: &Outcome,
        operation_index: usize,
    ) {
        if expected != actual {
            self.violation(
                "Outcome differs from model",
                operation_index,
                format!("{operation:?}: expected {expected:?}, got {actual:?}"),
            );
        }
    }

    /// Run every structural check against the kernel.
    pub fn check_kernel(&mut self, kernel: &Kernel, history: &OperationHistory, operation_index: usize) {
        self.check_trees(kernel, operation_index);
        self.check_indexes(kernel, history, operation_index);
        self.check_relationships(kernel, history, operation_index);
        self.check_arena(kernel, operation_index);
    }

    /// Both join trees are ordered and balanced, every key resolves to
    /// registered records, and each key is mirrored in the other tree.
    pub fn check_trees(&mut self, kernel: &Kernel, operation_index: usize) {
        let order = kernel.order();

        for kind in [RecordKind::Artist, RecordKind::Song] {
            let tree = kernel.tree(kind);
            if let Err(violation) = tree.check_invariants(&order) {
                self.violation(
                    "Join tree structure broken",
                    operation_index,
                    format!("{kind} tree: {violation}"),
                );
            }

            for (key, partner) in tree.iter() {
                if key.secondary_handle() != Some(*partner) {
                    self.violation(
                        "Join key does not match its value",
                        operation_index,
                        format!("{kind} tree: key {key:?}, value {partner}"),
                    );
                }
                if !registered(kernel, kind, key.primary) || !registered(kernel, kind.other(), *partner) {
                    self.violation(
                        "Join key refers to an unregistered record",
                        operation_index,
                        format!("{kind} tree: {} -> {partner}", key.primary),
                    );
                }
                let mirror = JoinKey::new(*partner, key.primary);
                if !kernel.tree(kind.other()).contains(&mirror, &order) {
                    self.violation(
                        "Join key is not mirrored",
                        operation_index,
                        format!("{kind} tree: {} -> {partner}", key.primary),
                    );
                }
            }
        }
    }

    /// Every index entry resolves to a live record whose content finds that
    /// same entry, and the live names match the model.
    pub fn check_indexes(&mut self, kernel: &Kernel, history: &OperationHistory, operation_index: usize) {
        for kind in [RecordKind::Artist, RecordKind::Song] {
            let mut names = BTreeSet::new();
            for (slot, handle) in kernel.index(kind).iter() {
                match kernel.text(handle) {
                    Ok(name) => {
                        if kernel.find_record(kind, name) != Some(handle) {
                            self.violation(
                                "Index entry not found by its own content",
                                operation_index,
                                format!("{kind} slot {slot}: '{name}' at {handle}"),
                            );
                        }
                        names.insert(name.to_owned());
                    }
                    Err(e) => self.violation(
                        "Index entry does not resolve",
                        operation_index,
                        format!("{kind} slot {slot}: {handle}: {e}"),
                    ),
                }
            }

            if &names != history.records(kind) {
                self.violation(
                    "Indexed names differ from model",
                    operation_index,
                    format!(
                        "{kind}: expected {:?}, found {:?}",
                        history.records(kind),
                        names
                    ),
                );
            }
        }
    }

    /// Range queries from both sides report exactly the model's
    /// relationships, in content order.
    pub fn check_relationships(
        &mut self,
        kernel: &Kernel,
        history: &OperationHistory,
        operation_index: usize,
    ) {
        for kind in [RecordKind::Artist, RecordKind::Song] {
            if kernel.tree(kind).len() != history.pairs().len() {
                self.violation(
                    "Join tree size differs from model",
                    operation_index,
                    format!(
                        "{kind} tree holds {}, expected {}",
                        kernel.tree(kind).len(),
                        history.pairs().len()
                    ),
                );
            }

            for name in history.records(kind) {
                let expected = history.partners(kind, name);
                match kernel.list(kind, name) {
                    Ok(Some(found)) if found == expected => {}
                    other => self.violation(
                        "Range query differs from model",
                        operation_index,
                        format!("{kind} '{name}': expected {expected:?}, got {other:?}"),
                    ),
                }
            }
        }
    }

    /// Every live arena record belongs to exactly one index entry.
    pub fn check_arena(&mut self, kernel: &Kernel, operation_index: usize) {
        let live = kernel.arena().records().count();
        let indexed = kernel.record_count(RecordKind::Artist) + kernel.record_count(RecordKind::Song);
        if live != indexed {
            self.violation(
                "Arena holds records no index refers to",
                operation_index,
                format!("{live} live records, {indexed} indexed"),
            );
        }
    }
}

fn registered(kernel: &Kernel, kind: RecordKind, handle: Handle) -> bool {
    kernel
        .text(handle)
        .is_ok_and(|name| kernel.find_record(kind, name) == Some(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::new_test_kernel;

    fn pair(artist: &str, song: &str) -> Operation {
        Operation::InsertPair {
            artist: artist.to_string(),
            song: song.to_string(),
        }
    }

    #[test]
    fn test_history_predicts_pair_insert() {
        let mut history = OperationHistory::new();

        assert_eq!(
            history.record(pair("Pearl Jam", "Breath")),
            Outcome::PairInserted {
                artist_created: true,
                song_created: true,
                pair_created: true,
            }
        );
        assert_eq!(
            history.record(pair("Pearl Jam", "Breath")),
            Outcome::PairInserted {
                artist_created: false,
                song_created: false,
                pair_created: false,
            }
        );
        assert_eq!(history.len(), 2);
        assert_eq!(history.stats().expected_pairs, 1);
    }

    #[test]
    fn test_history_predicts_cascade() {
        let mut history = OperationHistory::new();
        history.record(pair("Breaking Benjamin", "Breath"));
        history.record(pair("Breaking Benjamin", "The Diary of Jane"));
        history.record(pair("Pearl Jam", "Breath"));

        let outcome = history.record(Operation::RemoveRecord {
            kind: RecordKind::Song,
            name: "Breath".to_string(),
        });

        assert_eq!(
            outcome,
            Outcome::RecordRemoved {
                partners: vec!["Breaking Benjamin".to_string(), "Pearl Jam".to_string()],
                deleted: vec!["Pearl Jam".to_string()],
            }
        );
        assert!(history.records(RecordKind::Artist).contains("Breaking Benjamin"));
        assert!(!history.records(RecordKind::Artist).contains("Pearl Jam"));
        assert!(!history.records(RecordKind::Song).contains("Breath"));
    }

    #[test]
    fn test_history_predicts_record_in_use() {
        let mut history = OperationHistory::new();
        history.record(pair("Linkin Park", "Numb"));

        assert_eq!(
            history.record(Operation::DeleteRecord {
                kind: RecordKind::Artist,
                name: "Linkin Park".to_string(),
            }),
            Outcome::RecordInUse { references: 1 }
        );
        assert_eq!(
            history.record(Operation::DeletePair {
                artist: "Linkin Park".to_string(),
                song: "Numb".to_string(),
            }),
            Outcome::PairDeleted {
                deleted: vec![
                    (RecordKind::Artist, "Linkin Park".to_string()),
                    (RecordKind::Song, "Numb".to_string()),
                ],
            }
        );
        assert!(history.pairs().is_empty());
    }

    #[test]
    fn test_checker_accepts_matching_kernel() {
        let mut kernel = new_test_kernel();
        let mut history = OperationHistory::new();
        for (artist, song) in [("A", "1"), ("B", "2"), ("A", "3")] {
            history.record(pair(artist, song));
            kernel.insert_pair(artist, song).expect("insert pair");
        }

        let mut checker = InvariantChecker::new();
        checker.check_kernel(&kernel, &history, 0);

        assert!(!checker.has_violations(), "{:?}", checker.violations());
    }

    #[test]
    fn test_checker_detects_divergence() {
        let mut kernel = new_test_kernel();
        let mut history = OperationHistory::new();
        history.record(pair("A", "1"));
        kernel.insert_pair("A", "1").expect("insert pair");
        kernel.insert_pair("A", "2").expect("insert pair");

        let mut checker = InvariantChecker::new();
        checker.check_kernel(&kernel, &history, 3);

        assert!(checker.has_violations());
        assert!(checker.violations().iter().all(|v| v.operation_index == 3));
        checker.clear();
        assert!(!checker.has_violations());
    }

    #[test]
    fn test_check_outcome() {
        let mut checker = InvariantChecker::new();
        let operation = Operation::List {
            kind: RecordKind::Artist,
            name: "A".to_string(),
        };

        checker.check_outcome(&operation, &Outcome::Missing, &Outcome::Listed(None), 0);
        assert!(checker.has_violations());

        checker.clear();
        checker.check_outcome(&operation, &Outcome::Listed(None), &Outcome::Listed(None), 1);
        assert!(!checker.has_violations());
    }
}
