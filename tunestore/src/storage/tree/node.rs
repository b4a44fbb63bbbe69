//! 2-3 tree nodes and the local operations on them.
//!
//! A node holds one or two ordered entries. A leaf has no children; an
//! internal node has exactly one more child than it has entries. Nodes
//! briefly leave that shape while an operation is in flight: an insert
//! can leave three entries (resolved by [`Node::split`]) and a removal can
//! leave zero (resolved by the parent through [`Node::rebalance`]).

use std::cmp::Ordering;

/// Maximum entries in a settled node.
pub const MAX_ENTRIES: usize = 2;

/// Comparator for tree keys.
///
/// Keys may need outside context to compare (join keys resolve their
/// handles through the arena), so the tree takes the ordering as a
/// parameter instead of requiring `K: Ord`.
pub trait KeyOrder<K> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Ordering by `K`'s own `Ord` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<K: Ord> KeyOrder<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Repair chosen for a child left with no entries after a removal.
///
/// Selected by [`Node::plan`] from the fullness of the empty child's
/// adjacent siblings and the parent's own entry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebalance {
    /// An adjacent sibling holds two entries: rotate one through the parent.
    BorrowFromSibling { sibling: usize },
    /// Siblings hold one entry and the parent holds two: merge the child, the
    /// separating parent entry, and the sibling. The parent keeps one entry.
    MergeWithSibling { sibling: usize },
    /// Siblings hold one entry and so does the parent: merge as above, which
    /// leaves the parent empty and pushes the repair one level up.
    MergeIntoParent { sibling: usize },
}

/// A 2-3 tree node.
#[derive(Debug)]
pub struct Node<K, V> {
    pub(super) entries: Vec<(K, V)>,
    pub(super) children: Vec<Box<Self>>,
}

/// Result of splitting an overfull node: the middle entry moves up and
/// `right` becomes its right-hand neighbour.
#[derive(Debug)]
pub struct Split<K, V> {
    pub(super) entry: (K, V),
    pub(super) right: Box<Node<K, V>>,
}

impl<K, V> Node<K, V> {
    /// A leaf holding one entry.
    pub(super) fn leaf(key: K, value: V) -> Self {
        Self {
            entries: vec![(key, value)],
            children: Vec::new(),
        }
    }

    /// A root created by a split of the old root.
    pub(super) fn from_split(left: Box<Self>, split: Split<K, V>) -> Self {
        Self {
            entries: vec![split.entry],
            children: vec![left, split.right],
        }
    }

    /// Whether this node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// The node's entries in order.
    #[must_use]
    pub fn entries(&self) -> &[(K, V)] {
        &self.entries
    }

    /// The node's children in order.
    pub(super) fn children(&self) -> &[Box<Self>] {
        &self.children
    }

    /// Index of the first entry whose key is `>= key`, which is also the
    /// child to descend into.
    pub(super) fn slot_for<O: KeyOrder<K>>(&self, key: &K, order: &O) -> usize {
        self.entries
            .iter()
            .take_while(|(existing, _)| order.compare(key, existing) == Ordering::Greater)
            .count()
    }

    /// Insert below this node. Returns a split if this node overflowed.
    pub(super) fn insert<O: KeyOrder<K>>(&mut self, key: K, value: V, order: &O) -> Option<Split<K, V>> {
        let slot = self.slot_for(&key, order);
        if self.is_leaf() {
            self.entries.insert(slot, (key, value));
        } else {
            let split = self.children[slot].insert(key, value, order)?;
            self.entries.insert(slot, split.entry);
            self.children.insert(slot + 1, split.right);
        }

        (self.entries.len() > MAX_ENTRIES).then(|| self.split())
    }

    /// Divide a three-entry node into two one-entry nodes around the middle.
    fn split(&mut self) -> Split<K, V> {
        debug_assert_eq!(self.entries.len(), MAX_ENTRIES + 1);
        let right_entries = self.entries.split_off(2);
        let right_children = if self.is_leaf() {
            Vec::new()
        } else {
            self.children.split_off(2)
        };
        let entry = self.entries.remove(1);

        Split {
            entry,
            right: Box::new(Self {
                entries: right_entries,
                children: right_children,
            }),
        }
    }

    /// Find the value stored under `key`.
    pub(super) fn search<O: KeyOrder<K>>(&self, key: &K, order: &O) -> Option<&V> {
        let mut node = self;
        loop {
            let slot = node.slot_for(key, order);
            if let Some((existing, value)) = node.entries.get(slot) {
                if order.compare(key, existing) == Ordering::Equal {
                    return Some(value);
                }
            }
            if node.is_leaf() {
                return None;
            }
            node = &node.children[slot];
        }
    }

    /// Remove one entry with `key` from this subtree.
    ///
    /// An entry in an internal node is replaced by the minimum of its right
    /// subtree. May leave this node with no entries; the caller repairs that.
    pub(super) fn remove<O: KeyOrder<K>>(&mut self, key: &K, order: &O) -> Option<V> {
        let slot = self.slot_for(key, order);
        let here = self
            .entries
            .get(slot)
            .is_some_and(|(existing, _)| order.compare(key, existing) == Ordering::Equal);

        match (here, self.is_leaf()) {
            (true, true) => Some(self.entries.remove(slot).1),
            (true, false) => {
                let successor = self.children[slot + 1].remove_min();
                let (_, value) = std::mem::replace(&mut self.entries[slot], successor);
                self.repair(slot + 1);
                Some(value)
            }
            (false, true) => None,
            (false, false) => {
                let value = self.children[slot].remove(key, order)?;
                self.repair(slot);
                Some(value)
            }
        }
    }

    /// Remove and return the smallest entry of this subtree.
    fn remove_min(&mut self) -> (K, V) {
        if self.is_leaf() {
            return self.entries.remove(0);
        }
        let min = self.children[0].remove_min();
        self.repair(0);
        min
    }

    /// Rebalance `child` if a removal left it empty.
    fn repair(&mut self, child: usize) {
        if self.children[child].entries.is_empty() {
            self.rebalance(self.plan(child), child);
        }
    }

    /// Choose the repair for an empty `child`.
    ///
    /// Left sibling is preferred for both borrowing and merging.
    pub(super) fn plan(&self, child: usize) -> Rebalance {
        let left = child.checked_sub(1);
        let right = Some(child + 1).filter(|&s| s < self.children.len());
        let full = |s: &usize| self.children[*s].entries.len() == MAX_ENTRIES;

        match (left.filter(full), right.filter(full), left.or(right)) {
            (Some(sibling), _, _) | (None, Some(sibling), _) => {
                Rebalance::BorrowFromSibling { sibling }
            }
            (None, None, Some(sibling)) if self.entries.len() == MAX_ENTRIES => {
                Rebalance::MergeWithSibling { sibling }
            }
            (None, None, Some(sibling)) => Rebalance::MergeIntoParent { sibling },
            (None, None, None) => unreachable!("internal node with a single child"),
        }
    }

    /// Apply a repair to the empty `child`.
    pub(super) fn rebalance(&mut self, plan: Rebalance, child: usize) {
        match plan {
            Rebalance::BorrowFromSibling { sibling } if sibling < child => self.rotate_right(sibling),
            Rebalance::BorrowFromSibling { sibling } => self.rotate_left(sibling),
            Rebalance::MergeWithSibling { sibling } | Rebalance::MergeIntoParent { sibling } => {
                self.merge(sibling.min(child));
            }
        }
    }

    /// Move the separator at `sibling` down into the child on its right,
    /// and the left sibling's last entry up into its place.
    fn rotate_right(&mut self, sibling: usize) {
        let (left, right) = self.children.split_at_mut(sibling + 1);
        let donor = &mut left[sibling];
        let child = &mut right[0];

        if let Some(up) = donor.entries.pop() {
            let down = std::mem::replace(&mut self.entries[sibling], up);
            child.entries.insert(0, down);
        }
        if let Some(grandchild) = donor.children.pop() {
            child.children.insert(0, grandchild);
        }
    }

    /// Move the separator left of `sibling` down into the child on its
    /// left, and the right sibling's first entry up into its place.
    fn rotate_left(&mut self, sibling: usize) {
        let (left, right) = self.children.split_at_mut(sibling);
        let child = &mut left[sibling - 1];
        let donor = &mut right[0];

        let up = donor.entries.remove(0);
        let down = std::mem::replace(&mut self.entries[sibling - 1], up);
        child.entries.push(down);
        if !donor.is_leaf() {
            child.children.push(donor.children.remove(0));
        }
    }

    /// Fold child `left + 1` and the separator at `left` into child `left`.
    fn merge(&mut self, left: usize) {
        let right = self.children.remove(left + 1);
        let separator = self.entries.remove(left);
        let target = &mut self.children[left];
        target.entries.push(separator);
        target.entries.extend(right.entries);
        target.children.extend(right.children);
    }

    /// Mutable visit of every entry in this subtree, in order.
    pub(super) fn try_for_each_mut<E>(
        &mut self,
        f: &mut impl FnMut(&mut K, &mut V) -> Result<(), E>,
    ) -> Result<(), E> {
        for index in 0..self.entries.len() {
            if let Some(child) = self.children.get_mut(index) {
                child.try_for_each_mut(f)?;
            }
            let (key, value) = &mut self.entries[index];
            f(key, value)?;
        }
        if let Some(last) = self.children.get_mut(self.entries.len()) {
            last.try_for_each_mut(f)?;
        }
        Ok(())
    }

    /// Collect values with `low <= key <= high`, pruning subtrees outside
    /// the range.
    pub(super) fn collect_range<'a, O: KeyOrder<K>>(
        &'a self,
        low: &K,
        high: &K,
        order: &O,
        out: &mut Vec<&'a V>,
    ) {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if order.compare(low, key) != Ordering::Greater {
                if let Some(child) = self.children.get(index) {
                    child.collect_range(low, high, order, out);
                }
            }
            if order.compare(key, high) == Ordering::Greater {
                return;
            }
            if order.compare(key, low) != Ordering::Less {
                out.push(value);
            }
        }
        if let Some(last) = self.children.get(self.entries.len()) {
            last.collect_range(low, high, order, out);
        }
    }
}
