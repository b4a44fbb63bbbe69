//! The 2-3 tree: root management, queries, and invariant checking.

use std::cmp::Ordering;

use super::node::{KeyOrder, MAX_ENTRIES, Node};

/// An in-memory 2-3 tree.
///
/// Keys are compared through a [`KeyOrder`] passed to every operation that
/// needs ordering. All operations on one tree must use orderings that agree.
/// Equal keys may coexist; each insert adds an entry.
#[derive(Debug)]
pub struct TwoThreeTree<K, V> {
    root: Option<Box<Node<K, V>>>,
    len: usize,
}

impl<K, V> Default for TwoThreeTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TwoThreeTree<K, V> {
    /// Create an empty tree.
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None, len: 0 }
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels; 0 for an empty tree, 1 for a single leaf.
    #[must_use]
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut node = self.root.as_deref();
        while let Some(current) = node {
            height += 1;
            node = current.children().first().map(AsRef::as_ref);
        }
        height
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    /// Insert an entry. A root split grows the tree by one level.
    pub fn insert<O: KeyOrder<K>>(&mut self, key: K, value: V, order: &O) {
        self.root = Some(match self.root.take() {
            None => Box::new(Node::leaf(key, value)),
            Some(mut root) => match root.insert(key, value, order) {
                Some(split) => Box::new(Node::from_split(root, split)),
                None => root,
            },
        });
        self.len += 1;
    }

    /// Find the value of an entry with `key`.
    pub fn search<O: KeyOrder<K>>(&self, key: &K, order: &O) -> Option<&V> {
        self.root.as_ref()?.search(key, order)
    }

    /// Whether an entry with `key` exists.
    pub fn contains<O: KeyOrder<K>>(&self, key: &K, order: &O) -> bool {
        self.search(key, order).is_some()
    }

    /// Remove one entry with `key` and return its value.
    ///
    /// An emptied root collapses to its only child.
    pub fn remove<O: KeyOrder<K>>(&mut self, key: &K, order: &O) -> Option<V> {
        let root = self.root.as_mut()?;
        let value = root.remove(key, order)?;
        self.len -= 1;

        if root.entries.is_empty() {
            let child = root.children.pop();
            self.root = child;
        }
        Some(value)
    }

    /// Values of all entries with `low <= key <= high`, in key order.
    pub fn range_search<O: KeyOrder<K>>(&self, low: &K, high: &K, order: &O) -> Vec<&V> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            if order.compare(low, high) != Ordering::Greater {
                root.collect_range(low, high, order, &mut out);
            }
        }
        out
    }

    /// In-order iterator over entries.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter { stack: Vec::new() };
        if let Some(root) = &self.root {
            iter.descend(root);
        }
        iter
    }

    /// Nodes level by level from the root, each as its entry slice.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<&[(K, V)]>> {
        let mut levels = Vec::new();
        let mut current: Vec<&Node<K, V>> = self.root.as_deref().into_iter().collect();
        while !current.is_empty() {
            levels.push(current.iter().map(|node| node.entries()).collect());
            current = current
                .iter()
                .flat_map(|node| node.children().iter().map(AsRef::as_ref))
                .collect();
        }
        levels
    }

    /// Mutate every entry in place, in key order, stopping at the first error.
    ///
    /// The caller must keep the key order unchanged.
    pub fn try_rewrite<E>(
        &mut self,
        mut f: impl FnMut(&mut K, &mut V) -> Result<(), E>,
    ) -> Result<(), E> {
        match &mut self.root {
            Some(root) => root.try_for_each_mut(&mut f),
            None => Ok(()),
        }
    }

    /// Verify node shape, equal leaf depth, key order, and entry count.
    pub fn check_invariants<O: KeyOrder<K>>(&self, order: &O) -> Result<(), TreeViolation> {
        let mut leaf_depth = None;
        let mut counted = 0;
        if let Some(root) = &self.root {
            check_node(root, 1, &mut leaf_depth, &mut counted)?;
        }
        if counted != self.len {
            return Err(TreeViolation::LengthMismatch {
                expected: self.len,
                found: counted,
            });
        }

        let keys: Vec<&K> = self.iter().map(|(key, _)| key).collect();
        if let Some(position) = keys
            .windows(2)
            .position(|pair| order.compare(pair[0], pair[1]) == Ordering::Greater)
        {
            return Err(TreeViolation::OutOfOrder {
                position: position + 1,
            });
        }
        Ok(())
    }
}

fn check_node<K, V>(
    node: &Node<K, V>,
    depth: usize,
    leaf_depth: &mut Option<usize>,
    counted: &mut usize,
) -> Result<(), TreeViolation> {
    let entries = node.entries().len();
    let children = node.children().len();
    let shape_ok = (1..=MAX_ENTRIES).contains(&entries) && (children == 0 || children == entries + 1);
    if !shape_ok {
        return Err(TreeViolation::NodeShape {
            depth,
            entries,
            children,
        });
    }
    *counted += entries;

    if node.is_leaf() {
        match *leaf_depth {
            None => *leaf_depth = Some(depth),
            Some(expected) if expected != depth => {
                return Err(TreeViolation::UnevenLeaves {
                    expected,
                    found: depth,
                });
            }
            Some(_) => {}
        }
        return Ok(());
    }

    node.children()
        .iter()
        .try_for_each(|child| check_node(child, depth + 1, leaf_depth, counted))
}

/// In-order iterator over a [`TwoThreeTree`].
#[derive(Debug)]
pub struct Iter<'a, K, V> {
    /// Path from the root; each node paired with its next entry index.
    stack: Vec<(&'a Node<K, V>, usize)>,
}

impl<'a, K, V> Iter<'a, K, V> {
    /// Push `node` and its leftmost descendants.
    fn descend(&mut self, node: &'a Node<K, V>) {
        let mut current = node;
        loop {
            self.stack.push((current, 0));
            match current.children().first() {
                Some(child) => current = &**child,
                None => break,
            }
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node, index) = self.stack.last_mut()?;
            let node: &'a Node<K, V> = *node;
            let current = *index;
            if current < node.entries().len() {
                *index += 1;
                if let Some(child) = node.children().get(current + 1) {
                    self.descend(child);
                }
                let (key, value) = &node.entries()[current];
                return Some((key, value));
            }
            self.stack.pop();
        }
    }
}

/// A broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeViolation {
    /// A node with the wrong number of entries or children.
    NodeShape {
        depth: usize,
        entries: usize,
        children: usize,
    },
    /// Leaves at different depths.
    UnevenLeaves { expected: usize, found: usize },
    /// In-order traversal descends at this position.
    OutOfOrder { position: usize },
    /// Stored length disagrees with the entries reachable from the root.
    LengthMismatch { expected: usize, found: usize },
}

impl std::fmt::Display for TreeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeShape {
                depth,
                entries,
                children,
            } => write!(
                f,
                "node at depth {depth} has {entries} entries and {children} children"
            ),
            Self::UnevenLeaves { expected, found } => {
                write!(f, "leaf at depth {found}, expected {expected}")
            }
            Self::OutOfOrder { position } => {
                write!(f, "in-order traversal out of order at position {position}")
            }
            Self::LengthMismatch { expected, found } => {
                write!(f, "tree reports {expected} entries but holds {found}")
            }
        }
    }
}

impl std::error::Error for TreeViolation {}
