use std::fmt;

/// Feature key of a sparse feature vector.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct FeatureIndex(u32);

impl FeatureIndex {
    /// Create a feature index from its raw key.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Return the raw feature key.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a `Vec<Node>` arena, identifying a specific node in a split tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-leaf label counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct LeafCounts {
    /// Committed samples with label 0 routed to this leaf.
    pub count0: u64,
    /// Committed samples with label 1 routed to this leaf.
    pub count1: u64,
}

impl LeafCounts {
    /// Estimate returned by a leaf that has seen no samples.
    pub const NEUTRAL_ESTIMATE: f64 = 0.5;

    /// Total number of samples counted at this leaf.
    #[must_use]
    pub fn total(self) -> u64 {
        self.count0 + self.count1
    }

    /// Fraction of label-1 samples, or [`Self::NEUTRAL_ESTIMATE`] when empty.
    #[must_use]
    pub fn estimate(self) -> f64 {
        match self.total() {
            0 => Self::NEUTRAL_ESTIMATE,
            n => self.count1 as f64 / n as f64,
        }
    }
}

/// A node in a split tree arena.
///
/// Trees are stored as `Vec<Node>` where children are referenced by
/// [`NodeIndex`] rather than pointers. Only the counters inside `Leaf`
/// ever change after the tree is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// An interior routing node.
    Split {
        /// Feature compared at this node.
        feature: FeatureIndex,
        /// Values strictly below the threshold go left, all others right.
        threshold: i64,
        /// Index of the left child node.
        left: NodeIndex,
        /// Index of the right child node.
        right: NodeIndex,
    },
    /// A terminal leaf node.
    Leaf(LeafCounts),
}

impl Node {
    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }
}
