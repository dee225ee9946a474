use std::ops::RangeInclusive;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::{
    config::ForestConfig,
    error::ForestError,
    features::SparseFeatures,
    node::{FeatureIndex, LeafCounts, Node, NodeIndex},
};

/// Bounds that drive random topology generation for one tree.
#[derive(Debug, Clone)]
pub(crate) struct TopologyBounds {
    pub(crate) max_depth: usize,
    pub(crate) features: RangeInclusive<u32>,
    pub(crate) thresholds: RangeInclusive<i64>,
    pub(crate) max_leaves: usize,
}

impl From<&ForestConfig> for TopologyBounds {
    fn from(config: &ForestConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            features: config.feature_range(),
            thresholds: config.threshold_range(),
            max_leaves: config.max_leaves.unwrap_or(usize::MAX),
        }
    }
}

/// Net change to one leaf's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct CountDelta {
    pub(crate) d0: i64,
    pub(crate) d1: i64,
}

impl CountDelta {
    pub(crate) fn bump(&mut self, label: u8, by: i64) {
        if label == 0 {
            self.d0 += by;
        } else {
            self.d1 += by;
        }
    }

    pub(crate) fn is_zero(self) -> bool {
        self.d0 == 0 && self.d1 == 0
    }

    /// Counters after applying this delta, or the first label that underflows.
    pub(crate) fn applied_to(self, counts: LeafCounts) -> Result<LeafCounts, u8> {
        let count0 = counts.count0.checked_add_signed(self.d0).ok_or(0u8)?;
        let count1 = counts.count1.checked_add_signed(self.d1).ok_or(1u8)?;
        Ok(LeafCounts { count0, count1 })
    }
}

/// Recursively draw a data-independent topology into `arena` in pre-order.
///
/// Returns the [`NodeIndex`] of the node just created.
fn grow(
    bounds: &TopologyBounds,
    depth: usize,
    budget: usize,
    rng: &mut ChaCha8Rng,
    arena: &mut Vec<Node>,
) -> NodeIndex {
    let node_idx = arena.len();
    if depth >= bounds.max_depth || budget < 2 {
        arena.push(Node::Leaf(LeafCounts::default()));
        return NodeIndex::new(node_idx);
    }

    let feature = FeatureIndex::new(rng.gen_range(bounds.features.clone()));
    let threshold = rng.gen_range(bounds.thresholds.clone());

    // Reserve the slot so children land after their parent.
    arena.push(Node::Leaf(LeafCounts::default()));

    let left_budget = budget / 2;
    let left = grow(bounds, depth + 1, left_budget, rng, arena);
    let right = grow(bounds, depth + 1, budget - left_budget, rng, arena);

    arena[node_idx] = Node::Split {
        feature,
        threshold,
        left,
        right,
    };
    NodeIndex::new(node_idx)
}

/// A randomized binary routing tree with per-leaf label counters.
///
/// Stored as an arena `Vec<Node>` with the root at index 0 and nodes laid out
/// in pre-order. The topology is fixed at construction; only leaf counters
/// change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitTree {
    pub(crate) nodes: Vec<Node>,
}

impl SplitTree {
    /// Draw a fresh topology with all leaves at `(0, 0)`.
    pub(crate) fn build(bounds: &TopologyBounds, rng: &mut ChaCha8Rng) -> Self {
        let mut nodes = Vec::new();
        grow(bounds, 0, bounds.max_leaves, rng, &mut nodes);
        Self { nodes }
    }

    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Route a feature vector from the root to its leaf.
    ///
    /// At each split the feature's value (0 when absent) goes left when
    /// strictly below the threshold and right otherwise.
    #[must_use]
    pub fn route(&self, features: &SparseFeatures) -> NodeIndex {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(_) => return NodeIndex::new(idx),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features.get(*feature) < *threshold {
                        left.index()
                    } else {
                        right.index()
                    };
                }
            }
        }
    }

    /// Probability of label 1 at the leaf `features` reaches.
    ///
    /// Empty leaves yield [`LeafCounts::NEUTRAL_ESTIMATE`].
    #[must_use]
    pub fn estimate(&self, features: &SparseFeatures) -> f64 {
        self.counts_at(self.route(features)).estimate()
    }

    /// Apply a delta to one leaf's counters.
    ///
    /// `tree_pos` only labels the error. The leaf is left untouched when the
    /// delta would take a counter below zero or `leaf` is not a leaf.
    pub(crate) fn apply_delta(
        &mut self,
        tree_pos: usize,
        leaf: NodeIndex,
        delta: CountDelta,
    ) -> Result<(), ForestError> {
        let Some(Node::Leaf(counts)) = self.nodes.get_mut(leaf.index()) else {
            return Err(ForestError::NotALeaf {
                tree: tree_pos,
                node: leaf.index(),
            });
        };
        *counts = delta
            .applied_to(*counts)
            .map_err(|label| ForestError::NegativeLeafCount {
                tree: tree_pos,
                node: leaf.index(),
                label,
            })?;
        Ok(())
    }

    /// Counters of the leaf at `leaf`; split nodes report `(0, 0)`.
    #[must_use]
    pub fn counts_at(&self, leaf: NodeIndex) -> LeafCounts {
        match self.nodes.get(leaf.index()) {
            Some(Node::Leaf(counts)) => *counts,
            _ => LeafCounts::default(),
        }
    }

    /// Iterate over every leaf and its counters in arena order.
    pub fn leaf_counts(&self) -> impl Iterator<Item = (NodeIndex, LeafCounts)> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, n)| match n {
            Node::Leaf(counts) => Some((NodeIndex::new(i), *counts)),
            Node::Split { .. } => None,
        })
    }

    /// Borrow the node arena (root first, pre-order).
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the total number of nodes in the tree.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the maximum depth of the tree (a lone root leaf has depth 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut max_depth = 0usize;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, d)) = stack.pop() {
            match &self.nodes[idx] {
                Node::Leaf(_) => max_depth = max_depth.max(d),
                Node::Split { left, right, .. } => {
                    stack.push((left.index(), d + 1));
                    stack.push((right.index(), d + 1));
                }
            }
        }
        max_depth
    }
}
