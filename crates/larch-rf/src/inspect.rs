//! Consistency checks and JSON rendering of a forest.

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::bag::in_bag;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::index::SampleIndex;
use crate::node::{LeafCounts, Node};
use crate::tree::SplitTree;

/// Recount one tree's leaves from the committed samples and compare.
pub(crate) fn check_tree(
    tree_pos: usize,
    tree: &SplitTree,
    index: &SampleIndex,
    bag_fraction: f64,
) -> Result<(), ForestError> {
    let mut expected = vec![LeafCounts::default(); tree.n_nodes()];
    for sample in index.iter() {
        if !in_bag(sample.id, tree_pos, bag_fraction) {
            continue;
        }
        let slot = &mut expected[tree.route(sample.features).index()];
        if sample.label == 0 {
            slot.count0 += 1;
        } else {
            slot.count1 += 1;
        }
    }

    for (leaf, stored) in tree.leaf_counts() {
        let want = expected[leaf.index()];
        if stored != want {
            return Err(ForestError::LeafCountMismatch {
                tree: tree_pos,
                node: leaf.index(),
                stored0: stored.count0,
                stored1: stored.count1,
                expected0: want.count0,
                expected1: want.count1,
            });
        }
    }
    Ok(())
}

fn tree_json(nodes: &[Node], idx: usize) -> Value {
    match &nodes[idx] {
        Node::Leaf(counts) => json!(counts.estimate()),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => json!([
            feature.index(),
            threshold,
            tree_json(nodes, left.index()),
            tree_json(nodes, right.index()),
        ]),
    }
}

impl Forest {
    /// Check every committed leaf counter against the sample index.
    ///
    /// Pending changes are not committed first; the check covers the state
    /// after the last successful commit.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::LeafCountMismatch`] for the first leaf found
    /// whose counters differ from a recount of the committed samples.
    #[instrument(skip_all, fields(n_trees = self.trees.len(), n_samples = self.index.len()))]
    pub fn validate(&self) -> Result<(), ForestError> {
        let bag_fraction = self.config.bag_fraction;
        self.trees
            .par_iter()
            .enumerate()
            .try_for_each(|(pos, tree)| check_tree(pos, tree, &self.index, bag_fraction))?;
        debug!("all leaf counters consistent");
        Ok(())
    }

    /// Render every tree as nested JSON, after committing.
    ///
    /// A leaf becomes its estimate; a split becomes
    /// `[feature, threshold, left, right]`.
    ///
    /// # Errors
    ///
    /// Propagates a failed [`Forest::commit`].
    pub fn to_json(&mut self) -> Result<Value, ForestError> {
        self.commit()?;
        Ok(Value::Array(
            self.trees.iter().map(|t| tree_json(t.nodes(), 0)).collect(),
        ))
    }
}
