//! Draining the staging log into the trees and the sample index.

use rayon::iter::{
    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
    IntoParallelRefMutIterator, ParallelIterator,
};
use rustc_hash::FxHashMap;
use tracing::{debug, info, instrument, warn};

use crate::bag::in_bag;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::index::{SampleIndex, StoredSample};
use crate::node::NodeIndex;
use crate::staging::{StagedOp, StagingLog};
use crate::tree::{CountDelta, SplitTree};

/// The resolved effect of one staged id on the committed state.
struct Change<'a> {
    id: &'a str,
    old: Option<&'a StoredSample>,
    new: Option<&'a StoredSample>,
}

/// Net counter changes for one tree, keyed by leaf.
type LeafDeltas = FxHashMap<NodeIndex, CountDelta>;

/// Pair every staged entry with the committed version it replaces.
fn resolve<'a>(staging: &'a StagingLog, index: &'a SampleIndex) -> Vec<Change<'a>> {
    staging
        .iter()
        .filter_map(|(id, op)| {
            let old = index.get(id);
            let new = match op {
                StagedOp::Upsert(sample) => Some(sample),
                StagedOp::Remove => None,
            };
            (old.is_some() || new.is_some()).then_some(Change { id, old, new })
        })
        .collect()
}

/// Route every change through one tree and check the resulting counters.
///
/// Old versions are uncounted and new versions counted at the leaves they
/// reach; a sample whose features did not move nets out to zero.
fn plan_tree(
    tree_pos: usize,
    tree: &SplitTree,
    changes: &[Change<'_>],
    bag_fraction: f64,
) -> Result<LeafDeltas, ForestError> {
    let mut deltas = LeafDeltas::default();
    for change in changes {
        if !in_bag(change.id, tree_pos, bag_fraction) {
            continue;
        }
        if let Some(old) = change.old {
            deltas
                .entry(tree.route(&old.features))
                .or_default()
                .bump(old.label, -1);
        }
        if let Some(new) = change.new {
            deltas
                .entry(tree.route(&new.features))
                .or_default()
                .bump(new.label, 1);
        }
    }
    deltas.retain(|_, d| !d.is_zero());

    for (&leaf, &delta) in &deltas {
        delta
            .applied_to(tree.counts_at(leaf))
            .map_err(|label| ForestError::NegativeLeafCount {
                tree: tree_pos,
                node: leaf.index(),
                label,
            })?;
    }
    Ok(deltas)
}

impl Forest {
    /// Apply every staged change to all trees and to the sample index.
    ///
    /// All deltas are computed and checked per tree in parallel before
    /// anything is written. If any leaf counter would go negative the
    /// commit fails with [`ForestError::NegativeLeafCount`] and the trees,
    /// the index and the staging log are left exactly as they were. An
    /// empty staging log is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::NegativeLeafCount`] on a counter underflow.
    #[instrument(skip_all, fields(staged = self.staging.len(), n_trees = self.trees.len()))]
    pub fn commit(&mut self) -> Result<(), ForestError> {
        if self.staging.is_empty() {
            return Ok(());
        }

        let changes = resolve(&self.staging, &self.index);
        let bag_fraction = self.config.bag_fraction;

        let planned: Result<Vec<LeafDeltas>, ForestError> = self
            .trees
            .par_iter()
            .enumerate()
            .map(|(pos, tree)| plan_tree(pos, tree, &changes, bag_fraction))
            .collect();
        let planned = match planned {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "commit rejected, staging log kept");
                return Err(e);
            }
        };
        let touched: usize = planned.iter().map(|d| d.len()).sum();
        let n_changes = changes.len();
        drop(changes);

        // Every delta was checked above, so this only fails on a defect.
        let applied = self
            .trees
            .par_iter_mut()
            .zip(planned.into_par_iter())
            .enumerate()
            .try_for_each(|(pos, (tree, deltas))| {
                deltas
                    .into_iter()
                    .try_for_each(|(leaf, delta)| tree.apply_delta(pos, leaf, delta))
            });
        if let Err(e) = applied {
            warn!(error = %e, "leaf update failed after planning, staging log kept");
            return Err(e);
        }

        let (mut upserts, mut removals) = (0usize, 0usize);
        for (id, op) in self.staging.take() {
            match op {
                StagedOp::Upsert(sample) => {
                    self.index.upsert(id, sample);
                    upserts += 1;
                }
                StagedOp::Remove => {
                    self.index.remove(&id);
                    removals += 1;
                }
            }
        }

        debug!(n_changes, touched_leaves = touched, "leaf deltas applied");
        info!(upserts, removals, n_samples = self.index.len(), "commit applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ForestConfig;
    use crate::error::{ErrorKind, ForestError};
    use crate::features::SparseFeatures;
    use crate::forest::Forest;
    use crate::node::{LeafCounts, NodeIndex};

    fn x(pairs: &[(u32, i64)]) -> SparseFeatures {
        SparseFeatures::from_pairs(pairs.iter().copied()).unwrap()
    }

    fn small_forest() -> Forest {
        ForestConfig::new(8)
            .unwrap()
            .with_feature_range(0..=5)
            .with_max_depth(4)
            .with_seed(11)
            .build()
            .unwrap()
    }

    fn snapshot(forest: &Forest) -> Vec<Vec<(NodeIndex, LeafCounts)>> {
        forest
            .trees()
            .iter()
            .map(|t| t.leaf_counts().collect())
            .collect()
    }

    #[test]
    fn empty_commit_changes_nothing() {
        let mut forest = small_forest();
        forest.add("a", x(&[(1, 1)]), 1).unwrap();
        forest.commit().unwrap();
        let before = snapshot(&forest);
        forest.commit().unwrap();
        assert_eq!(snapshot(&forest), before);
    }

    #[test]
    fn every_tree_counts_every_sample() {
        let mut forest = small_forest();
        for i in 0..10u32 {
            forest.add(i.to_string(), x(&[(i % 6, 1)]), (i % 2) as u8).unwrap();
        }
        forest.commit().unwrap();
        for tree in forest.trees() {
            let total: u64 = tree.leaf_counts().map(|(_, c)| c.total()).sum();
            assert_eq!(total, 10);
        }
    }

    #[test]
    fn upsert_of_committed_id_moves_the_sample() {
        let mut forest = small_forest();
        let old = x(&[(0, 1), (2, 1)]);
        let new = x(&[(3, 1)]);
        forest.add("s", old.clone(), 0).unwrap();
        forest.commit().unwrap();

        forest.add("s", new.clone(), 1).unwrap();
        forest.commit().unwrap();

        for tree in forest.trees() {
            let total: u64 = tree.leaf_counts().map(|(_, c)| c.total()).sum();
            assert_eq!(total, 1);
            assert_eq!(tree.counts_at(tree.route(&new)).count1, 1);
        }
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn last_write_wins_within_one_commit() {
        let mut forest = small_forest();
        forest.add("s", x(&[(1, 1)]), 0).unwrap();
        forest.add("s", x(&[(4, 1)]), 1).unwrap();
        forest.commit().unwrap();
        let sample = forest.get("s").unwrap();
        assert_eq!(sample.label, 1);
        assert_eq!(sample.features, &x(&[(4, 1)]));
    }

    #[test]
    fn remove_uncounts_stored_features() {
        let mut forest = small_forest();
        forest.add("a", x(&[(1, 1)]), 1).unwrap();
        forest.add("b", x(&[(2, 1)]), 0).unwrap();
        forest.commit().unwrap();
        forest.remove("a").unwrap();
        forest.commit().unwrap();
        for tree in forest.trees() {
            let ones: u64 = tree.leaf_counts().map(|(_, c)| c.count1).sum();
            let zeros: u64 = tree.leaf_counts().map(|(_, c)| c.count0).sum();
            assert_eq!((zeros, ones), (1, 0));
        }
    }

    #[test]
    fn underflow_fails_atomically() {
        let mut forest = small_forest();
        forest.add("a", x(&[(1, 1)]), 1).unwrap();
        forest.commit().unwrap();

        // Corrupt one tree so uncounting "a" would underflow.
        let leaf = forest.trees[3].route(&x(&[(1, 1)]));
        forest.trees[3].nodes[leaf.index()] = crate::node::Node::Leaf(LeafCounts::default());
        let before = snapshot(&forest);

        forest.remove("a").unwrap();
        let err = forest.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        assert!(matches!(err, ForestError::NegativeLeafCount { tree: 3, label: 1, .. }));

        assert_eq!(snapshot(&forest), before);
        assert_eq!(forest.pending(), 1);
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn bagged_trees_see_a_subset() {
        let mut forest = ForestConfig::new(30)
            .unwrap()
            .with_bag_fraction(0.5)
            .build()
            .unwrap();
        forest.add("only", x(&[(1, 1)]), 1).unwrap();
        forest.commit().unwrap();
        let counting = forest
            .trees()
            .iter()
            .filter(|t| t.leaf_counts().any(|(_, c)| c.total() > 0))
            .count();
        assert!(counting > 0 && counting < 30, "counting = {counting}");
    }
}
