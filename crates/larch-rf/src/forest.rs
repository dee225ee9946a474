//! The incremental forest: construction, staging, classification, enumeration.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::config::ForestConfig;
use crate::error::ForestError;
use crate::features::SparseFeatures;
use crate::index::{SampleIndex, SampleRef, Samples, StoredSample};
use crate::staging::StagingLog;
use crate::tree::{SplitTree, TopologyBounds};

/// An ensemble of randomized split trees over a mutable sample set.
///
/// Mutations ([`Forest::add`], [`Forest::remove`]) are only staged. They
/// reach the trees and the sample index on [`Forest::commit`], which every
/// read ([`Forest::classify`], [`Forest::samples`], saving) runs first.
#[derive(Debug, Clone)]
pub struct Forest {
    pub(crate) config: ForestConfig,
    pub(crate) trees: Vec<SplitTree>,
    pub(crate) index: SampleIndex,
    pub(crate) staging: StagingLog,
}

/// Derive one seed per tree from the master seed.
fn tree_seeds(seed: u64, n_trees: usize) -> Vec<u64> {
    let mut master_rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n_trees).map(|_| master_rng.r#gen()).collect()
}

impl Forest {
    /// Create an empty forest with default settings and `n_trees` trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, ForestError> {
        ForestConfig::new(n_trees)?.build()
    }

    /// Generate every tree topology from `config` in parallel.
    #[instrument(skip_all, fields(n_trees = config.n_trees, max_depth = config.max_depth))]
    pub(crate) fn with_config(config: ForestConfig) -> Result<Self, ForestError> {
        config.validate()?;

        let bounds = TopologyBounds::from(&config);
        let trees: Vec<SplitTree> = tree_seeds(config.seed, config.n_trees)
            .into_par_iter()
            .map(|seed| SplitTree::build(&bounds, &mut ChaCha8Rng::seed_from_u64(seed)))
            .collect();

        info!(
            n_trees = trees.len(),
            n_nodes = trees.iter().map(SplitTree::n_nodes).sum::<usize>(),
            seed = config.seed,
            "forest built"
        );

        Ok(Self {
            config,
            trees,
            index: SampleIndex::default(),
            staging: StagingLog::default(),
        })
    }

    /// Stage a labelled sample, replacing anything staged for `id`.
    ///
    /// If `id` is already committed, the commit swaps the old version out
    /// before counting the new one.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidLabel`] when `label` is not 0 or 1.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        features: SparseFeatures,
        label: u8,
    ) -> Result<(), ForestError> {
        let id = id.into();
        if label > 1 {
            return Err(ForestError::InvalidLabel { id, label });
        }
        debug!(id = %id, n_features = features.len(), label, "staging add");
        self.staging
            .stage_upsert(id, StoredSample { features, label });
        Ok(())
    }

    /// Stage the removal of `id`, or cancel its pending add.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::SampleNotFound`] when `id` is neither committed
    /// nor staged.
    pub fn remove(&mut self, id: &str) -> Result<(), ForestError> {
        let committed = self.index.contains(id);
        self.staging.stage_remove(id, committed)?;
        debug!(id, committed, "staging remove");
        Ok(())
    }

    /// Mean of all per-tree estimates for `features`, in `[0, 1]`.
    ///
    /// Commits pending changes first. Thresholding to a class is left to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Propagates a failed [`Forest::commit`].
    pub fn classify(&mut self, features: &SparseFeatures) -> Result<f64, ForestError> {
        self.commit()?;
        Ok(mean_estimate(&self.trees, features))
    }

    /// Like [`Forest::classify`] but averages only the first `n_trees` trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidPartialTreeCount`] unless
    /// `1 <= n_trees <= self.n_trees()`, and propagates a failed commit.
    pub fn classify_partial(
        &mut self,
        features: &SparseFeatures,
        n_trees: usize,
    ) -> Result<f64, ForestError> {
        if n_trees == 0 || n_trees > self.trees.len() {
            return Err(ForestError::InvalidPartialTreeCount {
                requested: n_trees,
                available: self.trees.len(),
            });
        }
        self.commit()?;
        Ok(mean_estimate(&self.trees[..n_trees], features))
    }

    /// Committed samples in ascending id order, after committing.
    ///
    /// # Errors
    ///
    /// Propagates a failed [`Forest::commit`].
    pub fn samples(&mut self) -> Result<Samples<'_>, ForestError> {
        self.commit()?;
        Ok(self.index.iter())
    }

    /// The committed sample `id`, after committing.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::SampleNotFound`] when no such sample exists,
    /// and propagates a failed commit.
    pub fn get(&mut self, id: &str) -> Result<SampleRef<'_>, ForestError> {
        self.commit()?;
        self.index
            .sample(id)
            .ok_or_else(|| ForestError::SampleNotFound { id: id.to_string() })
    }

    /// Number of committed samples (pending changes not included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no sample is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.len() == 0
    }

    /// Number of staged, uncommitted entries.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.staging.len()
    }

    /// Borrow the staging log.
    #[must_use]
    pub fn staging(&self) -> &StagingLog {
        &self.staging
    }

    /// Return the number of trees in the ensemble.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Borrow the trees.
    #[must_use]
    pub fn trees(&self) -> &[SplitTree] {
        &self.trees
    }

    /// Borrow the configuration the forest was built with.
    #[must_use]
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }
}

/// Average the per-tree estimates.
///
/// Estimates are gathered in tree order and summed sequentially so repeated
/// calls give bit-identical results.
fn mean_estimate(trees: &[SplitTree], features: &SparseFeatures) -> f64 {
    let estimates: Vec<f64> = trees.par_iter().map(|t| t.estimate(features)).collect();
    estimates.iter().sum::<f64>() / estimates.len() as f64
}

#[cfg(test)]
mod tests {
    use super::Forest;
    use crate::config::ForestConfig;
    use crate::error::{ErrorKind, ForestError};
    use crate::features::SparseFeatures;

    fn x(pairs: &[(u32, i64)]) -> SparseFeatures {
        SparseFeatures::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn empty_forest_is_neutral() {
        let mut forest = Forest::new(7).unwrap();
        assert_eq!(forest.classify(&x(&[(1, 1)])).unwrap(), 0.5);
        assert!(forest.is_empty());
    }

    #[test]
    fn invalid_label_rejected() {
        let mut forest = Forest::new(3).unwrap();
        let err = forest.add("a", x(&[]), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(forest.pending(), 0);
    }

    #[test]
    fn add_is_staged_until_read() {
        let mut forest = Forest::new(3).unwrap();
        forest.add("a", x(&[(0, 1)]), 1).unwrap();
        assert_eq!(forest.pending(), 1);
        assert_eq!(forest.len(), 0);
        assert_eq!(forest.samples().unwrap().count(), 1);
        assert_eq!(forest.pending(), 0);
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let mut forest = Forest::new(3).unwrap();
        let err = forest.remove("nope").unwrap_err();
        assert!(matches!(err, ForestError::SampleNotFound { .. }));
    }

    #[test]
    fn remove_cancels_pending_add() {
        let mut forest = Forest::new(3).unwrap();
        forest.add("a", x(&[(0, 1)]), 1).unwrap();
        forest.remove("a").unwrap();
        assert_eq!(forest.pending(), 0);
        assert_eq!(forest.samples().unwrap().count(), 0);
    }

    #[test]
    fn single_positive_sample_pulls_estimate_up() {
        let mut forest = ForestConfig::new(5)
            .unwrap()
            .with_feature_range(0..=3)
            .with_max_depth(3)
            .build()
            .unwrap();
        forest.add("p", x(&[(0, 1), (1, 1)]), 1).unwrap();
        assert_eq!(forest.classify(&x(&[(0, 1), (1, 1)])).unwrap(), 1.0);
    }

    #[test]
    fn partial_classification_bounds() {
        let mut forest = Forest::new(4).unwrap();
        assert!(forest.classify_partial(&x(&[]), 0).is_err());
        assert!(forest.classify_partial(&x(&[]), 5).is_err());
        assert_eq!(forest.classify_partial(&x(&[]), 4).unwrap(), 0.5);
    }

    #[test]
    fn partial_with_all_trees_matches_full() {
        let mut forest = Forest::new(6).unwrap();
        forest.add("a", x(&[(3, 1)]), 0).unwrap();
        forest.add("b", x(&[(4, 1)]), 1).unwrap();
        let q = x(&[(3, 1), (4, 1)]);
        let full = forest.classify(&q).unwrap();
        assert_eq!(forest.classify_partial(&q, 6).unwrap(), full);
    }

    #[test]
    fn get_reads_committed_sample() {
        let mut forest = Forest::new(2).unwrap();
        forest.add("a", x(&[(2, 0), (3, 4)]), 1).unwrap();
        let sample = forest.get("a").unwrap();
        assert_eq!(sample.label, 1);
        assert_eq!(sample.features, &x(&[(2, 0), (3, 4)]));
        assert!(matches!(
            forest.get("b"),
            Err(ForestError::SampleNotFound { .. })
        ));
    }
}
