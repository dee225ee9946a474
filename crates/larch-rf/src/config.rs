//! Configuration builder for forest construction.

use std::ops::RangeInclusive;

use crate::error::ForestError;
use crate::forest::Forest;

/// Deepest tree the builder accepts (a full tree then holds 2^25 - 1 nodes).
pub const MAX_SUPPORTED_DEPTH: usize = 24;

/// Configuration for an incremental forest.
///
/// Construct via [`ForestConfig::new`], then chain `with_*` methods and
/// finish with [`ForestConfig::build`]. Topology is drawn from these bounds
/// once, independently of any sample, so they materially change what the
/// forest can separate.
///
/// # Defaults
///
/// | Parameter         | Default   |
/// |-------------------|-----------|
/// | `max_depth`       | 8         |
/// | `feature_range`   | `0..=63`  |
/// | `threshold_range` | `1..=1`   |
/// | `max_leaves`      | `None`    |
/// | `seed`            | 42        |
/// | `bag_fraction`    | 1.0       |
///
/// The default thresholds suit 0/1 indicator features: absent or zero goes
/// left, anything `>= 1` goes right.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ForestConfig {
    pub(crate) n_trees: usize,
    pub(crate) max_depth: usize,
    pub(crate) feature_min: u32,
    pub(crate) feature_max: u32,
    pub(crate) threshold_min: i64,
    pub(crate) threshold_max: i64,
    pub(crate) max_leaves: Option<usize>,
    pub(crate) seed: u64,
    pub(crate) bag_fraction: f64,
}

impl ForestConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, ForestError> {
        if n_trees == 0 {
            return Err(ForestError::InvalidTreeCount { n_trees });
        }
        Ok(Self {
            n_trees,
            max_depth: 8,
            feature_min: 0,
            feature_max: 63,
            threshold_min: 1,
            threshold_max: 1,
            max_leaves: None,
            seed: 42,
            bag_fraction: 1.0,
        })
    }

    // --- Setters ---

    /// Set the maximum tree depth (root is depth 0).
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the range feature indices are drawn from.
    #[must_use]
    pub fn with_feature_range(mut self, range: RangeInclusive<u32>) -> Self {
        self.feature_min = *range.start();
        self.feature_max = *range.end();
        self
    }

    /// Set the range split thresholds are drawn from.
    #[must_use]
    pub fn with_threshold_range(mut self, range: RangeInclusive<i64>) -> Self {
        self.threshold_min = *range.start();
        self.threshold_max = *range.end();
        self
    }

    /// Cap the number of leaves per tree. `None` leaves depth as the only limit.
    ///
    /// Each split hands half of its budget to each child; a subtree whose
    /// budget drops below 2 becomes a leaf.
    #[must_use]
    pub fn with_max_leaves(mut self, max_leaves: Option<usize>) -> Self {
        self.max_leaves = max_leaves;
        self
    }

    /// Set the random seed for reproducible topology.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the share of samples each tree counts (1.0 = every tree sees all).
    #[must_use]
    pub fn with_bag_fraction(mut self, bag_fraction: f64) -> Self {
        self.bag_fraction = bag_fraction;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the maximum depth.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Return the feature index range.
    #[must_use]
    pub fn feature_range(&self) -> RangeInclusive<u32> {
        self.feature_min..=self.feature_max
    }

    /// Return the threshold range.
    #[must_use]
    pub fn threshold_range(&self) -> RangeInclusive<i64> {
        self.threshold_min..=self.threshold_max
    }

    /// Return the per-tree leaf budget, if any.
    #[must_use]
    pub fn max_leaves(&self) -> Option<usize> {
        self.max_leaves
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return the bag fraction.
    #[must_use]
    pub fn bag_fraction(&self) -> f64 {
        self.bag_fraction
    }

    /// Check every parameter.
    ///
    /// # Errors
    ///
    /// | Variant                              | When                                   |
    /// |--------------------------------------|----------------------------------------|
    /// | [`ForestError::InvalidTreeCount`]    | `n_trees` is zero                      |
    /// | [`ForestError::InvalidMaxDepth`]     | depth is 0 or above the supported cap  |
    /// | [`ForestError::InvalidFeatureRange`] | feature range start is above its end   |
    /// | [`ForestError::InvalidThresholdRange`] | threshold range start is above its end |
    /// | [`ForestError::InvalidLeafBudget`]   | `max_leaves` is `Some(0)`              |
    /// | [`ForestError::InvalidBagFraction`]  | fraction is not in (0.0, 1.0]          |
    pub fn validate(&self) -> Result<(), ForestError> {
        if self.n_trees == 0 {
            return Err(ForestError::InvalidTreeCount {
                n_trees: self.n_trees,
            });
        }
        if self.max_depth == 0 || self.max_depth > MAX_SUPPORTED_DEPTH {
            return Err(ForestError::InvalidMaxDepth {
                max_depth: self.max_depth,
                max: MAX_SUPPORTED_DEPTH,
            });
        }
        if self.feature_min > self.feature_max {
            return Err(ForestError::InvalidFeatureRange {
                start: self.feature_min,
                end: self.feature_max,
            });
        }
        if self.threshold_min > self.threshold_max {
            return Err(ForestError::InvalidThresholdRange {
                start: self.threshold_min,
                end: self.threshold_max,
            });
        }
        if let Some(0) = self.max_leaves {
            return Err(ForestError::InvalidLeafBudget { max_leaves: 0 });
        }
        if !(self.bag_fraction > 0.0 && self.bag_fraction <= 1.0) {
            return Err(ForestError::InvalidBagFraction {
                fraction: self.bag_fraction,
            });
        }
        Ok(())
    }

    /// Generate the tree topologies and return an empty forest.
    ///
    /// # Errors
    ///
    /// Any error from [`ForestConfig::validate`].
    pub fn build(&self) -> Result<Forest, ForestError> {
        Forest::with_config(self.clone())
    }
}
