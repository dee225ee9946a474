//! Sparse integer feature vectors.

use std::collections::{BTreeMap, HashMap};

use crate::error::ForestError;
use crate::node::FeatureIndex;

/// A sparse feature vector: sorted, unique `(feature, value)` pairs.
///
/// Any feature not listed reads as `0`. Explicitly listed zeros are kept so
/// the vector reads back exactly as it was given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SparseFeatures {
    entries: Vec<(FeatureIndex, i64)>,
}

impl SparseFeatures {
    /// Create an empty feature vector (every feature reads as 0).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a feature vector from `(feature, value)` pairs in any order.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::DuplicateFeature`] if a feature key repeats.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ForestError>
    where
        I: IntoIterator<Item = (u32, i64)>,
    {
        let mut entries: Vec<(FeatureIndex, i64)> = pairs
            .into_iter()
            .map(|(k, v)| (FeatureIndex::new(k), v))
            .collect();
        entries.sort_by_key(|&(k, _)| k);
        if let Some(w) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(ForestError::DuplicateFeature {
                feature: w[0].0.index(),
            });
        }
        Ok(Self { entries })
    }

    /// Value of `feature`, or 0 when absent.
    #[must_use]
    pub fn get(&self, feature: FeatureIndex) -> i64 {
        self.entries
            .binary_search_by_key(&feature, |&(k, _)| k)
            .map_or(0, |pos| self.entries[pos].1)
    }

    /// Iterate over the stored pairs in ascending feature order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (FeatureIndex, i64)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of explicitly stored features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no feature is explicitly stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn to_raw(&self) -> Vec<(u32, i64)> {
        self.entries.iter().map(|&(k, v)| (k.index(), v)).collect()
    }
}

impl From<BTreeMap<u32, i64>> for SparseFeatures {
    fn from(map: BTreeMap<u32, i64>) -> Self {
        Self {
            entries: map.into_iter().map(|(k, v)| (FeatureIndex::new(k), v)).collect(),
        }
    }
}

impl<S: std::hash::BuildHasher> From<HashMap<u32, i64, S>> for SparseFeatures {
    fn from(map: HashMap<u32, i64, S>) -> Self {
        let mut entries: Vec<(FeatureIndex, i64)> = map
            .into_iter()
            .map(|(k, v)| (FeatureIndex::new(k), v))
            .collect();
        entries.sort_unstable_by_key(|&(k, _)| k);
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::SparseFeatures;
    use crate::error::ForestError;
    use crate::node::FeatureIndex;

    #[test]
    fn missing_feature_reads_zero() {
        let f = SparseFeatures::from_pairs([(3, 7), (1, 2)]).unwrap();
        assert_eq!(f.get(FeatureIndex::new(1)), 2);
        assert_eq!(f.get(FeatureIndex::new(3)), 7);
        assert_eq!(f.get(FeatureIndex::new(2)), 0);
        assert_eq!(f.get(FeatureIndex::new(99)), 0);
    }

    #[test]
    fn pairs_are_sorted() {
        let f = SparseFeatures::from_pairs([(5, 1), (0, 1), (2, 0)]).unwrap();
        let keys: Vec<u32> = f.iter().map(|(k, _)| k.index()).collect();
        assert_eq!(keys, vec![0, 2, 5]);
    }

    #[test]
    fn explicit_zero_is_kept() {
        let f = SparseFeatures::from_pairs([(2, 0)]).unwrap();
        assert_eq!(f.len(), 1);
        assert_eq!(f.to_raw(), vec![(2, 0)]);
    }

    #[test]
    fn duplicate_key_rejected() {
        let err = SparseFeatures::from_pairs([(1, 1), (4, 0), (1, 0)]).unwrap_err();
        assert!(matches!(err, ForestError::DuplicateFeature { feature: 1 }));
    }

    #[test]
    fn map_conversions_agree() {
        let btree: BTreeMap<u32, i64> = [(9, 1), (1, 3)].into_iter().collect();
        let hash: HashMap<u32, i64> = [(1, 3), (9, 1)].into_iter().collect();
        assert_eq!(SparseFeatures::from(btree), SparseFeatures::from(hash));
    }

    #[test]
    fn empty_vector() {
        let f = SparseFeatures::new();
        assert!(f.is_empty());
        assert_eq!(f.get(FeatureIndex::new(0)), 0);
    }
}
