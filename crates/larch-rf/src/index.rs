//! Committed sample store with id-ordered enumeration.

use std::collections::BTreeSet;
use std::collections::btree_set;

use rustc_hash::FxHashMap;

use crate::features::SparseFeatures;

/// Features and label of one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSample {
    /// The sample's sparse feature vector.
    pub features: SparseFeatures,
    /// The sample's label, 0 or 1.
    pub label: u8,
}

/// A borrowed view of one committed sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRef<'a> {
    /// Unique sample id.
    pub id: &'a str,
    /// The committed feature vector.
    pub features: &'a SparseFeatures,
    /// The committed label.
    pub label: u8,
}

/// The authoritative store of committed samples.
///
/// Lookups, inserts and deletes go through a hash map; a separate sorted key
/// set serves ascending-id enumeration.
#[derive(Debug, Clone, Default)]
pub(crate) struct SampleIndex {
    by_id: FxHashMap<String, StoredSample>,
    order: BTreeSet<String>,
}

impl SampleIndex {
    pub(crate) fn get(&self, id: &str) -> Option<&StoredSample> {
        self.by_id.get(id)
    }

    pub(crate) fn sample(&self, id: &str) -> Option<SampleRef<'_>> {
        self.by_id.get_key_value(id).map(|(id, s)| SampleRef {
            id,
            features: &s.features,
            label: s.label,
        })
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Insert or replace, returning the previous version.
    pub(crate) fn upsert(&mut self, id: String, sample: StoredSample) -> Option<StoredSample> {
        if !self.by_id.contains_key(&id) {
            self.order.insert(id.clone());
        }
        self.by_id.insert(id, sample)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<StoredSample> {
        let removed = self.by_id.remove(id)?;
        self.order.remove(id);
        Some(removed)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn iter(&self) -> Samples<'_> {
        Samples {
            keys: self.order.iter(),
            by_id: &self.by_id,
        }
    }
}

/// Committed samples in strictly ascending id order.
///
/// A cloned iterator resumes from the same position.
#[derive(Debug, Clone)]
pub struct Samples<'a> {
    keys: btree_set::Iter<'a, String>,
    by_id: &'a FxHashMap<String, StoredSample>,
}

impl<'a> Iterator for Samples<'a> {
    type Item = SampleRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.keys.next()?;
        let sample = self.by_id.get(id);
        debug_assert!(
            sample.is_some(),
            "sample {id:?} is in the key set but missing from the map"
        );
        let sample = sample?;
        Some(SampleRef {
            id,
            features: &sample.features,
            label: sample.label,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}
