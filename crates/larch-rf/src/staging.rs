//! Pending add/remove requests between commits.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::error::ForestError;
use crate::index::StoredSample;

/// A pending mutation for one sample id.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedOp {
    /// Insert the sample, replacing any committed version.
    Upsert(StoredSample),
    /// Delete the committed sample.
    Remove,
}

/// Log of mutations issued since the last commit, at most one per id.
///
/// A later add overwrites whatever was staged for the id; a remove cancels a
/// staged add, and stays staged only when the id is also committed.
#[derive(Debug, Clone, Default)]
pub struct StagingLog {
    entries: BTreeMap<String, StagedOp>,
}

impl StagingLog {
    /// Stage an insert, replacing any earlier entry for the same id.
    pub(crate) fn stage_upsert(&mut self, id: String, sample: StoredSample) {
        self.entries.insert(id, StagedOp::Upsert(sample));
    }

    /// Stage a removal.
    ///
    /// `committed` says whether the index currently holds `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::SampleNotFound`] when `id` is neither staged
    /// nor committed.
    pub(crate) fn stage_remove(&mut self, id: &str, committed: bool) -> Result<(), ForestError> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut slot) => {
                if committed {
                    slot.insert(StagedOp::Remove);
                } else {
                    slot.remove();
                }
                Ok(())
            }
            Entry::Vacant(slot) => {
                if !committed {
                    return Err(ForestError::SampleNotFound { id: id.to_string() });
                }
                slot.insert(StagedOp::Remove);
                Ok(())
            }
        }
    }

    /// The staged entry for `id`, if any.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StagedOp> {
        self.entries.get(id)
    }

    /// Iterate over staged entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StagedOp)> + '_ {
        self.entries.iter().map(|(id, op)| (id.as_str(), op))
    }

    pub(crate) fn take(&mut self) -> BTreeMap<String, StagedOp> {
        std::mem::take(&mut self.entries)
    }

    /// Number of staged entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
