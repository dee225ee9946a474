//! Hash-based per-tree bag membership.

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Whether the sample `id` is counted by tree number `tree`.
///
/// Membership is a pure function of `(id, tree, fraction)`, so a sample
/// lands in the same bags on every commit, remove and reload.
pub(crate) fn in_bag(id: &str, tree: usize, fraction: f64) -> bool {
    if fraction >= 1.0 {
        return true;
    }
    let digest = xxh3_64_with_seed(id.as_bytes(), tree as u64);
    (digest as f64 / u64::MAX as f64) < fraction
}
