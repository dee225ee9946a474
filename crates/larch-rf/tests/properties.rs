//! Property tests over random sample sets and update sequences.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use larch_rf::{Forest, ForestConfig, LeafCounts, NodeIndex, SparseFeatures};

type Sample = (String, BTreeMap<u32, i64>, u8);

fn features_strategy() -> impl Strategy<Value = BTreeMap<u32, i64>> {
    prop::collection::btree_map(0u32..12, -2i64..=3, 0..6)
}

fn samples_strategy() -> impl Strategy<Value = Vec<Sample>> {
    prop::collection::btree_map("[a-z0-9]{1,4}", (features_strategy(), 0u8..=1), 0..25)
        .prop_map(|m| m.into_iter().map(|(id, (f, l))| (id, f, l)).collect())
}

fn forest(bag_fraction: f64) -> Forest {
    ForestConfig::new(12)
        .unwrap()
        .with_feature_range(0..=11)
        .with_threshold_range(-1..=2)
        .with_max_depth(5)
        .with_seed(77)
        .with_bag_fraction(bag_fraction)
        .build()
        .unwrap()
}

fn load(forest: &mut Forest, samples: &[Sample]) {
    for (id, features, label) in samples {
        forest
            .add(id.clone(), SparseFeatures::from(features.clone()), *label)
            .unwrap();
    }
    forest.commit().unwrap();
}

fn leaf_snapshot(forest: &Forest) -> Vec<Vec<(NodeIndex, LeafCounts)>> {
    forest
        .trees()
        .iter()
        .map(|t| t.leaf_counts().collect())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Enumeration is strictly ascending and covers exactly the committed ids.
    #[test]
    fn prop_samples_are_sorted_and_complete(samples in samples_strategy()) {
        let mut f = forest(1.0);
        load(&mut f, &samples);
        let ids: Vec<String> = f.samples().unwrap().map(|s| s.id.to_string()).collect();
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let expected: BTreeSet<&String> = samples.iter().map(|(id, _, _)| id).collect();
        prop_assert_eq!(ids.iter().collect::<BTreeSet<_>>(), expected);
    }

    /// Every estimate stays within `[0, 1]`, including on an empty forest.
    #[test]
    fn prop_classify_is_bounded(
        samples in samples_strategy(),
        query in features_strategy(),
    ) {
        let q = SparseFeatures::from(query);
        let mut empty = forest(1.0);
        prop_assert_eq!(empty.classify(&q).unwrap(), 0.5);

        let mut f = forest(1.0);
        load(&mut f, &samples);
        let p = f.classify(&q).unwrap();
        prop_assert!((0.0..=1.0).contains(&p));
    }

    /// A second commit with nothing staged changes no counter.
    #[test]
    fn prop_commit_is_idempotent(samples in samples_strategy()) {
        let mut f = forest(0.6);
        load(&mut f, &samples);
        let before = leaf_snapshot(&f);
        f.commit().unwrap();
        prop_assert_eq!(leaf_snapshot(&f), before);
    }

    /// Counters only ever reflect the current sample set, whatever the path.
    #[test]
    fn prop_remove_then_readd_matches_fresh_forest(
        samples in samples_strategy(),
        churn in samples_strategy(),
        bag in prop_oneof![Just(1.0), Just(0.5)],
    ) {
        let mut fresh = forest(bag);
        load(&mut fresh, &samples);

        let mut churned = forest(bag);
        load(&mut churned, &churn);
        for (id, _, _) in &churn {
            churned.remove(id).unwrap();
        }
        churned.commit().unwrap();
        load(&mut churned, &samples);

        prop_assert_eq!(leaf_snapshot(&churned), leaf_snapshot(&fresh));
        prop_assert!(churned.validate().is_ok());
    }

    /// Saving and loading preserves samples and every estimate.
    #[test]
    fn prop_persistence_round_trip(
        samples in samples_strategy(),
        queries in prop::collection::vec(features_strategy(), 1..5),
    ) {
        let mut f = forest(0.8);
        load(&mut f, &samples);
        let bytes = f.to_bytes().unwrap();
        let mut back = Forest::from_bytes(&bytes).unwrap();

        prop_assert_eq!(back.len(), f.len());
        for q in queries {
            let q = SparseFeatures::from(q);
            prop_assert_eq!(back.classify(&q).unwrap(), f.classify(&q).unwrap());
        }
        let a: Vec<(String, u8)> = f.samples().unwrap().map(|s| (s.id.to_string(), s.label)).collect();
        let b: Vec<(String, u8)> = back.samples().unwrap().map(|s| (s.id.to_string(), s.label)).collect();
        prop_assert_eq!(a, b);
    }

    /// Same seed and same updates give bit-identical forests.
    #[test]
    fn prop_same_seed_is_deterministic(samples in samples_strategy()) {
        let mut a = forest(1.0);
        let mut b = forest(1.0);
        load(&mut a, &samples);
        load(&mut b, &samples);
        prop_assert_eq!(a.trees(), b.trees());
    }
}
