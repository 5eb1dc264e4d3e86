use metis::domain::models::StateActionKey;
use metis::services::ValueStore;
use proptest::prelude::*;

fn key_strategy() -> impl Strategy<Value = StateActionKey> {
    (
        prop::sample::select(vec!["A", "B"]),
        prop::sample::select(vec!["bug_fix", "testing", "general"]),
        prop::sample::select(vec!["default", "opt", "alt"]),
    )
        .prop_map(|(agent, task, variant)| StateActionKey::new(agent, task, variant))
}

proptest! {
    /// Property: Visit counts never decrease
    ///
    /// For any interleaving of updates, each key's visit count only grows and
    /// equals the number of updates that asked for an increment.
    #[test]
    fn prop_visit_counts_are_monotonic(
        updates in prop::collection::vec((key_strategy(), -1.0f64..1.0, any::<bool>()), 1..80)
    ) {
        let store = ValueStore::in_memory();
        let mut expected = std::collections::HashMap::new();

        for (key, value, increment) in updates {
            let before = store.get(&key).visit_count;
            let entry = store.update(&key, value, increment);
            prop_assert!(entry.visit_count >= before);
            prop_assert_eq!(entry.value, value);

            let count = expected.entry(key.clone()).or_insert(0u64);
            if increment {
                *count += 1;
            }
            prop_assert_eq!(entry.visit_count, *count);
        }

        for (key, count) in expected {
            prop_assert_eq!(store.get(&key).visit_count, count);
        }
    }

    /// Property: Seeding never overwrites a visited key
    #[test]
    fn prop_seed_only_touches_unseen_keys(
        key in key_strategy(),
        learned in -1.0f64..1.0,
        seed in -1.0f64..1.0,
    ) {
        let store = ValueStore::in_memory();
        prop_assert!(store.seed(&key, seed));
        prop_assert_eq!(store.get(&key).visit_count, 0);

        store.update(&key, learned, true);
        prop_assert!(!store.seed(&key, seed));
        prop_assert_eq!(store.get(&key).value, learned);
    }

    /// Property: Snapshots are sorted by key and hold one entry per key
    #[test]
    fn prop_snapshot_is_sorted_and_unique(
        keys in prop::collection::vec(key_strategy(), 1..40)
    ) {
        let store = ValueStore::in_memory();
        for key in &keys {
            store.update(key, 0.5, true);
        }
        let snapshot = store.snapshot();
        let unique: std::collections::BTreeSet<_> = keys.into_iter().collect();
        prop_assert_eq!(snapshot.len(), unique.len());
        prop_assert!(snapshot.windows(2).all(|w| w[0].key < w[1].key));
    }
}
