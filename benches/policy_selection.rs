use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use metis::domain::models::{
    DecisionState, LearningConfig, OutcomeRecord, PolicyKind, RawOutcome, RewardConfig,
    StateActionKey, TaskRequest, VariantId,
};
use metis::services::policies::{build_policy_of_kind, extract_features, LinUcbPolicy};
use metis::services::{PolicyContext, RewardCalculator, TaskClassifier, ValueStore};
use std::sync::Arc;

const KINDS: [PolicyKind; 4] = [
    PolicyKind::QLearning,
    PolicyKind::Ucb1,
    PolicyKind::Thompson,
    PolicyKind::LinUcb,
];

fn populated_store(candidates: &[VariantId], state: &DecisionState) -> Arc<ValueStore> {
    let store = Arc::new(ValueStore::in_memory());
    for (i, variant) in candidates.iter().enumerate() {
        let key = state.key_for(variant);
        for _ in 0..=(i % 7) {
            store.update(&key, (i as f64 / candidates.len() as f64) * 2.0 - 1.0, true);
        }
    }
    store
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy_select");
    let request = TaskRequest::new("bench", "fix the flaky integration test in the parser");
    let context = PolicyContext::with_features(extract_features(&request));
    let state = DecisionState::new("bench", "bug_fix");

    for size in [4usize, 32, 256] {
        let candidates: Vec<VariantId> = (0..size).map(|i| format!("v{i:04}").into()).collect();
        let store = populated_store(&candidates, &state);

        for kind in KINDS {
            let mut config = LearningConfig::default();
            config.seed = Some(42);
            let linucb = Arc::new(LinUcbPolicy::new(Arc::clone(&store), &config));
            let policy = build_policy_of_kind(kind, &config, Arc::clone(&store), &linucb);

            group.bench_with_input(BenchmarkId::new(kind.as_str(), size), &candidates, |b, cands| {
                b.iter(|| policy.select(black_box(&state), black_box(cands), &context))
            });
        }
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let request = TaskRequest::new("bench", "write unit tests for the cache");
    let context = PolicyContext::with_features(extract_features(&request));
    let key = StateActionKey::new("bench", "testing", "v0001");
    let store = Arc::new(ValueStore::in_memory());
    let config = LearningConfig::default();
    let linucb = Arc::new(LinUcbPolicy::new(Arc::clone(&store), &config));

    for kind in KINDS {
        let policy = build_policy_of_kind(kind, &config, Arc::clone(&store), &linucb);
        c.bench_function(&format!("policy_update/{}", kind.as_str()), |b| {
            b.iter(|| policy.update(black_box(&key), black_box(0.5), &context))
        });
    }
}

fn bench_reward_and_classify(c: &mut Criterion) {
    let calculator = RewardCalculator::new(RewardConfig::default());
    let outcome = OutcomeRecord::from_raw(
        &RawOutcome::success()
            .with_quality(0.8)
            .with_duration(240.0)
            .with_errors(1),
    )
    .unwrap();
    c.bench_function("reward_calculate", |b| {
        b.iter(|| calculator.calculate(black_box(&outcome)))
    });

    let classifier = TaskClassifier::new(&Default::default());
    let hints = vec!["src/parser.rs".to_string(), "tests/parser_test.rs".to_string()];
    c.bench_function("classify", |b| {
        b.iter(|| {
            classifier.classify(
                black_box("fix the regression in the parser and add a test"),
                black_box(&hints),
            )
        })
    });
}

criterion_group!(benches, bench_select, bench_update, bench_reward_and_classify);
criterion_main!(benches);
