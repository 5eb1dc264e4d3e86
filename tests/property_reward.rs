use metis::domain::models::{OutcomeRecord, RawOutcome, RewardConfig, TaskComplexity};
use metis::services::RewardCalculator;
use proptest::prelude::*;

fn complexity() -> impl Strategy<Value = Option<TaskComplexity>> {
    prop::option::of(prop::sample::select(vec![
        TaskComplexity::Low,
        TaskComplexity::Medium,
        TaskComplexity::High,
    ]))
}

fn raw_outcome() -> impl Strategy<Value = RawOutcome> {
    (
        prop::option::of(any::<bool>()),
        prop::option::of(any::<f64>()),
        prop::option::of(any::<f64>()),
        prop::option::of(any::<u32>()),
        complexity(),
    )
        .prop_map(|(success, quality_score, duration_seconds, error_count, task_complexity)| {
            RawOutcome {
                success,
                quality_score,
                duration_seconds,
                error_count,
                task_complexity,
            }
        })
}

proptest! {
    /// Property: Rewards always land in [-1, 1]
    ///
    /// Arbitrary, including non-finite, inputs never panic; a valid outcome
    /// always scores within bounds and a missing success flag is rejected.
    #[test]
    fn prop_reward_is_bounded(raw in raw_outcome()) {
        let calculator = RewardCalculator::new(RewardConfig::default());
        match OutcomeRecord::from_raw(&raw) {
            Ok(outcome) => {
                let reward = calculator.calculate(&outcome);
                prop_assert!(reward.is_finite());
                prop_assert!((-1.0..=1.0).contains(&reward));
            }
            Err(_) => prop_assert!(raw.success.is_none()),
        }
    }

    /// Property: Success never scores below failure on otherwise equal outcomes
    #[test]
    fn prop_success_dominates_failure(
        quality in 0.0f64..=1.0,
        duration in prop::option::of(0.0f64..10_000.0),
        errors in 0u32..10,
        complexity in complexity(),
    ) {
        let calculator = RewardCalculator::new(RewardConfig::default());
        let build = |success: bool| RawOutcome {
            success: Some(success),
            quality_score: Some(quality),
            duration_seconds: duration,
            error_count: Some(errors),
            task_complexity: complexity,
        };
        let win = calculator.calculate(&OutcomeRecord::from_raw(&build(true)).unwrap());
        let loss = calculator.calculate(&OutcomeRecord::from_raw(&build(false)).unwrap());
        prop_assert!(win >= loss);
    }

    /// Property: More errors never raise the reward
    #[test]
    fn prop_errors_are_penalised(
        success in any::<bool>(),
        quality in 0.0f64..=1.0,
        errors in 0u32..20,
    ) {
        let calculator = RewardCalculator::new(RewardConfig::default());
        let mut fewer = OutcomeRecord::new(success, quality);
        fewer.error_count = errors;
        let mut more = fewer.clone();
        more.error_count = errors + 1;
        prop_assert!(calculator.calculate(&more) <= calculator.calculate(&fewer));
    }
}
