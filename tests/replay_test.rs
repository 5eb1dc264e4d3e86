//! Restart durability: a reopened engine reproduces the learned state.

mod common;

use metis::cli::engine;
use metis::domain::models::{
    Config, ConfigurationDelta, RawOutcome, StateActionKey, TaskRequest, TaskType, ValueEntry,
    Variant,
};

fn config_for(path: &std::path::Path) -> Config {
    let mut config = common::greedy_config();
    config.database.path = path.to_string_lossy().into_owned();
    config
}

fn summary(entries: &[ValueEntry]) -> Vec<(StateActionKey, f64, u64)> {
    entries
        .iter()
        .map(|e| (e.key.clone(), e.value, e.visit_count))
        .collect()
}

#[tokio::test]
async fn test_restart_reproduces_value_snapshot() {
    let (_dir, db_path) = common::temp_db_path();
    let config = config_for(&db_path);

    let before = {
        let coordinator = engine::open(&config).await.unwrap();
        for id in ["default", "opt", "alt"] {
            coordinator
                .repository()
                .register(Variant::authored("A", id, ConfigurationDelta::default()))
                .await
                .unwrap();
        }

        let opt = StateActionKey::new("A", TaskType::BUG_FIX, "opt");
        let alt = StateActionKey::new("A", TaskType::TESTING, "alt");
        for i in 0..12 {
            coordinator
                .report_for_key(&opt, RawOutcome::success().with_quality(1.0))
                .await;
            if i % 3 == 0 {
                coordinator
                    .report_for_key(&alt, RawOutcome::failure().with_errors(1))
                    .await;
            }
        }
        let selection = coordinator
            .select(TaskRequest::new("A", "fix the crash in the parser"))
            .await;
        coordinator
            .report(selection.invocation_id, RawOutcome::success())
            .await;

        coordinator.shutdown().await.unwrap();
        coordinator.store().snapshot()
    };
    assert!(!before.is_empty());

    let reopened = engine::open(&config).await.unwrap();
    let after = reopened.store().snapshot();
    assert_eq!(summary(&before), summary(&after));

    // The catalog survives too, with recorded performance.
    let variants = reopened.repository().list(Some("A")).await;
    assert_eq!(variants.len(), 3);
    let opt = variants
        .iter()
        .find(|v| v.variant_id.as_str() == "opt")
        .unwrap();
    assert!(opt.performance.sample_count >= 12);
}

#[tokio::test]
async fn test_retired_variant_stays_retired_after_restart() {
    let (_dir, db_path) = common::temp_db_path();
    let config = config_for(&db_path);

    {
        let coordinator = engine::open(&config).await.unwrap();
        for id in ["default", "alt"] {
            coordinator
                .repository()
                .register(Variant::authored("A", id, ConfigurationDelta::default()))
                .await
                .unwrap();
        }
        coordinator.retire("A", &"alt".into()).await.unwrap();
        coordinator.shutdown().await.unwrap();
    }

    let reopened = engine::open(&config).await.unwrap();
    assert_eq!(reopened.repository().active_ids("A").await, vec!["default".into()]);
    for _ in 0..10 {
        let selection = reopened.select(TaskRequest::new("A", "write docs")).await;
        assert_eq!(selection.variant_id.as_str(), "default");
    }
}
