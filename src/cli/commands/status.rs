//! `metis status`.

use anyhow::Result;
use serde::Serialize;

use crate::cli::engine;
use crate::cli::output::{fmt_opt, output, table, CommandOutput};
use crate::domain::models::{Config, VariantStatus};
use crate::services::CoordinatorStatus;

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    #[serde(flatten)]
    pub status: CoordinatorStatus,
    pub agents: usize,
    pub active_variants: usize,
    pub retired_variants: usize,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let store = &self.status.safety.store;
        let mut lines = vec![
            format!("Policy: {}", self.status.policy.as_str()),
            format!("Learned values: {}", self.status.value_entries),
            format!(
                "Variants: {} active, {} retired across {} agent(s)",
                self.active_variants, self.retired_variants, self.agents
            ),
            format!(
                "Value store: {} (consecutive failures: {}, buffered: {})",
                if store.degraded { "DEGRADED" } else { "ok" },
                store.consecutive_failures,
                store.buffered_records
            ),
            format!("Quarantine events: {}", self.status.safety.quarantine_events),
        ];

        if !self.status.safety.variants.is_empty() {
            let mut t = table(["Agent", "Variant", "Health", "Window", "Baseline", "Errors", "Quarantines"]);
            for v in &self.status.safety.variants {
                t.add_row(vec![
                    v.agent_name.clone(),
                    v.variant_id.to_string(),
                    v.state.to_string(),
                    fmt_opt(v.window_mean),
                    fmt_opt(v.baseline),
                    fmt_opt(v.error_rate),
                    v.quarantine_count.to_string(),
                ]);
            }
            lines.push(String::new());
            lines.push(t.to_string());
        }

        for alert in &self.status.safety.alerts {
            lines.push(format!("ALERT {}: {}", alert.raised_at.to_rfc3339(), alert.message));
        }
        lines.join("\n")
    }
}

pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let coordinator = engine::open(config).await?;
    let variants = coordinator.repository().list(None).await;
    let agents = coordinator.repository().agents().await.len();
    let retired = variants
        .iter()
        .filter(|v| v.status == VariantStatus::Retired)
        .count();

    let result = StatusOutput {
        status: coordinator.status().await,
        agents,
        active_variants: variants.len() - retired,
        retired_variants: retired,
    };
    output(&result, json_mode);
    Ok(())
}
