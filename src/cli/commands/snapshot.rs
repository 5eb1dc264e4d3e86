//! `metis snapshot`.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::engine;
use crate::cli::output::{output, table, CommandOutput};
use crate::domain::models::{Config, ValueEntry};

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Only show values for this agent
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Only show values for this task type
    #[arg(short, long)]
    pub task_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotOutput {
    pub entries: Vec<ValueEntry>,
    pub total: usize,
}

impl CommandOutput for SnapshotOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No learned values.".to_string();
        }
        let mut t = table(["Agent", "Task type", "Variant", "Value", "Visits", "Last update"]);
        for e in &self.entries {
            t.add_row(vec![
                e.key.agent_name().to_string(),
                e.key.task_type().to_string(),
                e.key.variant_id().to_string(),
                format!("{:.4}", e.value),
                e.visit_count.to_string(),
                e.last_updated.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]);
        }
        format!("{} value(s):\n{t}", self.total)
    }
}

/// Entries matching the optional filters, in key order.
pub fn filter_entries(
    entries: Vec<ValueEntry>,
    agent: Option<&str>,
    task_type: Option<&str>,
) -> Vec<ValueEntry> {
    entries
        .into_iter()
        .filter(|e| agent.is_none_or(|a| e.key.agent_name() == a))
        .filter(|e| task_type.is_none_or(|t| e.key.task_type().as_str() == t))
        .collect()
}

pub async fn execute(args: SnapshotArgs, config: &Config, json_mode: bool) -> Result<()> {
    let coordinator = engine::open(config).await?;
    let entries = filter_entries(
        coordinator.store().snapshot(),
        args.agent.as_deref(),
        args.task_type.as_deref(),
    );
    let result = SnapshotOutput {
        total: entries.len(),
        entries,
    };
    output(&result, json_mode);
    Ok(())
}
