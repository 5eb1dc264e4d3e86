//! `metis evolve`.
//!
//! Offline search scores candidates with the historical evaluator. A new
//! child starts from its nearest ancestor's learned value and is shifted by
//! the per-feature effects observed across the agent's other variants.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;

use crate::cli::engine;
use crate::cli::output::{output, table, truncate, CommandOutput};
use crate::domain::models::{Config, TaskType};
use crate::services::{HistoricalEvaluator, SearchReport, VariantMutator};

#[derive(Args, Debug)]
pub struct EvolveArgs {
    /// Agent whose variants seed the population
    #[arg(short, long)]
    pub agent: String,

    /// Task type the candidates are scored on
    #[arg(short, long)]
    pub task_type: String,

    /// Number of generations
    #[arg(short, long, default_value = "5")]
    pub generations: usize,

    /// Promote the winner if it beats the incumbent by the configured margin
    #[arg(long)]
    pub promote: bool,
}

#[derive(Debug, Serialize)]
pub struct EvolveOutput {
    pub report: SearchReport,
    pub promoted: Option<String>,
}

impl CommandOutput for EvolveOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let mut lines = vec![format!(
            "Searched {} generation(s) for {} on {}: {} candidate(s) evaluated",
            report.generations, report.agent_name, report.task_type, report.evaluated
        )];
        if let Some(incumbent) = &report.incumbent {
            lines.push(format!(
                "Incumbent: {} ({:.3})",
                incumbent.variant.variant_id, incumbent.fitness
            ));
        }

        let mut t = table(["Variant", "Origin", "Parents", "Fitness", "Trials"]);
        for c in &report.population {
            let parents: Vec<String> = c.variant.parents.iter().map(ToString::to_string).collect();
            t.add_row(vec![
                c.variant.variant_id.to_string(),
                c.variant.origin.as_str().to_string(),
                truncate(&parents.join(", "), 40),
                format!("{:.3}", c.fitness),
                c.trials.to_string(),
            ]);
        }
        lines.push(t.to_string());

        match &self.promoted {
            Some(id) => lines.push(format!("Promoted {id}")),
            None => lines.push("Nothing promoted".to_string()),
        }
        lines.join("\n")
    }
}

pub async fn execute(args: EvolveArgs, config: &Config, json_mode: bool) -> Result<()> {
    let coordinator = engine::open(config).await?;
    let evaluator = Arc::new(HistoricalEvaluator::new(
        Arc::clone(coordinator.store()),
        Arc::clone(coordinator.repository()),
    ));
    let mutator = VariantMutator::new(
        config.mutator.clone(),
        Arc::clone(coordinator.repository()),
        evaluator,
        coordinator.reward_calculator().clone(),
    );

    let report = mutator
        .evolutionary_search(&args.agent, &TaskType::new(&args.task_type), args.generations)
        .await
        .context("Evolutionary search failed")?;

    let mut promoted = None;
    if args.promote {
        if let Some(winner) = report.winner(config.mutator.promotion_margin) {
            mutator
                .promote(&winner.variant)
                .await
                .context("Failed to promote winner")?;
            promoted = Some(winner.variant.variant_id.to_string());
        }
    }

    output(&EvolveOutput { report, promoted }, json_mode);
    Ok(())
}
