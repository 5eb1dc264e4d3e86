//! `metis variant`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::engine;
use crate::cli::output::{output, table, truncate, CommandOutput};
use crate::domain::models::{Config, Variant, VariantId};

#[derive(Args, Debug)]
pub struct VariantArgs {
    #[command(subcommand)]
    pub command: VariantCommands,
}

#[derive(Subcommand, Debug)]
pub enum VariantCommands {
    /// List variants
    List {
        /// Only show this agent's variants
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Return a quarantined variant to service
    Reinstate {
        /// Agent name
        agent: String,
        /// Variant id
        variant: String,
    },
    /// Retire a variant permanently; its history is kept
    Retire {
        /// Agent name
        agent: String,
        /// Variant id
        variant: String,
    },
}

#[derive(Debug, Serialize)]
pub struct VariantOutput {
    pub agent_name: String,
    pub variant_id: String,
    pub status: String,
    pub origin: String,
    pub parents: Vec<String>,
    pub samples: u64,
    pub mean_reward: f64,
}

impl From<&Variant> for VariantOutput {
    fn from(variant: &Variant) -> Self {
        Self {
            agent_name: variant.agent_name.clone(),
            variant_id: variant.variant_id.to_string(),
            status: variant.status.as_str().to_string(),
            origin: variant.origin.as_str().to_string(),
            parents: variant.parents.iter().map(ToString::to_string).collect(),
            samples: variant.performance.sample_count,
            mean_reward: variant.performance.overall_mean_reward,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VariantListOutput {
    pub variants: Vec<VariantOutput>,
    pub total: usize,
}

impl CommandOutput for VariantListOutput {
    fn to_human(&self) -> String {
        if self.variants.is_empty() {
            return "No variants found.".to_string();
        }
        let mut t = table(["Agent", "Variant", "Status", "Origin", "Parents", "Samples", "Mean reward"]);
        for v in &self.variants {
            t.add_row(vec![
                v.agent_name.clone(),
                v.variant_id.clone(),
                v.status.clone(),
                v.origin.clone(),
                truncate(&v.parents.join(", "), 40),
                v.samples.to_string(),
                format!("{:.3}", v.mean_reward),
            ]);
        }
        format!("Found {} variant(s):\n{t}", self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct VariantActionOutput {
    pub success: bool,
    pub message: String,
}

impl CommandOutput for VariantActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

pub async fn execute(args: VariantArgs, config: &Config, json_mode: bool) -> Result<()> {
    let coordinator = engine::open(config).await?;

    match args.command {
        VariantCommands::List { agent } => {
            let variants: Vec<VariantOutput> = coordinator
                .repository()
                .list(agent.as_deref())
                .await
                .iter()
                .map(VariantOutput::from)
                .collect();
            let result = VariantListOutput {
                total: variants.len(),
                variants,
            };
            output(&result, json_mode);
        }
        VariantCommands::Reinstate { agent, variant } => {
            let variant_id = VariantId::from(variant);
            coordinator
                .reinstate(&agent, &variant_id)
                .await
                .with_context(|| format!("Failed to reinstate {agent}/{variant_id}"))?;
            output(
                &VariantActionOutput {
                    success: true,
                    message: format!("Variant {agent}/{variant_id} reinstated"),
                },
                json_mode,
            );
        }
        VariantCommands::Retire { agent, variant } => {
            let variant_id = VariantId::from(variant);
            coordinator
                .retire(&agent, &variant_id)
                .await
                .with_context(|| format!("Failed to retire {agent}/{variant_id}"))?;
            output(
                &VariantActionOutput {
                    success: true,
                    message: format!("Variant {agent}/{variant_id} retired"),
                },
                json_mode,
            );
        }
    }
    Ok(())
}
