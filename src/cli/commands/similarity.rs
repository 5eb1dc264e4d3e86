//! `metis similarity`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::engine;
use crate::cli::output::{output, table, CommandOutput};
use crate::domain::models::{Config, TaskSimilarityEntry, TaskType};

#[derive(Args, Debug)]
pub struct SimilarityArgs {
    #[command(subcommand)]
    pub command: SimilarityCommands,
}

#[derive(Subcommand, Debug)]
pub enum SimilarityCommands {
    /// Learn similarities from an agent's value correlations and persist them
    Learn {
        /// Agent whose learned values are compared across task types
        #[arg(short, long)]
        agent: String,
    },
    /// Show the effective similarity between two task types
    Show {
        task_a: String,
        task_b: String,
    },
    /// Override the similarity between two task types
    Set {
        task_a: String,
        task_b: String,
        /// Similarity in [0, 1]
        similarity: f64,
    },
}

#[derive(Debug, Serialize)]
pub struct SimilarityListOutput {
    pub entries: Vec<TaskSimilarityEntry>,
}

impl CommandOutput for SimilarityListOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No similarities learned; not enough shared, well-visited variants.".to_string();
        }
        let mut t = table(["Task A", "Task B", "Similarity"]);
        for e in &self.entries {
            t.add_row(vec![
                e.task_a.to_string(),
                e.task_b.to_string(),
                format!("{:.3}", e.similarity),
            ]);
        }
        t.to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct SimilarityOutput {
    pub task_a: String,
    pub task_b: String,
    pub similarity: f64,
}

impl CommandOutput for SimilarityOutput {
    fn to_human(&self) -> String {
        format!("{} ~ {}: {:.3}", self.task_a, self.task_b, self.similarity)
    }
}

pub async fn execute(args: SimilarityArgs, config: &Config, json_mode: bool) -> Result<()> {
    let coordinator = engine::open(config).await?;
    let transfer = coordinator.transfer();

    match args.command {
        SimilarityCommands::Learn { agent } => {
            let entries = transfer
                .learn_similarity(&agent)
                .await
                .context("Failed to learn similarities")?;
            output(&SimilarityListOutput { entries }, json_mode);
        }
        SimilarityCommands::Show { task_a, task_b } => {
            let similarity = transfer.similarity(&TaskType::new(&task_a), &TaskType::new(&task_b));
            output(
                &SimilarityOutput {
                    task_a,
                    task_b,
                    similarity,
                },
                json_mode,
            );
        }
        SimilarityCommands::Set {
            task_a,
            task_b,
            similarity,
        } => {
            if !(0.0..=1.0).contains(&similarity) {
                anyhow::bail!("Similarity must be within [0, 1], got {similarity}");
            }
            let entry = transfer
                .set_similarity(&TaskType::new(&task_a), &TaskType::new(&task_b), similarity)
                .await
                .context("Failed to store similarity")?;
            output(
                &SimilarityOutput {
                    task_a: entry.task_a.to_string(),
                    task_b: entry.task_b.to_string(),
                    similarity: entry.similarity,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
