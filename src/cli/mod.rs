//! Operator command-line interface.
//!
//! The CLI inspects and operates persisted engine state. It never triggers
//! agent invocations.

pub mod commands;
pub mod engine;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::evolve::EvolveArgs;
use commands::similarity::SimilarityArgs;
use commands::snapshot::SnapshotArgs;
use commands::variant::VariantArgs;

#[derive(Parser, Debug)]
#[command(name = "metis")]
#[command(about = "Metis - online variant selection and learning engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file; defaults to .metis/config.yaml with env overrides
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at the configured level instead of warnings only
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show policy, store and safety status
    Status,

    /// Dump learned values
    Snapshot(SnapshotArgs),

    /// Inspect and operate variants
    Variant(VariantArgs),

    /// Inspect and learn task-type similarity
    Similarity(SimilarityArgs),

    /// Run an offline evolutionary search
    Evolve(EvolveArgs),
}

/// Print an error in the requested format and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
