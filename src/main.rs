//! Metis CLI entry point.

use clap::Parser;

use metis::cli::{commands, engine, handle_error, Cli, Commands};
use metis::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match engine::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    if !cli.verbose {
        config.logging.level = "warn".to_string();
    }

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Status => commands::status::execute(&config, cli.json).await,
        Commands::Snapshot(args) => commands::snapshot::execute(args, &config, cli.json).await,
        Commands::Variant(args) => commands::variant::execute(args, &config, cli.json).await,
        Commands::Similarity(args) => commands::similarity::execute(args, &config, cli.json).await,
        Commands::Evolve(args) => commands::evolve::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
