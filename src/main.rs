// src/main.rs — rlm entry point

use clap::Parser;

use rlm::cli::{Cli, Commands};
use rlm::infra::config::Config;
use rlm::infra::logger;
use rlm::provider::resolver;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging (respects RUST_LOG)
    logger::init_logging(logger::level_for(cli.verbose, cli.quiet));

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns `false` when a run ended without an answer.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    match cli.command {
        Some(Commands::Models) => {
            rlm::cli::status::show_models(&resolver::discover_providers())?;
            Ok(true)
        }
        Some(Commands::Config) => {
            rlm::cli::status::show_config(&config, cli.config.as_deref())?;
            Ok(true)
        }
        None => rlm::cli::run::run_query(&cli, config).await,
    }
}
