use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info};
use std::fs;

mod cli;

use binswap::config::{Config, REPLACEMENT_ENV, SupervisorConfig};
use binswap::supervisor::Supervisor;
use binswap::watcher::ReplacementWatcher;
use cli::Cli;

fn setup_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.is_verbose() {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level).parse_default_env();

    // Child output owns stdout, so status text goes to stderr or a file
    match &cli.log_file {
        Some(log_file) => {
            let target = Box::new(
                fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_file)
                    .context("Failed to open log file")?,
            );
            builder.target(env_logger::Target::Pipe(target));
        }
        None => {
            builder.target(env_logger::Target::Stderr);
        }
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    setup_logging(&cli).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let config = SupervisorConfig::resolve(
        cli.executable.clone(),
        cli.args.clone(),
        &config,
        std::env::var(REPLACEMENT_ENV).ok(),
    )
    .context("Invalid configuration")?;

    if cli.is_verbose() {
        eprintln!(
            "{} {} {}",
            "binswap".cyan().bold(),
            config.original_executable.display(),
            format!("(replacement: {})", config.replacement_path.display()).as_str().dimmed()
        );
    }

    // Capture the replacement baseline before the first launch
    let (swaps, _watcher) = ReplacementWatcher::from_config(&config).spawn();
    info!("Starting supervisor");

    match Supervisor::new(config, swaps).run().await {}
}
