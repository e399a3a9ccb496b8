// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::AppContext;
use std::process::ExitCode;
use wadsmith::config::Config;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level())),
        )
        .init();

    let config = Config::discover(cli.config.as_deref())?;
    let ctx = AppContext::new(config, cli.catalog);

    match cli.command {
        Commands::Lookup { id, filename } => commands::cmd_lookup(&ctx, &id, filename)?,
        Commands::Verify { file, id } => commands::cmd_verify(&ctx, &file, &id).await?,
        Commands::Maps { variant } => commands::cmd_maps(&ctx, variant.as_deref())?,
        Commands::Fetch {
            ids,
            max_concurrent,
            retry,
            json,
        } => {
            if !commands::cmd_fetch(&ctx, &ids, max_concurrent, retry, json).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
