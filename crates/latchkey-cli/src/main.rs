//! Latchkey operator CLI.
//!
//! Binary name: `latchkey`
//!
//! Loads configuration, connects to PostgreSQL, then dispatches to the
//! command handler.

mod cli;

use anyhow::Context;
use clap::Parser;
use latchkey_observe::tracing_setup::{LogFormat, init_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,latchkey_core=debug,latchkey_infra=debug",
        _ => "trace",
    };
    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Pretty };
    init_tracing(format, filter).context("failed to initialize logging")?;

    let config = cli::load(&cli).await?;
    let command = cli.command.name();
    tracing::debug!(
        command,
        database = %cli::redact_url(&config.database_url),
        "configuration loaded"
    );

    let result = match cli.command {
        Commands::Setup => cli::setup::setup(&config, cli.json).await,
        Commands::Health => cli::health::health(&config, cli.json).await,
        Commands::Incomplete { limit } => {
            cli::incomplete::incomplete(&config, limit, cli.json).await
        }
        Commands::History { thread_id } => {
            cli::incomplete::history(&config, &thread_id, cli.json).await
        }
        Commands::Status { workflow_id } => {
            cli::status::status(&config, &workflow_id, cli.json).await
        }
    };

    if let Err(e) = &result {
        tracing::error!(command, error = %e, "command failed");
    }
    result
}
