//! CLI command definitions for the `latchkey` binary.

pub mod health;
pub mod incomplete;
pub mod setup;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use latchkey_infra::Connected;
use latchkey_types::config::LatchkeyConfig;

/// Inspect and maintain Latchkey workflow locks and checkpoints.
#[derive(Parser)]
#[command(name = "latchkey", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file (default: $LATCHKEY_CONFIG or ./latchkey.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Override the database URL.
    #[arg(long, global = true, env = "LATCHKEY_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the checkpoint table (idempotent).
    Setup,

    /// Check database connectivity and pool health.
    Health,

    /// List threads whose latest checkpoint is not terminal.
    Incomplete {
        /// Maximum number of threads to list (capped by resume.max_results).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show every checkpoint of a thread.
    History {
        /// Thread identifier.
        thread_id: String,
    },

    /// Show whether a workflow lock is currently held.
    Status {
        /// Workflow identifier.
        workflow_id: String,
    },
}

impl Commands {
    /// Subcommand name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Setup => "setup",
            Commands::Health => "health",
            Commands::Incomplete { .. } => "incomplete",
            Commands::History { .. } => "history",
            Commands::Status { .. } => "status",
        }
    }
}

/// Load configuration for this invocation.
pub async fn load(cli: &Cli) -> Result<LatchkeyConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(latchkey_infra::config::default_config_path);
    let mut config = latchkey_infra::load_config(&path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))?;

    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
        latchkey_types::config::validate_database_url(&config.database_url)?;
    }

    // One-shot commands must not take over the process's signal handling.
    config.shutdown.install_signal_handlers = false;
    Ok(config)
}

/// Connect without touching the schema.
pub async fn connect(config: &LatchkeyConfig) -> Result<Connected> {
    latchkey_infra::connect(config, false)
        .await
        .context("failed to connect to the database")
}

/// Mask the password in a connection URL for display.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://app:secret@db:5432/jobs"),
            "postgres://app:****@db:5432/jobs"
        );
        assert_eq!(redact_url("postgres://db/jobs"), "postgres://db/jobs");
        assert_eq!(redact_url("not a url"), "not a url");
    }

    #[test]
    fn test_cli_parses_incomplete_limit() {
        let cli = Cli::try_parse_from(["latchkey", "--json", "incomplete", "--limit", "5"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Incomplete { limit: Some(5) }));
    }

    #[test]
    fn test_command_names_match_subcommands() {
        for (args, name) in [
            (vec!["latchkey", "setup"], "setup"),
            (vec!["latchkey", "health"], "health"),
            (vec!["latchkey", "incomplete"], "incomplete"),
            (vec!["latchkey", "history", "job-1"], "history"),
            (vec!["latchkey", "status", "daily_report"], "status"),
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            assert_eq!(cli.command.name(), name);
        }
    }

    #[test]
    fn test_cli_requires_workflow_id_for_status() {
        assert!(Cli::try_parse_from(["latchkey", "status"]).is_err());
    }
}
