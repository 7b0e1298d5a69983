//! Schema setup command.

use anyhow::{Context, Result};
use console::style;
use latchkey_core::pool::SessionPool;
use latchkey_infra::postgres::PostgresPool;
use latchkey_types::config::LatchkeyConfig;

use super::redact_url;

/// Apply migrations to the configured database.
pub async fn setup(config: &LatchkeyConfig, json: bool) -> Result<()> {
    let pool = PostgresPool::connect(&config.database_url, &config.pool)
        .await
        .with_context(|| format!("failed to connect to {}", redact_url(&config.database_url)))?;
    pool.run_migrations().await.context("failed to apply migrations")?;
    pool.close().await;

    if json {
        let out = serde_json::json!({
            "database": redact_url(&config.database_url),
            "migrated": true,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Checkpoint schema ready on {}",
        style("✓").green().bold(),
        style(redact_url(&config.database_url)).cyan()
    );
    println!();
    Ok(())
}
