//! Health check command.

use anyhow::{Result, bail};
use console::style;
use latchkey_types::config::LatchkeyConfig;
use latchkey_types::health::HealthStatus;

use super::{connect, redact_url};

/// Probe the database through a lock manager and print the report.
///
/// Exits with an error when the report is unhealthy so the command can back
/// a container liveness check.
pub async fn health(config: &LatchkeyConfig, json: bool) -> Result<()> {
    let workflows = connect(config).await?;
    let report = workflows.health_check().await;
    workflows.close().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let status = match report.status {
            HealthStatus::Healthy => style("● healthy").green().bold(),
            HealthStatus::Degraded => style("● degraded").yellow().bold(),
            HealthStatus::Unhealthy => style("● unhealthy").red().bold(),
        };

        println!();
        println!("  {status}  {}", style(redact_url(&config.database_url)).dim());
        println!();

        println!("  {}", style("── Pool ──").dim());
        let pool = &report.metrics.pool;
        println!("  Size:     {} ({} idle)", style(pool.size).bold(), pool.idle);
        println!("  Bounds:   {}..={}", pool.min_connections, pool.max_connections);
        println!("  Timeout:  {} ms", report.metrics.acquire_timeout_ms);
        println!();

        if !report.issues.is_empty() {
            println!("  {}", style("── Issues ──").dim());
            for issue in &report.issues {
                println!("  {} {issue}", style("✗").red());
            }
            println!();
        }
        if !report.warnings.is_empty() {
            println!("  {}", style("── Warnings ──").dim());
            for warning in &report.warnings {
                println!("  {} {warning}", style("!").yellow());
            }
            println!();
        }
    }

    if !report.healthy {
        bail!("database is unhealthy");
    }
    Ok(())
}
