//! Checkpoint inspection commands: incomplete threads and thread history.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use latchkey_types::checkpoint::{Checkpoint, CheckpointDescriptor};
use latchkey_types::config::LatchkeyConfig;

use super::connect;

/// List threads that need resuming, newest first.
pub async fn incomplete(config: &LatchkeyConfig, limit: Option<usize>, json: bool) -> Result<()> {
    if limit == Some(0) {
        bail!("--limit must be at least 1");
    }

    let workflows = connect(config).await?;
    let store = workflows.store();
    let limit = limit.unwrap_or(store.max_results());
    let found = store.find_incomplete(limit).await;
    workflows.close().await;
    let descriptors: Vec<CheckpointDescriptor> =
        found?.iter().map(Checkpoint::descriptor).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    if descriptors.is_empty() {
        println!();
        println!("  {} No incomplete threads.", style("✓").green().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Thread").fg(Color::Cyan),
            Cell::new("Checkpoint"),
            Cell::new("Last Step"),
            Cell::new("Saved"),
        ]);

    for d in &descriptors {
        table.add_row(vec![
            Cell::new(&d.thread_id).fg(Color::Cyan),
            Cell::new(d.checkpoint_id),
            Cell::new(&d.namespace),
            Cell::new(format_relative_time(&d.created_at)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} incomplete thread(s)",
        style(descriptors.len()).bold()
    );
    println!();
    Ok(())
}

/// Print a thread's checkpoint chain, oldest first.
pub async fn history(config: &LatchkeyConfig, thread_id: &str, json: bool) -> Result<()> {
    let workflows = connect(config).await?;
    let chain = workflows.store().history(thread_id).await;
    workflows.close().await;
    let chain = chain?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chain)?);
        return Ok(());
    }

    if chain.is_empty() {
        println!();
        println!("  No checkpoints for thread '{thread_id}'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Parent"),
            Cell::new("Terminal"),
            Cell::new("Saved"),
        ]);

    for c in &chain {
        let terminal = if c.is_terminal {
            Cell::new("✓ done").fg(Color::Green)
        } else {
            Cell::new("…").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(c.checkpoint_id).fg(Color::Cyan),
            Cell::new(&c.namespace),
            Cell::new(
                c.parent_checkpoint_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
            ),
            terminal,
            Cell::new(c.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    println!();
    println!("  Thread {}", style(thread_id).cyan().bold());
    println!("{table}");
    println!();
    Ok(())
}

fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let secs = (Utc::now() - *dt).num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
