//! Workflow lock status command.

use anyhow::Result;
use console::style;
use latchkey_types::config::LatchkeyConfig;
use latchkey_types::lock::LockKey;

use super::connect;

/// Report whether any instance holds the lock for `workflow_id`.
pub async fn status(config: &LatchkeyConfig, workflow_id: &str, json: bool) -> Result<()> {
    let workflows = connect(config).await?;
    let held = workflows.manager().is_locked(workflow_id).await;
    workflows.close().await;
    let held = held?;
    let key = LockKey::from_identifier(workflow_id);

    if json {
        let out = serde_json::json!({
            "workflow_id": workflow_id,
            "lock_key": key.value(),
            "locked": held,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if held {
        println!(
            "  {} '{}' is running (lock held)",
            style("●").yellow().bold(),
            style(workflow_id).cyan()
        );
    } else {
        println!(
            "  {} '{}' is idle (lock free)",
            style("○").green().bold(),
            style(workflow_id).cyan()
        );
    }
    println!("  Lock key: {}", style(key.value()).dim());
    println!();
    Ok(())
}
