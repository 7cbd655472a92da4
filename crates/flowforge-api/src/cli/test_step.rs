//! `test-step`: dry-run one node against live collaborators.

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub async fn handle_test_step(
    state: &AppState,
    file: &Path,
    node_id: &str,
    write: bool,
    json: bool,
) -> Result<()> {
    let mut session = state.open_session(file).await?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling dry run");
            on_ctrl_c.cancel();
        }
    });

    let result = session.test_step(node_id, &cancel).await;

    if write {
        state.save(file, &session.snapshot()).await?;
    }

    match result {
        Ok(output) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let step = session.step_labels().get(node_id).cloned().unwrap_or_else(|| "?".into());
                println!();
                println!(
                    "  {} Step {} '{}' passed",
                    style("✓").green(),
                    step,
                    style(node_id).cyan()
                );
                if let Some(status) = output.status_code {
                    println!("  HTTP {status}");
                }
                if let Some(branch) = output.branch_taken {
                    println!("  Branch: {}", branch.as_str());
                }
                println!();
                println!("{}", serde_json::to_string_pretty(&output.json)?);
                println!();
            }
            Ok(())
        }
        Err(err) => {
            let failed = err.failed_node().unwrap_or(node_id).to_string();
            if json {
                let out = serde_json::json!({
                    "error": err.user_message(),
                    "nodeId": failed,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!();
                println!("  {} {}", style("✗").red(), style(&failed).cyan());
                println!("  {}", err.user_message());
                println!();
            }
            bail!("Dry run of '{node_id}' failed: {err}")
        }
    }
}
