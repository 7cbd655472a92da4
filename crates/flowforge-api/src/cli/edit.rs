//! Structural edits: insert, branch, delete, configure.
//!
//! Each command opens an editor session on the file, applies one mutation
//! (which re-runs layout), and writes the graph back.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use console::style;

use flowforge_core::graph::mutator::Anchor;
use flowforge_types::graph::Node;
use flowforge_types::node::{NodeConfig, NodeKind};

use super::AnchorArgs;
use crate::state::AppState;

/// Arguments shared by `insert` and `branch`.
pub struct NewNode {
    pub kind: NodeKind,
    pub id: Option<String>,
    pub label: Option<String>,
    pub config: Option<String>,
}

impl AnchorArgs {
    fn to_anchor(&self) -> Result<Anchor> {
        match (&self.after, &self.before) {
            (None, None) => Ok(Anchor::root()),
            (Some(after), None) => Ok(Anchor::after(after, self.handle)),
            (Some(after), Some(before)) => Ok(Anchor::between(after, self.handle, before)),
            (None, Some(_)) => Err(anyhow!("--before requires --after")),
        }
    }
}

/// `<type>-<8 hex chars>`.
fn generate_id(kind: NodeKind) -> String {
    let raw = uuid::Uuid::now_v7().simple().to_string();
    format!("{}-{}", kind.as_str().replace('_', "-"), &raw[raw.len() - 8..])
}

/// Parse `raw` as the config body for `kind`.
pub fn parse_config(kind: NodeKind, raw: &str) -> Result<NodeConfig> {
    let body: serde_json::Value = serde_json::from_str(raw).context("Config is not valid JSON")?;
    serde_json::from_value(serde_json::json!({ "type": kind.as_str(), "config": body }))
        .with_context(|| format!("Config does not match node type '{kind}'"))
}

fn build_node(spec: NewNode) -> Result<Node> {
    let id = spec.id.unwrap_or_else(|| generate_id(spec.kind));
    let mut node = match spec.config {
        Some(raw) => Node::with_config(id, parse_config(spec.kind, &raw)?),
        None => Node::new(id, spec.kind),
    };
    if let Some(label) = spec.label {
        node.label = label;
    }
    Ok(node)
}

fn print_done(json: bool, out: serde_json::Value, message: String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  {} {message}", style("*").green().bold());
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Insert / branch
// ---------------------------------------------------------------------------

pub async fn handle_insert(
    state: &AppState,
    file: &Path,
    spec: NewNode,
    anchor: &AnchorArgs,
    json: bool,
) -> Result<()> {
    let mut session = state.open_session(file).await?;
    let node = build_node(spec)?;
    let id = node.id.clone();

    session
        .insert_node(node, &anchor.to_anchor()?)
        .with_context(|| format!("Failed to insert '{id}'"))?;
    let graph = session.snapshot();
    state.save(file, &graph).await?;

    let status = graph.node(&id).map(|n| n.status.as_str()).unwrap_or("unknown");
    let step = session.step_labels().get(&id).cloned();
    print_done(
        json,
        serde_json::json!({ "id": id, "status": status, "step": step }),
        format!("Inserted '{}' ({status})", style(&id).cyan()),
    )
}

pub async fn handle_branch(
    state: &AppState,
    file: &Path,
    id: Option<String>,
    label: Option<String>,
    anchor: &AnchorArgs,
    json: bool,
) -> Result<()> {
    let mut session = state.open_session(file).await?;
    let node = build_node(NewNode {
        kind: NodeKind::IfCondition,
        id,
        label,
        config: None,
    })?;
    let if_id = node.id.clone();

    let merge_id = session
        .insert_branch_node(node, &anchor.to_anchor()?)
        .with_context(|| format!("Failed to insert branch '{if_id}'"))?;
    state.save(file, &session.snapshot()).await?;

    print_done(
        json,
        serde_json::json!({ "id": if_id, "mergeId": merge_id }),
        format!(
            "Inserted condition '{}' with merge '{}'",
            style(&if_id).cyan(),
            style(&merge_id).cyan()
        ),
    )
}

// ---------------------------------------------------------------------------
// Delete / configure
// ---------------------------------------------------------------------------

pub async fn handle_delete(state: &AppState, file: &Path, node_id: &str, json: bool) -> Result<()> {
    let mut session = state.open_session(file).await?;
    session
        .delete_node(node_id)
        .with_context(|| format!("Failed to delete '{node_id}'"))?;
    let graph = session.snapshot();
    state.save(file, &graph).await?;

    print_done(
        json,
        serde_json::json!({ "deleted": node_id, "edges": graph.edges.len() }),
        format!("Deleted '{}'", style(node_id).cyan()),
    )
}

pub async fn handle_configure(
    state: &AppState,
    file: &Path,
    node_id: &str,
    raw: &str,
    json: bool,
) -> Result<()> {
    let mut session = state.open_session(file).await?;
    let kind = session
        .snapshot()
        .node(node_id)
        .map(Node::kind)
        .ok_or_else(|| anyhow!("Node '{node_id}' not found"))?;
    let config = parse_config(kind, raw)?;

    let status = session.update_node_config(node_id, config)?;
    state.save(file, &session.snapshot()).await?;

    print_done(
        json,
        serde_json::json!({ "id": node_id, "status": status }),
        format!("Updated '{}' ({status})", style(node_id).cyan()),
    )
}
