//! Read-mostly subcommands: labels, layout, validate, view, variables.

use std::path::Path;

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use flowforge_core::graph::dag::check_well_formed;
use flowforge_core::graph::layout::layout;
use flowforge_core::graph::numbering::{StepLabels, compute_step_labels};
use flowforge_core::graph::view::derive_view;
use flowforge_core::workflow::validation::validate_node;
use flowforge_core::workflow::variables::available_variables;
use flowforge_types::graph::Graph;

use crate::state::AppState;

fn table(header: Vec<Cell>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn label_of(labels: &StepLabels, id: &str) -> String {
    labels.get(id).cloned().unwrap_or_else(|| "?".to_string())
}

/// Nodes sorted by step label, unlabelled last.
fn by_label<'a>(graph: &'a Graph, labels: &StepLabels) -> Vec<&'a flowforge_types::graph::Node> {
    let mut nodes: Vec<_> = graph.nodes.iter().collect();
    nodes.sort_by_key(|n| match labels.get(&n.id) {
        Some(label) => (0, label_sort_key(label)),
        None => (1, Vec::new()),
    });
    nodes
}

/// `"2a"` -> `[2, 1]`, `"3.1"` -> `[3, 0, 1]`. Sorts labels in reading order.
fn label_sort_key(label: &str) -> Vec<u32> {
    let mut key = Vec::new();
    let mut digits = String::new();
    for c in label.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if !digits.is_empty() {
            key.push(digits.parse().unwrap_or(u32::MAX));
            digits.clear();
        }
        if c.is_ascii_lowercase() {
            key.push(c as u32 - 'a' as u32 + 1);
        } else {
            key.push(0);
        }
    }
    if !digits.is_empty() {
        key.push(digits.parse().unwrap_or(u32::MAX));
    }
    key
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

pub async fn handle_labels(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let graph = state.load(file).await?;
    let labels = compute_step_labels(&graph);

    if json {
        let out: std::collections::BTreeMap<_, _> = labels.iter().collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut t = table(vec![
        Cell::new("Step").fg(Color::Cyan),
        Cell::new("Node"),
        Cell::new("Label"),
        Cell::new("Type"),
        Cell::new("Status"),
    ]);
    for node in by_label(&graph, &labels) {
        t.add_row(vec![
            Cell::new(label_of(&labels, &node.id)),
            Cell::new(&node.id),
            Cell::new(&node.label),
            Cell::new(node.kind()),
            Cell::new(node.status),
        ]);
    }
    println!();
    println!("{t}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

pub async fn handle_layout(state: &AppState, file: &Path, write: bool, json: bool) -> Result<()> {
    let graph = state.load(file).await?;
    let laid_out = layout(&graph, &state.config.layout);

    if write {
        state.save(file, &laid_out).await?;
        tracing::info!(path = %file.display(), nodes = laid_out.nodes.len(), "layout written");
    }

    if json {
        let out: Vec<_> = laid_out
            .nodes
            .iter()
            .map(|n| serde_json::json!({ "id": n.id, "x": n.position.x, "y": n.position.y }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let labels = compute_step_labels(&laid_out);
    let mut t = table(vec![
        Cell::new("Step").fg(Color::Cyan),
        Cell::new("Node"),
        Cell::new("X"),
        Cell::new("Y"),
    ]);
    for node in by_label(&laid_out, &labels) {
        t.add_row(vec![
            Cell::new(label_of(&labels, &node.id)),
            Cell::new(&node.id),
            Cell::new(format!("{:.0}", node.position.x)),
            Cell::new(format!("{:.0}", node.position.y)),
        ]);
    }
    println!();
    println!("{t}");
    if write {
        println!("  {} Wrote {}", style("*").green().bold(), file.display());
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn handle_validate(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let graph = state.load(file).await?;
    let structure = check_well_formed(&graph);
    let issues: Vec<_> = graph
        .nodes
        .iter()
        .filter_map(|n| validate_node(n).err().map(|issue| (n, issue)))
        .collect();

    if json {
        let out = serde_json::json!({
            "wellFormed": structure.is_ok(),
            "structureError": structure.as_ref().err().map(|e| e.to_string()),
            "unconfigured": issues
                .iter()
                .map(|(n, issue)| serde_json::json!({
                    "nodeId": n.id,
                    "field": issue.field,
                    "message": issue.message,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        match &structure {
            Ok(()) => println!("  {} Graph structure is valid", style("✓").green()),
            Err(e) => println!("  {} {e}", style("✗").red()),
        }
        if issues.is_empty() {
            println!("  {} Every node is configured", style("✓").green());
        } else {
            let mut t = table(vec![
                Cell::new("Node").fg(Color::Yellow),
                Cell::new("Field"),
                Cell::new("Problem"),
            ]);
            for (node, issue) in &issues {
                t.add_row(vec![Cell::new(&node.id), Cell::new(issue.field), Cell::new(issue.message)]);
            }
            println!();
            println!("{t}");
        }
        println!();
    }

    if let Err(e) = structure {
        bail!("Graph is not well-formed: {e}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

pub async fn handle_view(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let graph = state.load(file).await?;
    let labels = compute_step_labels(&graph);
    let view = derive_view(&graph, &labels);

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let flag = |on: bool| if on { "●" } else { "○" };
    let mut t = table(vec![
        Cell::new("Step").fg(Color::Cyan),
        Cell::new("Node"),
        Cell::new("Type"),
        Cell::new("Terminal"),
        Cell::new("true/false"),
        Cell::new("body/complete"),
    ]);
    for nv in &view.nodes {
        t.add_row(vec![
            Cell::new(&nv.step_label),
            Cell::new(&nv.node.id),
            Cell::new(nv.node.kind()),
            Cell::new(if nv.is_terminal { "yes" } else { "" }),
            Cell::new(format!("{} {}", flag(nv.true_branch_connected), flag(nv.false_branch_connected))),
            Cell::new(format!("{} {}", flag(nv.loop_body_connected), flag(nv.loop_complete_connected))),
        ]);
    }
    println!();
    println!("{t}");

    let loop_backs: Vec<_> = view.edges.iter().filter(|e| e.loop_back).collect();
    if !loop_backs.is_empty() {
        println!();
        for e in loop_backs {
            println!(
                "  {} {} -> {}",
                style("↺").dim(),
                e.edge.source_node_id,
                e.edge.target_node_id
            );
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

pub async fn handle_variables(state: &AppState, file: &Path, node_id: &str, json: bool) -> Result<()> {
    let graph = state.load(file).await?;
    if !graph.contains_node(node_id) {
        bail!("Node '{node_id}' not found");
    }
    let groups = available_variables(&graph, node_id);

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    let mut t = table(vec![
        Cell::new("Source").fg(Color::Cyan),
        Cell::new("Expression"),
        Cell::new("Description"),
        Cell::new("Sample"),
    ]);
    for group in &groups {
        for var in &group.variables {
            t.add_row(vec![
                Cell::new(&group.node_label),
                Cell::new(&var.expression),
                Cell::new(&var.label),
                Cell::new(&var.sample_value).fg(Color::DarkGrey),
            ]);
        }
    }
    println!();
    println!("{t}");
    println!();
    Ok(())
}
