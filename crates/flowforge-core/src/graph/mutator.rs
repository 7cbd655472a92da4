//! Structural graph edits.
//!
//! The three operations here are the only way a graph changes shape. Each is
//! a pure function from `(&Graph, args)` to a brand-new `Graph`; on error the
//! input is untouched and nothing is partially applied.

use std::collections::HashSet;

use flowforge_types::error::GraphError;
use flowforge_types::graph::{Edge, Graph, Handle, Node};
use flowforge_types::node::NodeKind;

// ---------------------------------------------------------------------------
// Anchor
// ---------------------------------------------------------------------------

/// Where a new node attaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Upstream node. `None` only for the first node of an empty graph.
    pub source_id: Option<String>,
    pub source_handle: Handle,
    /// When set, the new node is spliced into the existing
    /// `source --handle--> target` edge.
    pub target_id: Option<String>,
}

impl Anchor {
    /// The first node of an empty graph.
    pub fn root() -> Self {
        Self {
            source_id: None,
            source_handle: Handle::Main,
            target_id: None,
        }
    }

    /// Append after `source` on `handle`.
    pub fn after(source: impl Into<String>, handle: Handle) -> Self {
        Self {
            source_id: Some(source.into()),
            source_handle: handle,
            target_id: None,
        }
    }

    /// Splice into the edge `source --handle--> target`.
    pub fn between(source: impl Into<String>, handle: Handle, target: impl Into<String>) -> Self {
        Self {
            source_id: Some(source.into()),
            source_handle: handle,
            target_id: Some(target.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Insert `node` at `anchor`.
///
/// Without a target, one edge `source --handle--> node` is added. With a
/// target, the single matching edge is replaced by `source --handle--> node`
/// and `node --main--> target` (a loop continues through `loopComplete`).
pub fn insert_node(graph: &Graph, node: Node, anchor: &Anchor) -> Result<Graph, GraphError> {
    let kind = node.kind();
    let continuation = continuation_handle(kind);
    if anchor.target_id.is_some() && continuation.is_none() {
        return Err(GraphError::InvalidHandle {
            kind,
            handle: Handle::Main,
        });
    }

    let mut next = graph.clone();
    let node_id = node.id.clone();
    attach(&mut next, node, anchor)?;

    if let Some(removed) = detach_anchor_edge(&mut next, anchor)? {
        let handle = continuation.unwrap_or(Handle::Main);
        let mut tail = Edge::new(
            unique_edge_id(&next, &node_id, handle, &removed.target_node_id),
            node_id.as_str(),
            handle,
            removed.target_node_id.as_str(),
        );
        tail.target_handle = removed.target_handle;
        next.edges.push(tail);
    }

    tracing::debug!(
        node_id = node_id.as_str(),
        edges = next.edges.len(),
        "node inserted"
    );
    Ok(next)
}

/// Insert an `if_condition` node together with its convergence `merge`.
///
/// Adds `anchor.source --handle--> if`, `if --true--> merge[branchA]`, and
/// `if --false--> merge[branchB]`. When the anchor names a target, the
/// spliced edge's target is re-attached as `merge --main--> target`.
pub fn insert_branch_node(
    graph: &Graph,
    if_node: Node,
    anchor: &Anchor,
) -> Result<Graph, GraphError> {
    if if_node.kind() != NodeKind::IfCondition {
        return Err(GraphError::NotABranchNode(if_node.kind()));
    }

    let mut next = graph.clone();
    let if_id = if_node.id.clone();
    attach(&mut next, if_node, anchor)?;
    let removed = detach_anchor_edge(&mut next, anchor)?;

    let merge_id = unique_node_id(&next, &format!("{if_id}-merge"));
    next.nodes.push(Node::new(merge_id.as_str(), NodeKind::Merge));

    for (handle, input) in [(Handle::True, Handle::BranchA), (Handle::False, Handle::BranchB)] {
        let id = unique_edge_id(&next, &if_id, handle, &merge_id);
        next.edges
            .push(Edge::new(id, if_id.as_str(), handle, merge_id.as_str()).with_target_handle(input));
    }

    if let Some(removed) = removed {
        let mut tail = Edge::new(
            unique_edge_id(&next, &merge_id, Handle::Main, &removed.target_node_id),
            merge_id.as_str(),
            Handle::Main,
            removed.target_node_id.as_str(),
        );
        tail.target_handle = removed.target_handle;
        next.edges.push(tail);
    }

    tracing::debug!(
        node_id = if_id.as_str(),
        merge_id = merge_id.as_str(),
        "branch scaffold inserted"
    );
    Ok(next)
}

/// Remove `node_id` and bridge over it.
///
/// For every (incoming, outgoing) pair one edge
/// `incoming.source --incoming.handle--> outgoing.target` is added, carrying
/// the incoming edge's kind and label and the outgoing edge's target handle.
pub fn delete_node(graph: &Graph, node_id: &str) -> Result<Graph, GraphError> {
    if !graph.contains_node(node_id) {
        return Err(GraphError::UnknownNode(node_id.to_string()));
    }

    let incoming: Vec<&Edge> = graph.incoming(node_id).collect();
    let outgoing: Vec<&Edge> = graph.outgoing(node_id).collect();

    let mut next = Graph {
        nodes: graph.nodes.iter().filter(|n| n.id != node_id).cloned().collect(),
        edges: graph
            .edges
            .iter()
            .filter(|e| e.source_node_id != node_id && e.target_node_id != node_id)
            .cloned()
            .collect(),
        settings: graph.settings.clone(),
    };

    for inc in &incoming {
        for out in &outgoing {
            let handle = inc.handle();
            let bridge = Edge {
                id: unique_edge_id(&next, &inc.source_node_id, handle, &out.target_node_id),
                source_node_id: inc.source_node_id.clone(),
                target_node_id: out.target_node_id.clone(),
                source_handle: inc.source_handle,
                target_handle: out.target_handle,
                kind: inc.kind,
                label: inc.label.clone(),
            };
            next.edges.push(bridge);
        }
    }

    tracing::debug!(
        node_id,
        reconnected = incoming.len() * outgoing.len(),
        "node deleted"
    );
    Ok(next)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Handle a node continues the main flow through when spliced before a target.
fn continuation_handle(kind: NodeKind) -> Option<Handle> {
    match kind {
        NodeKind::IfCondition => None,
        NodeKind::Loop => Some(Handle::LoopComplete),
        _ => Some(Handle::Main),
    }
}

/// Validate `anchor`, push `node`, and add the `source --handle--> node`
/// edge. The anchor edge (if any) is left in place for the caller.
fn attach(graph: &mut Graph, node: Node, anchor: &Anchor) -> Result<(), GraphError> {
    if graph.contains_node(&node.id) {
        return Err(GraphError::DuplicateNode(node.id));
    }

    let Some(source_id) = anchor.source_id.as_deref() else {
        if !graph.is_empty() {
            return Err(GraphError::SourceRequired);
        }
        graph.nodes.push(node);
        return Ok(());
    };

    let source = graph
        .node(source_id)
        .ok_or_else(|| GraphError::UnknownNode(source_id.to_string()))?;
    let handle = anchor.source_handle;
    if !Handle::sources_for(source.kind()).contains(&handle) {
        return Err(GraphError::InvalidHandle {
            kind: source.kind(),
            handle,
        });
    }

    match anchor.target_id.as_deref() {
        None => {
            if graph.edge_from(source_id, handle).is_some() {
                return Err(GraphError::HandleOccupied {
                    node_id: source_id.to_string(),
                    handle,
                });
            }
        }
        Some(target_id) => {
            if !graph.contains_node(target_id) {
                return Err(GraphError::UnknownNode(target_id.to_string()));
            }
            let count = anchor_edges(graph, source_id, handle, target_id).count();
            match count {
                1 => {}
                0 => {
                    return Err(GraphError::MissingAnchorEdge {
                        source_id: source_id.to_string(),
                        handle,
                        target_id: target_id.to_string(),
                    });
                }
                n => {
                    return Err(GraphError::AmbiguousAnchorEdge {
                        source_id: source_id.to_string(),
                        handle,
                        target_id: target_id.to_string(),
                        count: n,
                    });
                }
            }
        }
    }

    // Splicing keeps the replaced edge's kind and label.
    let inherited = anchor
        .target_id
        .as_deref()
        .and_then(|target_id| anchor_edges(graph, source_id, handle, target_id).next())
        .map(|e| (e.kind, e.label.clone()));

    let node_id = node.id.clone();
    graph.nodes.push(node);
    let mut head = Edge::new(
        unique_edge_id(graph, source_id, handle, &node_id),
        source_id,
        handle,
        node_id.as_str(),
    );
    if let Some((kind, label)) = inherited {
        head.kind = kind;
        head.label = label;
    }
    graph.edges.push(head);
    Ok(())
}

/// Remove and return the edge the anchor splices into, if it names a target.
fn detach_anchor_edge(graph: &mut Graph, anchor: &Anchor) -> Result<Option<Edge>, GraphError> {
    let (Some(source_id), Some(target_id)) =
        (anchor.source_id.as_deref(), anchor.target_id.as_deref())
    else {
        return Ok(None);
    };
    let pos = graph
        .edges
        .iter()
        .position(|e| {
            e.source_node_id == source_id
                && e.target_node_id == target_id
                && e.handle() == anchor.source_handle
        })
        .ok_or_else(|| GraphError::MissingAnchorEdge {
            source_id: source_id.to_string(),
            handle: anchor.source_handle,
            target_id: target_id.to_string(),
        })?;
    Ok(Some(graph.edges.remove(pos)))
}

fn anchor_edges<'a>(
    graph: &'a Graph,
    source_id: &'a str,
    handle: Handle,
    target_id: &'a str,
) -> impl Iterator<Item = &'a Edge> + 'a {
    graph
        .edges
        .iter()
        .filter(move |e| {
            e.source_node_id == source_id && e.target_node_id == target_id && e.handle() == handle
        })
}

/// `e-{source}-{handle}-{target}`, suffixed `-2`, `-3`, ... on collision.
fn unique_edge_id(graph: &Graph, source: &str, handle: Handle, target: &str) -> String {
    let base = format!("e-{source}-{handle}-{target}");
    let taken: HashSet<&str> = graph.edges.iter().map(|e| e.id.as_str()).collect();
    next_free(&base, |candidate| taken.contains(candidate))
}

fn unique_node_id(graph: &Graph, base: &str) -> String {
    let taken: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    next_free(base, |candidate| taken.contains(candidate))
}

fn next_free(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2u32..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
