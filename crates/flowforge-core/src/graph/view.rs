//! Render-ready view of a graph.
//!
//! Derived data only; nothing here is ever written back into the `Graph`.

use std::collections::HashSet;

use flowforge_types::graph::{Edge, EdgeKind, Graph, Handle, Node};
use serde::Serialize;

use super::numbering::StepLabels;

/// Per-node view data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    /// `"?"` for nodes the numbering did not reach.
    pub step_label: String,
    /// No outgoing edge at all.
    pub is_terminal: bool,
    pub true_branch_connected: bool,
    pub false_branch_connected: bool,
    pub loop_body_connected: bool,
    pub loop_complete_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeView {
    #[serde(flatten)]
    pub edge: Edge,
    /// Synthetic loop-back edge, not part of the stored graph.
    pub loop_back: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphView {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
}

/// Build the view: labelled nodes with connection flags, the stored edges,
/// and one `loopback-<loopId>` edge per loop with a body.
pub fn derive_view(graph: &Graph, labels: &StepLabels) -> GraphView {
    let connected = |id: &str, handle: Handle| graph.edge_from(id, handle).is_some();

    let nodes = graph
        .nodes
        .iter()
        .map(|n| NodeView {
            node: n.clone(),
            step_label: labels.get(&n.id).cloned().unwrap_or_else(|| "?".to_string()),
            is_terminal: graph.outgoing(&n.id).next().is_none(),
            true_branch_connected: connected(&n.id, Handle::True),
            false_branch_connected: connected(&n.id, Handle::False),
            loop_body_connected: connected(&n.id, Handle::LoopBody),
            loop_complete_connected: connected(&n.id, Handle::LoopComplete),
        })
        .collect();

    let mut edges: Vec<EdgeView> = graph
        .edges
        .iter()
        .map(|e| EdgeView {
            edge: e.clone(),
            loop_back: false,
        })
        .collect();
    edges.extend(loop_back_edges(graph).into_iter().map(|edge| EdgeView {
        edge,
        loop_back: true,
    }));

    GraphView { nodes, edges }
}

/// One derived edge per loop node with a body: from the end of the body's
/// main chain back to the loop.
pub fn loop_back_edges(graph: &Graph) -> Vec<Edge> {
    graph
        .nodes
        .iter()
        .filter(|n| n.kind() == flowforge_types::node::NodeKind::Loop)
        .filter_map(|loop_node| {
            let body = graph.edge_from(&loop_node.id, Handle::LoopBody)?;
            let terminal = body_terminal(graph, &body.target_node_id);
            Some(Edge {
                id: format!("loopback-{}", loop_node.id),
                source_node_id: terminal.to_string(),
                target_node_id: loop_node.id.clone(),
                source_handle: None,
                target_handle: None,
                kind: EdgeKind::Loop,
                label: None,
            })
        })
        .collect()
}

/// Follow `main` edges from `start` until a node has none.
fn body_terminal<'a>(graph: &'a Graph, start: &'a str) -> &'a str {
    let mut current = start;
    let mut seen = HashSet::from([start]);
    while let Some(next) = graph.edge_from(current, Handle::Main) {
        if !seen.insert(next.target_node_id.as_str()) {
            break;
        }
        current = &next.target_node_id;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::numbering::compute_step_labels;
    use flowforge_types::node::NodeKind;

    fn loop_graph() -> Graph {
        let mut g = Graph::new();
        g.nodes = vec![
            Node::new("t", NodeKind::ManualTrigger),
            Node::new("loop", NodeKind::Loop),
            Node::new("b1", NodeKind::HttpRequest),
            Node::new("b2", NodeKind::SetTransform),
            Node::new("after", NodeKind::Wait),
            Node::new("orphan", NodeKind::Code),
        ];
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "loop"),
            Edge::new("e2", "loop", Handle::LoopBody, "b1"),
            Edge::new("e3", "b1", Handle::Main, "b2"),
            Edge::new("e4", "loop", Handle::LoopComplete, "after"),
        ];
        g
    }

    #[test]
    fn test_loop_back_from_body_terminal() {
        let g = loop_graph();
        let back = loop_back_edges(&g);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id, "loopback-loop");
        assert_eq!(back[0].source_node_id, "b2");
        assert_eq!(back[0].target_node_id, "loop");
    }

    #[test]
    fn test_view_flags_and_labels() {
        let g = loop_graph();
        let mut labels = compute_step_labels(&g);
        labels.remove("orphan");
        let view = derive_view(&g, &labels);

        let lv = view.nodes.iter().find(|n| n.node.id == "loop").unwrap();
        assert!(lv.loop_body_connected);
        assert!(lv.loop_complete_connected);
        assert!(!lv.true_branch_connected);
        assert!(!lv.is_terminal);

        let orphan = view.nodes.iter().find(|n| n.node.id == "orphan").unwrap();
        assert_eq!(orphan.step_label, "?");
        assert!(orphan.is_terminal);

        assert_eq!(view.edges.len(), g.edges.len() + 1);
        assert!(view.edges.last().unwrap().loop_back);
    }

    #[test]
    fn test_view_does_not_touch_graph() {
        let g = loop_graph();
        let before = g.clone();
        let _ = derive_view(&g, &compute_step_labels(&g));
        assert_eq!(g, before);
    }
}
