//! Structural checks over the workflow graph.
//!
//! Uses `petgraph` to detect cycles; the remaining invariants (unique ids,
//! edges referencing existing nodes, per-type handle cardinality) are checked
//! directly against the node and edge lists.

use std::collections::{HashMap, HashSet};

use flowforge_types::error::GraphError;
use flowforge_types::graph::{Graph, Handle};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

// ---------------------------------------------------------------------------
// Well-formedness
// ---------------------------------------------------------------------------

/// Whether `graph` satisfies every structural invariant.
pub fn is_well_formed(graph: &Graph) -> bool {
    check_well_formed(graph).is_ok()
}

/// Check structural invariants, reporting the first violation found.
///
/// 1. Node ids and edge ids are unique.
/// 2. Every edge references existing nodes.
/// 3. Every source handle is legal for its node type, and each handle has at
///    most one outgoing edge.
/// 4. Target handles, when set, are merge inputs.
/// 5. Stored edges form a DAG.
pub fn check_well_formed(graph: &Graph) -> Result<(), GraphError> {
    let mut kinds = HashMap::new();
    for node in &graph.nodes {
        if kinds.insert(node.id.as_str(), node.kind()).is_some() {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
    }

    let mut edge_ids = HashSet::new();
    let mut used_handles: HashSet<(&str, Handle)> = HashSet::new();
    for edge in &graph.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            return Err(GraphError::DuplicateEdge(edge.id.clone()));
        }
        for endpoint in [&edge.source_node_id, &edge.target_node_id] {
            if !kinds.contains_key(endpoint.as_str()) {
                return Err(GraphError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }

        let kind = kinds[edge.source_node_id.as_str()];
        let handle = edge.handle();
        if !Handle::sources_for(kind).contains(&handle) {
            return Err(GraphError::InvalidHandle { kind, handle });
        }
        if !used_handles.insert((edge.source_node_id.as_str(), handle)) {
            return Err(GraphError::HandleOccupied {
                node_id: edge.source_node_id.clone(),
                handle,
            });
        }

        if let Some(target_handle) = edge.target_handle
            && !matches!(target_handle, Handle::BranchA | Handle::BranchB)
        {
            return Err(GraphError::InvalidTargetHandle {
                edge_id: edge.id.clone(),
                handle: target_handle,
            });
        }
    }

    topological_order(graph).map(|_| ())
}

// ---------------------------------------------------------------------------
// Topological order
// ---------------------------------------------------------------------------

/// Node ids in a topological order over all stored edges.
///
/// Edges referencing unknown nodes are ignored here; `check_well_formed`
/// reports them.
pub fn topological_order(graph: &Graph) -> Result<Vec<&str>, GraphError> {
    let (dag, _) = build_digraph(graph);
    let sorted = toposort(&dag, None).map_err(|cycle| {
        GraphError::CycleDetected(dag[cycle.node_id()].to_string())
    })?;
    Ok(sorted.into_iter().map(|idx| dag[idx]).collect())
}

/// Build a `DiGraph` of node ids with one edge per stored edge.
pub(crate) fn build_digraph(graph: &Graph) -> (DiGraph<&str, ()>, HashMap<&str, NodeIndex>) {
    let mut dag = DiGraph::<&str, ()>::new();
    let index: HashMap<&str, NodeIndex> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), dag.add_node(n.id.as_str())))
        .collect();
    for edge in &graph.edges {
        if let (Some(&from), Some(&to)) = (
            index.get(edge.source_node_id.as_str()),
            index.get(edge.target_node_id.as_str()),
        ) {
            dag.add_edge(from, to, ());
        }
    }
    (dag, index)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_types::graph::{Edge, Node};
    use flowforge_types::node::NodeKind;

    fn node(id: &str, kind: NodeKind) -> Node {
        Node::new(id, kind)
    }

    fn linear() -> Graph {
        let mut g = Graph::new();
        g.nodes = vec![
            node("a", NodeKind::ManualTrigger),
            node("b", NodeKind::HttpRequest),
            node("c", NodeKind::SetTransform),
        ];
        g.edges = vec![
            Edge::new("e1", "a", Handle::Main, "b"),
            Edge::new("e2", "b", Handle::Main, "c"),
        ];
        g
    }

    #[test]
    fn test_empty_graph_is_well_formed() {
        assert!(is_well_formed(&Graph::new()));
    }

    #[test]
    fn test_linear_graph_is_well_formed() {
        assert!(is_well_formed(&linear()));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut g = linear();
        g.nodes.push(node("a", NodeKind::Wait));
        assert_eq!(
            check_well_formed(&g),
            Err(GraphError::DuplicateNode("a".to_string()))
        );
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut g = linear();
        g.edges.push(Edge::new("e3", "c", Handle::Main, "ghost"));
        assert!(matches!(
            check_well_formed(&g),
            Err(GraphError::DanglingEdge { .. })
        ));
    }

    #[test]
    fn test_second_main_edge_rejected() {
        let mut g = linear();
        g.edges.push(Edge::new("e3", "a", Handle::Main, "c"));
        assert_eq!(
            check_well_formed(&g),
            Err(GraphError::HandleOccupied {
                node_id: "a".to_string(),
                handle: Handle::Main
            })
        );
    }

    #[test]
    fn test_branch_handle_on_plain_node_rejected() {
        let mut g = linear();
        g.edges.push(Edge::new("e3", "c", Handle::True, "a"));
        assert!(matches!(
            check_well_formed(&g),
            Err(GraphError::InvalidHandle { kind: NodeKind::SetTransform, handle: Handle::True })
        ));
    }

    #[test]
    fn test_if_node_needs_branch_handles() {
        let mut g = Graph::new();
        g.nodes = vec![
            node("if", NodeKind::IfCondition),
            node("t", NodeKind::Wait),
            node("f", NodeKind::Wait),
        ];
        g.edges = vec![
            Edge::new("e1", "if", Handle::True, "t"),
            Edge::new("e2", "if", Handle::False, "f"),
        ];
        assert!(is_well_formed(&g));

        g.edges.push(Edge::new("e3", "if", Handle::Main, "t"));
        assert!(!is_well_formed(&g));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut g = linear();
        g.edges.push(Edge::new("e3", "c", Handle::Main, "a"));
        // c already has no main edge, so the only violation is the cycle.
        assert!(matches!(check_well_formed(&g), Err(GraphError::CycleDetected(_))));
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let g = linear();
        let order = topological_order(&g).unwrap();
        let pos = |id: &str| order.iter().position(|x| *x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }
}
