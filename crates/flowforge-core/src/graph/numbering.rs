//! Topological step numbering.
//!
//! Every reachable node gets a human-facing label: plain integers along the
//! main flow, `{N}a` / `{N}b` for the first node of an `if_condition`'s true
//! and false branches, and `{N}.{k}` for loop body entries.

use std::collections::{HashMap, VecDeque};

use flowforge_types::graph::{Graph, Handle};

/// Node id -> step label.
pub type StepLabels = HashMap<String, String>;

/// Compute step labels with Kahn's algorithm.
///
/// Every stored edge drives ordering and in-degree, so nodes after a loop's
/// `loopComplete` exit are numbered after the loop. Only `true`, `false`, and
/// `loopBody` edges pre-assign derived labels. A label, once set, is never
/// overwritten.
pub fn compute_step_labels(graph: &Graph) -> StepLabels {
    let mut labels = StepLabels::new();
    if graph.nodes.is_empty() {
        return labels;
    }

    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<(Handle, &str)>> = HashMap::new();
    for edge in &graph.edges {
        let (src, dst) = (edge.source_node_id.as_str(), edge.target_node_id.as_str());
        if !in_degree.contains_key(src) || !in_degree.contains_key(dst) {
            continue;
        }
        adjacency.entry(src).or_default().push((edge.handle(), dst));
        if let Some(d) = in_degree.get_mut(dst) {
            *d += 1;
        }
    }

    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();
    let mut counter = 1u32;

    while let Some(current) = queue.pop_front() {
        let parent = labels
            .entry(current.to_string())
            .or_insert_with(|| {
                let label = counter.to_string();
                counter += 1;
                label
            })
            .clone();

        let successors = adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]);

        let mut body_counter = 1u32;
        for (handle, target) in successors {
            let derived = match handle {
                Handle::True => format!("{parent}a"),
                Handle::False => format!("{parent}b"),
                Handle::LoopBody => {
                    let label = format!("{parent}.{body_counter}");
                    body_counter += 1;
                    label
                }
                _ => continue,
            };
            labels.entry((*target).to_string()).or_insert(derived);
        }

        for (_, target) in successors {
            if let Some(d) = in_degree.get_mut(target) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(*target);
                }
            }
        }
    }

    labels
}

/// The integer step number of a plain label (`"3"` -> 3). Derived labels
/// such as `"2a"` or `"3.1"` have none.
pub fn step_number(label: &str) -> Option<u32> {
    if label.is_empty() || !label.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    label.parse().ok()
}

/// Leading numeric prefix of any label (`"2a"` -> 2, `"3.1"` -> 3).
pub fn numeric_prefix(label: &str) -> Option<u32> {
    let end = label
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(label.len());
    label[..end].parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_types::graph::{Edge, Node};
    use flowforge_types::node::NodeKind;

    fn graph(nodes: &[(&str, NodeKind)], edges: &[(&str, Handle, &str)]) -> Graph {
        let mut g = Graph::new();
        g.nodes = nodes.iter().map(|(id, k)| Node::new(*id, *k)).collect();
        g.edges = edges
            .iter()
            .enumerate()
            .map(|(i, (s, h, t))| Edge::new(format!("e{i}"), *s, *h, *t))
            .collect();
        g
    }

    fn label<'a>(labels: &'a StepLabels, id: &str) -> &'a str {
        labels.get(id).map(String::as_str).unwrap_or("<none>")
    }

    #[test]
    fn test_empty_graph_has_no_labels() {
        assert!(compute_step_labels(&Graph::new()).is_empty());
    }

    #[test]
    fn test_linear_chain() {
        let g = graph(
            &[
                ("A", NodeKind::ManualTrigger),
                ("B", NodeKind::HttpRequest),
                ("C", NodeKind::SetTransform),
            ],
            &[("A", Handle::Main, "B"), ("B", Handle::Main, "C")],
        );
        let labels = compute_step_labels(&g);
        assert_eq!(label(&labels, "A"), "1");
        assert_eq!(label(&labels, "B"), "2");
        assert_eq!(label(&labels, "C"), "3");
    }

    #[test]
    fn test_if_branches_and_merge() {
        let g = graph(
            &[
                ("trigger", NodeKind::ManualTrigger),
                ("if", NodeKind::IfCondition),
                ("trueN", NodeKind::SetTransform),
                ("falseN", NodeKind::SetTransform),
                ("merge", NodeKind::Merge),
            ],
            &[
                ("trigger", Handle::Main, "if"),
                ("if", Handle::True, "trueN"),
                ("if", Handle::False, "falseN"),
                ("trueN", Handle::Main, "merge"),
                ("falseN", Handle::Main, "merge"),
            ],
        );
        let labels = compute_step_labels(&g);
        assert_eq!(label(&labels, "trigger"), "1");
        assert_eq!(label(&labels, "if"), "2");
        assert_eq!(label(&labels, "trueN"), "2a");
        assert_eq!(label(&labels, "falseN"), "2b");
        assert_eq!(label(&labels, "merge"), "3");
    }

    #[test]
    fn test_false_edge_stored_first_still_labels_b() {
        let g = graph(
            &[
                ("t", NodeKind::ManualTrigger),
                ("if", NodeKind::IfCondition),
                ("x", NodeKind::Wait),
                ("y", NodeKind::Wait),
            ],
            &[
                ("t", Handle::Main, "if"),
                ("if", Handle::False, "y"),
                ("if", Handle::True, "x"),
            ],
        );
        let labels = compute_step_labels(&g);
        assert_eq!(label(&labels, "x"), "2a");
        assert_eq!(label(&labels, "y"), "2b");
    }

    #[test]
    fn test_loop_body_and_exit() {
        let g = graph(
            &[
                ("t", NodeKind::ManualTrigger),
                ("loop", NodeKind::Loop),
                ("body", NodeKind::HttpRequest),
                ("after", NodeKind::SetTransform),
            ],
            &[
                ("t", Handle::Main, "loop"),
                ("loop", Handle::LoopBody, "body"),
                ("loop", Handle::LoopComplete, "after"),
            ],
        );
        let labels = compute_step_labels(&g);
        assert_eq!(label(&labels, "loop"), "2");
        assert_eq!(label(&labels, "body"), "2.1");
        assert_eq!(label(&labels, "after"), "3");
    }

    #[test]
    fn test_chained_body_continues_numbering() {
        let g = graph(
            &[
                ("t", NodeKind::ManualTrigger),
                ("loop", NodeKind::Loop),
                ("b1", NodeKind::HttpRequest),
                ("b2", NodeKind::SetTransform),
            ],
            &[
                ("t", Handle::Main, "loop"),
                ("loop", Handle::LoopBody, "b1"),
                ("b1", Handle::Main, "b2"),
            ],
        );
        let labels = compute_step_labels(&g);
        assert_eq!(label(&labels, "b1"), "2.1");
        assert_eq!(label(&labels, "b2"), "3");
    }

    #[test]
    fn test_successor_prefix_never_decreases() {
        let g = graph(
            &[
                ("t", NodeKind::ManualTrigger),
                ("if", NodeKind::IfCondition),
                ("a", NodeKind::HttpRequest),
                ("a2", NodeKind::Code),
                ("b", NodeKind::Wait),
                ("m", NodeKind::Merge),
                ("z", NodeKind::SetTransform),
            ],
            &[
                ("t", Handle::Main, "if"),
                ("if", Handle::True, "a"),
                ("a", Handle::Main, "a2"),
                ("if", Handle::False, "b"),
                ("a2", Handle::Main, "m"),
                ("b", Handle::Main, "m"),
                ("m", Handle::Main, "z"),
            ],
        );
        let labels = compute_step_labels(&g);
        assert_eq!(labels.len(), g.nodes.len());
        let mut seen: Vec<&String> = labels.values().collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), g.nodes.len(), "labels must be unique");
        for e in &g.edges {
            let u = numeric_prefix(&labels[&e.source_node_id]).unwrap();
            let v = numeric_prefix(&labels[&e.target_node_id]).unwrap();
            assert!(v >= u, "{} -> {}", e.source_node_id, e.target_node_id);
        }
    }

    #[test]
    fn test_disconnected_roots_follow_insertion_order() {
        let g = graph(
            &[("x", NodeKind::ManualTrigger), ("y", NodeKind::Wait)],
            &[],
        );
        let labels = compute_step_labels(&g);
        assert_eq!(label(&labels, "x"), "1");
        assert_eq!(label(&labels, "y"), "2");
    }

    #[test]
    fn test_step_number_parsing() {
        assert_eq!(step_number("12"), Some(12));
        assert_eq!(step_number("2a"), None);
        assert_eq!(step_number("3.1"), None);
        assert_eq!(numeric_prefix("2a"), Some(2));
        assert_eq!(numeric_prefix("3.1"), Some(3));
        assert_eq!(numeric_prefix("?"), None);
    }
}
