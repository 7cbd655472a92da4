//! Catalog of expressions a node may reference, grouped by source.

use std::collections::{HashSet, VecDeque};

use flowforge_types::graph::{Graph, Handle};
use flowforge_types::node::NodeKind;
use serde::Serialize;

use super::dry_run::{ancestors, upstream_of};
use crate::graph::numbering::{compute_step_labels, step_number};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableEntry {
    /// Ready-to-insert template, e.g. `{{ $steps[2].json }}`.
    pub expression: String,
    pub label: String,
    pub sample_value: String,
}

impl VariableEntry {
    fn new(expression: impl Into<String>, label: &str, sample_value: &str) -> Self {
        Self {
            expression: expression.into(),
            label: label.to_string(),
            sample_value: sample_value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableGroup {
    pub node_label: String,
    /// `"trigger"`, a step number, `"loop"`, `"branches"`, or `"util"`.
    pub step: String,
    pub variables: Vec<VariableEntry>,
}

/// Variables visible to `node_id`. Empty if the node does not exist.
pub fn available_variables(graph: &Graph, node_id: &str) -> Vec<VariableGroup> {
    if !graph.contains_node(node_id) {
        return Vec::new();
    }
    let labels = compute_step_labels(graph);
    let chain = ancestors(graph, node_id);
    let mut groups = Vec::new();

    if let Some(trigger) = graph
        .nodes
        .iter()
        .find(|n| n.id != node_id && n.kind().is_trigger())
    {
        groups.push(VariableGroup {
            node_label: trigger.label.clone(),
            step: "trigger".to_string(),
            variables: vec![
                VariableEntry::new("{{ $trigger.json }}", "All trigger data", "{ ... }"),
                VariableEntry::new("{{ $trigger.json.body }}", "body", "{ ... }"),
                VariableEntry::new("{{ $trigger.json.headers }}", "headers", "{ ... }"),
            ],
        });
    }

    let mut numbered: Vec<(u32, &str)> = chain
        .iter()
        .filter_map(|id| {
            let node = graph.node(id)?;
            if node.kind().is_trigger() {
                return None;
            }
            let n = step_number(labels.get(id)?)?;
            Some((n, node.label.as_str()))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);
    for (n, label) in numbered {
        groups.push(VariableGroup {
            node_label: label.to_string(),
            step: n.to_string(),
            variables: vec![
                VariableEntry::new(format!("{{{{ $steps[{n}].json }}}}"), "All output", "{ ... }"),
                VariableEntry::new(format!("{{{{ $steps[{n}].statusCode }}}}"), "statusCode", "200"),
                VariableEntry::new(format!("{{{{ $steps[{n}].json.body }}}}"), "body", "{ ... }"),
            ],
        });
    }

    let in_loop = chain.iter().any(|id| {
        graph.node(id).is_some_and(|n| n.kind() == NodeKind::Loop) && in_loop_body(graph, id, node_id)
    });
    if in_loop {
        groups.push(VariableGroup {
            node_label: "Loop context".to_string(),
            step: "loop".to_string(),
            variables: vec![
                VariableEntry::new("{{ $item }}", "Current item", "{ ... }"),
                VariableEntry::new("{{ $index }}", "Current index", "0"),
            ],
        });
    }

    let after_if = chain
        .iter()
        .any(|id| graph.node(id).is_some_and(|n| n.kind() == NodeKind::IfCondition));
    if after_if {
        groups.push(VariableGroup {
            node_label: "Branch outputs".to_string(),
            step: "branches".to_string(),
            variables: vec![
                VariableEntry::new("{{ $branches.true }}", "True branch", "{ ... }"),
                VariableEntry::new("{{ $branches.false }}", "False branch", "{ ... }"),
            ],
        });
    }

    let mut utilities = Vec::new();
    if upstream_of(graph, node_id).is_some() {
        utilities.push(VariableEntry::new("{{ $input }}", "Previous step output", "{ ... }"));
    }
    utilities.push(VariableEntry::new("{{ $now }}", "Current timestamp", "2026-01-01T00:00:00Z"));
    groups.push(VariableGroup {
        node_label: "Utilities".to_string(),
        step: "util".to_string(),
        variables: utilities,
    });

    groups
}

/// Whether `node_id` is reachable from the loop's `loopBody` edge without
/// passing back through the loop.
fn in_loop_body(graph: &Graph, loop_id: &str, node_id: &str) -> bool {
    let Some(body) = graph.edge_from(loop_id, Handle::LoopBody) else {
        return false;
    };
    let mut seen: HashSet<&str> = HashSet::from([loop_id]);
    let mut queue = VecDeque::from([body.target_node_id.as_str()]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if id == node_id {
            return true;
        }
        queue.extend(graph.outgoing(id).map(|e| e.target_node_id.as_str()));
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_types::graph::{Edge, Node};

    fn steps(groups: &[VariableGroup]) -> Vec<&str> {
        groups.iter().map(|g| g.step.as_str()).collect()
    }

    #[test]
    fn test_linear_chain() {
        let mut g = Graph::new();
        g.nodes = vec![
            Node::new("t", NodeKind::ScheduleTrigger),
            Node::new("a", NodeKind::HttpRequest),
            Node::new("b", NodeKind::SetTransform),
        ];
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "a"),
            Edge::new("e2", "a", Handle::Main, "b"),
        ];
        let groups = available_variables(&g, "b");
        assert_eq!(steps(&groups), vec!["trigger", "2", "util"]);
        assert_eq!(groups[1].variables[0].expression, "{{ $steps[2].json }}");
        assert_eq!(groups[2].variables[0].expression, "{{ $input }}");
    }

    #[test]
    fn test_loop_body_gets_item() {
        let mut g = Graph::new();
        g.nodes = vec![
            Node::new("t", NodeKind::ManualTrigger),
            Node::new("loop", NodeKind::Loop),
            Node::new("body", NodeKind::HttpRequest),
            Node::new("after", NodeKind::SetTransform),
        ];
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "loop"),
            Edge::new("e2", "loop", Handle::LoopBody, "body"),
            Edge::new("e3", "loop", Handle::LoopComplete, "after"),
        ];
        assert!(steps(&available_variables(&g, "body")).contains(&"loop"));
        assert!(!steps(&available_variables(&g, "after")).contains(&"loop"));
    }

    #[test]
    fn test_branches_after_if() {
        let mut g = Graph::new();
        g.nodes = vec![
            Node::new("t", NodeKind::ManualTrigger),
            Node::new("if", NodeKind::IfCondition),
            Node::new("x", NodeKind::SetTransform),
        ];
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "if"),
            Edge::new("e2", "if", Handle::True, "x"),
        ];
        let groups = available_variables(&g, "x");
        assert_eq!(steps(&groups), vec!["trigger", "2", "branches", "util"]);
    }

    #[test]
    fn test_trigger_sees_only_now() {
        let mut g = Graph::new();
        g.nodes = vec![Node::new("t", NodeKind::ManualTrigger)];
        let groups = available_variables(&g, "t");
        assert_eq!(steps(&groups), vec!["util"]);
        assert_eq!(groups[0].variables.len(), 1);
        assert!(available_variables(&g, "missing").is_empty());
    }
}
