//! Workflow graph value types: nodes, edges, handles, and the graph itself.
//!
//! A `Graph` is an immutable value from the point of view of its observers.
//! Every structural edit produces a new `Graph`; nothing mutates one in place
//! once it has been published to a session snapshot.

use serde::{Deserialize, Serialize};

use crate::node::{NodeCategory, NodeConfig, NodeKind};

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Lifecycle status of a node in the editor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Unconfigured,
    Configured,
    Tested,
    Error,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Unconfigured => "unconfigured",
            NodeStatus::Configured => "configured",
            NodeStatus::Tested => "tested",
            NodeStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node failure policy for the production runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorMode {
    Stop,
    Continue,
    Retry,
}

/// Canvas position (top-left corner of the node box).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A single step in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub status: NodeStatus,
    /// Serialized as sibling `type` and `config` keys.
    #[serde(flatten)]
    pub config: NodeConfig,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnErrorMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl Node {
    /// A fresh, unconfigured node of `kind` with its palette defaults.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: kind.default_label().to_string(),
            status: NodeStatus::Unconfigured,
            config: NodeConfig::default_for(kind),
            position: Position::default(),
            on_error: None,
            retry_count: None,
            retry_delay_ms: None,
            disabled: None,
        }
    }

    /// Build a node around an explicit config.
    pub fn with_config(id: impl Into<String>, config: NodeConfig) -> Self {
        let kind = config.kind();
        Self {
            config,
            ..Self::new(id, kind)
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    pub fn category(&self) -> NodeCategory {
        self.kind().category()
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Named port on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Handle {
    #[serde(rename = "main")]
    Main,
    #[serde(rename = "true")]
    True,
    #[serde(rename = "false")]
    False,
    #[serde(rename = "loopBody")]
    LoopBody,
    #[serde(rename = "loopComplete")]
    LoopComplete,
    #[serde(rename = "branchA")]
    BranchA,
    #[serde(rename = "branchB")]
    BranchB,
}

impl Handle {
    pub fn as_str(self) -> &'static str {
        match self {
            Handle::Main => "main",
            Handle::True => "true",
            Handle::False => "false",
            Handle::LoopBody => "loopBody",
            Handle::LoopComplete => "loopComplete",
            Handle::BranchA => "branchA",
            Handle::BranchB => "branchB",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main" => Some(Handle::Main),
            "true" => Some(Handle::True),
            "false" => Some(Handle::False),
            "loopBody" => Some(Handle::LoopBody),
            "loopComplete" => Some(Handle::LoopComplete),
            "branchA" => Some(Handle::BranchA),
            "branchB" => Some(Handle::BranchB),
            _ => None,
        }
    }

    /// Source handles a node of `kind` may emit edges from.
    pub fn sources_for(kind: NodeKind) -> &'static [Handle] {
        match kind {
            NodeKind::IfCondition => &[Handle::True, Handle::False],
            NodeKind::Loop => &[Handle::LoopBody, Handle::LoopComplete],
            _ => &[Handle::Main],
        }
    }

    /// Edge kind implied by leaving a node through this handle.
    pub fn edge_kind(self) -> EdgeKind {
        match self {
            Handle::True | Handle::False => EdgeKind::Branch,
            Handle::LoopBody | Handle::LoopComplete => EdgeKind::Loop,
            _ => EdgeKind::Plain,
        }
    }

    /// Default edge label for this source handle.
    pub fn edge_label(self) -> Option<&'static str> {
        match self {
            Handle::True => Some("True"),
            Handle::False => Some("False"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    Plain,
    Branch,
    Loop,
}

/// Directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    /// `None` is the `main` handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<Handle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<Handle>,
    #[serde(default)]
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// An edge leaving `source` through `handle`, with the kind and label the
    /// handle implies.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        handle: Handle,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source.into(),
            target_node_id: target.into(),
            source_handle: (handle != Handle::Main).then_some(handle),
            target_handle: None,
            kind: handle.edge_kind(),
            label: handle.edge_label().map(str::to_string),
        }
    }

    pub fn with_target_handle(mut self, handle: Handle) -> Self {
        self.target_handle = Some(handle);
        self
    }

    /// The effective source handle (`main` when unset).
    pub fn handle(&self) -> Handle {
        self.source_handle.unwrap_or(Handle::Main)
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    Stop,
    Continue,
}

/// Workflow-level settings, carried but not interpreted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_mode: Option<ErrorMode>,
}

/// One workflow version: nodes, edges, and settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub settings: GraphSettings,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Edges leaving `id`, in storage order.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source_node_id == id)
    }

    /// Edges entering `id`, in storage order.
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target_node_id == id)
    }

    /// The edge leaving `id` through `handle`, if any.
    pub fn edge_from(&self, id: &str, handle: Handle) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.source_node_id == id && e.handle() == handle)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{HttpRequestConfig, NodeConfig};
    use serde_json::json;

    #[test]
    fn test_node_serializes_type_and_config_side_by_side() {
        let node = Node::new("n1", NodeKind::Wait);
        let v = serde_json::to_value(&node).unwrap();
        assert_eq!(v["type"], "wait");
        assert_eq!(v["config"]["mode"], "duration");
        assert_eq!(v["config"]["durationValue"], 5.0);
        assert_eq!(v["status"], "unconfigured");
        assert!(v.get("onError").is_none());
    }

    #[test]
    fn test_node_deserializes_from_wire_shape() {
        let v = json!({
            "id": "h",
            "type": "http_request",
            "label": "Fetch",
            "status": "configured",
            "config": { "url": "https://x", "method": "GET", "bodyType": "json",
                        "authType": "none", "timeout": 5000 },
            "position": { "x": 1.0, "y": 2.0 },
            "onError": "retry",
            "retryCount": 3
        });
        let node: Node = serde_json::from_value(v).unwrap();
        assert_eq!(node.kind(), NodeKind::HttpRequest);
        assert_eq!(node.on_error, Some(OnErrorMode::Retry));
        assert_eq!(node.retry_count, Some(3));
        match node.config {
            NodeConfig::HttpRequest(HttpRequestConfig { ref url, .. }) => assert_eq!(url, "https://x"),
            ref other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_tag_and_config_rejected() {
        let v = json!({
            "id": "x", "type": "merge", "label": "M",
            "config": { "url": 5 }
        });
        assert!(serde_json::from_value::<Node>(v).is_err());
    }

    #[test]
    fn test_edge_new_derives_kind_and_label() {
        let e = Edge::new("e1", "if", Handle::False, "b");
        assert_eq!(e.kind, EdgeKind::Branch);
        assert_eq!(e.label.as_deref(), Some("False"));
        assert_eq!(e.handle(), Handle::False);

        let m = Edge::new("e2", "a", Handle::Main, "b");
        assert_eq!(m.source_handle, None);
        assert_eq!(m.handle(), Handle::Main);
        assert_eq!(m.kind, EdgeKind::Plain);
    }

    #[test]
    fn test_edge_wire_shape() {
        let e = Edge::new("e1", "loop", Handle::LoopBody, "b").with_target_handle(Handle::BranchA);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(
            v,
            json!({
                "id": "e1", "sourceNodeId": "loop", "targetNodeId": "b",
                "sourceHandle": "loopBody", "targetHandle": "branchA", "kind": "loop"
            })
        );
    }

    #[test]
    fn test_graph_lookup_helpers() {
        let mut g = Graph::new();
        g.nodes.push(Node::new("a", NodeKind::ManualTrigger));
        g.nodes.push(Node::new("b", NodeKind::IfCondition));
        g.edges.push(Edge::new("e1", "a", Handle::Main, "b"));
        assert!(g.contains_node("b"));
        assert_eq!(g.outgoing("a").count(), 1);
        assert_eq!(g.incoming("b").count(), 1);
        assert!(g.edge_from("a", Handle::Main).is_some());
        assert!(g.edge_from("b", Handle::True).is_none());
    }

    #[test]
    fn test_edge_from_outlives_lookup_key() {
        let mut g = Graph::new();
        g.edges.push(Edge::new("e1", "a", Handle::True, "b"));
        let edge = {
            let key = String::from("a");
            g.edge_from(&key, Handle::True)
        };
        assert_eq!(edge.map(|e| e.id.as_str()), Some("e1"));
    }

    #[test]
    fn test_graph_settings_roundtrip() {
        let v = json!({ "nodes": [], "edges": [], "settings": { "timeout": 30, "errorMode": "continue" } });
        let g: Graph = serde_json::from_value(v).unwrap();
        assert_eq!(g.settings.error_mode, Some(ErrorMode::Continue));
        assert_eq!(g.settings.timeout, Some(30));
    }
}
