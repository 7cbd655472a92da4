//! "Test this step": run one node, and any untested ancestors, against
//! synthetic or cached data.
//!
//! Ancestors run strictly one after another in trigger-first order, since
//! each one's context depends on the outputs before it. Every result is
//! cached in the caller's [`OutputCache`], together with the status changes
//! the session should apply to its graph.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use flowforge_types::config::HttpConfig;
use flowforge_types::graph::{Graph, NodeStatus};
use flowforge_types::node::NodeKind;
use flowforge_types::output::{BranchTaken, NodeOutput};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::context::ExpressionContext;
use super::step_runner::{StepError, StepExecutionContext, StepRunner};
use crate::graph::dag::topological_order;
use crate::graph::numbering::{StepLabels, compute_step_labels};

// ---------------------------------------------------------------------------
// OutputCache
// ---------------------------------------------------------------------------

/// Per-session dry-run outputs keyed by node id.
///
/// Written only by the dry run; invalidated by config edits, deletes, and
/// graph reloads.
#[derive(Debug, Clone, Default)]
pub struct OutputCache {
    outputs: HashMap<String, NodeOutput>,
    status_changes: Vec<(String, NodeStatus)>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeOutput> {
        self.outputs.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.outputs.contains_key(node_id)
    }

    pub fn insert(&mut self, node_id: impl Into<String>, output: NodeOutput) {
        self.outputs.insert(node_id.into(), output);
    }

    /// Drop one node's output. Returns whether anything was cached.
    pub fn invalidate(&mut self, node_id: &str) -> bool {
        self.outputs.remove(node_id).is_some()
    }

    pub fn clear(&mut self) {
        self.outputs.clear();
        self.status_changes.clear();
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Status changes recorded since the last call, oldest first.
    pub fn take_status_changes(&mut self) -> Vec<(String, NodeStatus)> {
        std::mem::take(&mut self.status_changes)
    }

    fn record_status(&mut self, node_id: &str, status: NodeStatus) {
        self.status_changes.push((node_id.to_string(), status));
    }
}

// ---------------------------------------------------------------------------
// DryRunError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DryRunError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("upstream step '{node_id}' failed: {source}")]
    AncestorFailed { node_id: String, source: StepError },

    #[error("step '{node_id}' failed: {source}")]
    Step { node_id: String, source: StepError },

    #[error("test run cancelled")]
    Cancelled,
}

impl DryRunError {
    /// Text for the tested node's output panel.
    pub fn user_message(&self) -> String {
        match self {
            DryRunError::NodeNotFound(id) => format!("Node \"{id}\" does not exist"),
            DryRunError::AncestorFailed { node_id, source } => {
                format!("Upstream step \"{node_id}\" failed: {}", source.user_message())
            }
            DryRunError::Step { source, .. } => source.user_message(),
            DryRunError::Cancelled => "Test run was cancelled".to_string(),
        }
    }

    /// The node whose executor raised, if any.
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            DryRunError::AncestorFailed { node_id, .. } | DryRunError::Step { node_id, .. } => {
                Some(node_id)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Graph queries
// ---------------------------------------------------------------------------

/// Every node with a path to `node_id`, trigger first.
///
/// Collected breadth-first over incoming edges, then ordered topologically
/// (reverse discovery order if the graph is not a DAG).
pub fn ancestors(graph: &Graph, node_id: &str) -> Vec<String> {
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in &graph.edges {
        reverse
            .entry(e.target_node_id.as_str())
            .or_default()
            .push(e.source_node_id.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::from([node_id]);
    let mut queue = VecDeque::from([node_id]);
    let mut found: Vec<&str> = Vec::new();
    while let Some(id) = queue.pop_front() {
        for &src in reverse.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            if visited.insert(src) {
                found.push(src);
                queue.push_back(src);
            }
        }
    }

    match topological_order(graph) {
        Ok(order) => {
            let rank: HashMap<&str, usize> =
                order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            found.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
        }
        Err(_) => found.reverse(),
    }
    found.into_iter().map(str::to_string).collect()
}

/// Source of the first stored edge into `node_id`.
pub fn upstream_of<'a>(graph: &'a Graph, node_id: &str) -> Option<&'a str> {
    graph
        .edges
        .iter()
        .find(|e| e.target_node_id == node_id)
        .map(|e| e.source_node_id.as_str())
}

// ---------------------------------------------------------------------------
// DryRun
// ---------------------------------------------------------------------------

/// One dry-run invocation over a fixed graph snapshot.
pub struct DryRun<'a> {
    graph: &'a Graph,
    runner: StepRunner<'a>,
    labels: StepLabels,
    now: String,
}

impl<'a> DryRun<'a> {
    pub fn new(
        graph: &'a Graph,
        exec: &'a dyn StepExecutionContext,
        http: &'a HttpConfig,
    ) -> Self {
        Self {
            graph,
            runner: StepRunner::new(exec, http),
            labels: compute_step_labels(graph),
            now: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Pin `$now`.
    pub fn with_now(mut self, now: impl Into<String>) -> Self {
        self.now = now.into();
        self
    }

    /// Run `node_id`, first filling in any ancestor without a cached output.
    pub async fn test_step(
        &self,
        node_id: &str,
        cache: &mut OutputCache,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, DryRunError> {
        let span = tracing::info_span!("test_step", node_id);
        self.test_step_inner(node_id, cache, cancel).instrument(span).await
    }

    async fn test_step_inner(
        &self,
        node_id: &str,
        cache: &mut OutputCache,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, DryRunError> {
        if !self.graph.contains_node(node_id) {
            return Err(DryRunError::NodeNotFound(node_id.to_string()));
        }

        let chain = ancestors(self.graph, node_id);
        tracing::debug!(ancestors = chain.len(), cached = cache.len(), "resolving ancestors");

        for ancestor in &chain {
            if cache.contains(ancestor) {
                continue;
            }
            match self.run_node(ancestor, &chain, cache, cancel).await {
                Ok(output) => {
                    cache.insert(ancestor.clone(), output);
                    cache.record_status(ancestor, NodeStatus::Tested);
                }
                Err(StepError::Cancelled) => return Err(DryRunError::Cancelled),
                Err(source) => {
                    cache.record_status(ancestor, NodeStatus::Error);
                    cache.record_status(node_id, NodeStatus::Error);
                    return Err(DryRunError::AncestorFailed {
                        node_id: ancestor.clone(),
                        source,
                    });
                }
            }
        }

        match self.run_node(node_id, &chain, cache, cancel).await {
            Ok(output) => {
                cache.insert(node_id, output.clone());
                cache.record_status(node_id, NodeStatus::Tested);
                tracing::info!(node_id, "step tested");
                Ok(output)
            }
            Err(StepError::Cancelled) => Err(DryRunError::Cancelled),
            Err(source) => {
                tracing::warn!(node_id, error = %source, "step failed");
                cache.record_status(node_id, NodeStatus::Error);
                Err(DryRunError::Step {
                    node_id: node_id.to_string(),
                    source,
                })
            }
        }
    }

    async fn run_node(
        &self,
        node_id: &str,
        chain: &[String],
        cache: &OutputCache,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, StepError> {
        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        let Some(node) = self.graph.node(node_id) else {
            return Err(StepError::Execution(format!("node '{node_id}' vanished")));
        };

        let label = self.labels.get(node_id).map(String::as_str).unwrap_or("?");
        let span = tracing::debug_span!("run_node", node_id, node_type = node.kind().as_str(), label);
        let ctx = self.build_context(node_id, chain, cache);

        let started = Instant::now();
        let result = self.runner.run(node, &ctx, cancel).instrument(span).await;
        tracing::debug!(
            node_id,
            node_type = node.kind().as_str(),
            label,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "node executed"
        );
        result
    }

    /// Context for `node_id` from everything cached so far.
    fn build_context(&self, node_id: &str, chain: &[String], cache: &OutputCache) -> ExpressionContext {
        let mut ctx = ExpressionContext::new(self.now.clone());

        for node in &self.graph.nodes {
            let Some(output) = cache.get(&node.id) else {
                continue;
            };
            if ctx.trigger.is_none() && node.kind().is_trigger() {
                ctx.trigger = Some(output.to_binding());
            }
            if let Some(label) = self.labels.get(&node.id) {
                ctx.steps.insert(label.clone(), output.to_binding());
            }
            if node.kind() == NodeKind::IfCondition {
                match output.branch_taken {
                    Some(BranchTaken::True) => ctx.branches.on_true = Some(output.json.clone()),
                    Some(BranchTaken::False) => ctx.branches.on_false = Some(output.json.clone()),
                    None => {}
                }
            }
        }

        // Nearest loop ancestor with a preview supplies $item / $index.
        let preview = chain.iter().rev().find_map(|id| {
            let node = self.graph.node(id)?;
            if node.kind() != NodeKind::Loop {
                return None;
            }
            let out = cache.get(id)?;
            Some((out.preview_item.clone(), out.preview_index))
        });
        if let Some((item, index)) = preview {
            ctx = ctx.with_item(item, index);
        }

        let input = upstream_of(self.graph, node_id)
            .and_then(|up| cache.get(up))
            .map(|out| out.json.clone());
        ctx.with_input(input)
    }
}

/// Convenience wrapper: build a [`DryRun`] and test one node.
pub async fn test_step(
    graph: &Graph,
    node_id: &str,
    cache: &mut OutputCache,
    exec: &dyn StepExecutionContext,
    http: &HttpConfig,
    cancel: &CancellationToken,
) -> Result<NodeOutput, DryRunError> {
    DryRun::new(graph, exec, http)
        .test_step(node_id, cache, cancel)
        .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step_runner::{
        CodeInvocation, ExecFuture, HttpRequestSpec, HttpResponseData, NetworkError,
    };
    use flowforge_types::graph::{Edge, Handle, Node};
    use flowforge_types::node::{
        ConditionOperation, HttpRequestConfig, IfConditionConfig, LoopConfig, ManualTriggerConfig,
        MergeConfig, MergeStrategy, NodeConfig, SetField, SetTransformConfig,
    };
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct Scripted {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl StepExecutionContext for Scripted {
        fn execute_http(
            &self,
            spec: HttpRequestSpec,
            _cancel: CancellationToken,
        ) -> ExecFuture<'_, HttpResponseData, NetworkError> {
            self.calls.lock().unwrap().push(spec.url.clone());
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(NetworkError::Connectivity {
                        url: spec.url,
                        detail: "connection refused".into(),
                    });
                }
                Ok(HttpResponseData {
                    status: 200,
                    headers: BTreeMap::new(),
                    body: json!({ "name": "Alice", "items": [{ "id": 1 }, { "id": 2 }] }),
                })
            })
        }

        fn execute_code(&self, invocation: CodeInvocation) -> ExecFuture<'_, Value, StepError> {
            Box::pin(async move { Ok(invocation.bindings.get("$input").cloned().unwrap_or(Value::Null)) })
        }
    }

    fn http_node(id: &str) -> Node {
        Node::with_config(
            id,
            NodeConfig::HttpRequest(HttpRequestConfig {
                url: "https://api.example.com/users/1".into(),
                ..HttpRequestConfig::default()
            }),
        )
    }

    fn set_node(id: &str, name: &str, value: &str) -> Node {
        Node::with_config(
            id,
            NodeConfig::SetTransform(SetTransformConfig {
                fields: vec![SetField {
                    id: "f-1".into(),
                    name: name.into(),
                    value: value.into(),
                }],
            }),
        )
    }

    fn trigger() -> Node {
        Node::with_config(
            "t",
            NodeConfig::ManualTrigger(ManualTriggerConfig {
                sample_data: Some(r#"{"user":"bob"}"#.into()),
            }),
        )
    }

    fn linear() -> Graph {
        let mut g = Graph::new();
        g.nodes = vec![
            trigger(),
            http_node("h"),
            set_node("s", "greeting", "Hello {{ $steps[2].json.name }} from {{ $trigger.json.user }}"),
        ];
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "h"),
            Edge::new("e2", "h", Handle::Main, "s"),
        ];
        g
    }

    async fn dry(
        graph: &Graph,
        exec: &Scripted,
        node_id: &str,
        cache: &mut OutputCache,
    ) -> Result<NodeOutput, DryRunError> {
        let http = HttpConfig::default();
        DryRun::new(graph, exec, &http)
            .with_now("2026-01-01T00:00:00Z")
            .test_step(node_id, cache, &CancellationToken::new())
            .await
    }

    // -----------------------------------------------------------------------
    // Ancestors
    // -----------------------------------------------------------------------

    #[test]
    fn test_ancestors_trigger_first() {
        assert_eq!(ancestors(&linear(), "s"), vec!["t", "h"]);
        assert!(ancestors(&linear(), "t").is_empty());
    }

    #[test]
    fn test_ancestors_of_diamond_are_topological() {
        let mut g = Graph::new();
        g.nodes = ["t", "a", "b", "c", "m"]
            .iter()
            .map(|id| Node::new(*id, NodeKind::Wait))
            .collect();
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "a"),
            Edge::new("e2", "a", Handle::Main, "b"),
            Edge::new("e3", "b", Handle::Main, "m"),
            Edge::new("e4", "t", Handle::Main, "c"),
            Edge::new("e5", "c", Handle::Main, "m"),
        ];
        let order = ancestors(&g, "m");
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(pos("t"), 0);
        assert!(pos("a") < pos("b"));
    }

    // -----------------------------------------------------------------------
    // Protocol
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_runs_untested_ancestors_and_caches() {
        let g = linear();
        let exec = Scripted::new();
        let mut cache = OutputCache::new();

        let out = dry(&g, &exec, "s", &mut cache).await.unwrap();
        assert_eq!(out.json, json!({ "greeting": "Hello Alice from bob" }));
        assert_eq!(cache.len(), 3);
        assert_eq!(exec.calls(), 1);
        assert_eq!(
            cache.take_status_changes(),
            vec![
                ("t".to_string(), NodeStatus::Tested),
                ("h".to_string(), NodeStatus::Tested),
                ("s".to_string(), NodeStatus::Tested),
            ]
        );

        // Second run reuses cached ancestors.
        dry(&g, &exec, "s", &mut cache).await.unwrap();
        assert_eq!(exec.calls(), 1);
        assert_eq!(cache.take_status_changes().len(), 1);
    }

    #[tokio::test]
    async fn test_input_is_upstream_json() {
        let mut g = linear();
        g.nodes[2] = set_node("s", "n", "{{ $input.name }}");
        let mut cache = OutputCache::new();
        let out = dry(&g, &Scripted::new(), "s", &mut cache).await.unwrap();
        assert_eq!(out.json, json!({ "n": "Alice" }));
    }

    #[tokio::test]
    async fn test_ancestor_failure_aborts() {
        let g = linear();
        let exec = Scripted::failing();
        let mut cache = OutputCache::new();

        let err = dry(&g, &exec, "s", &mut cache).await.unwrap_err();
        assert_eq!(err.failed_node(), Some("h"));
        assert!(matches!(err, DryRunError::AncestorFailed { .. }));
        assert!(err.user_message().contains("could not reach"));
        assert!(cache.contains("t"));
        assert!(!cache.contains("h"));
        assert!(!cache.contains("s"));
        let changes = cache.take_status_changes();
        assert!(changes.contains(&("h".to_string(), NodeStatus::Error)));
        assert!(changes.contains(&("s".to_string(), NodeStatus::Error)));
    }

    #[tokio::test]
    async fn test_target_failure_keeps_ancestor_outputs() {
        let g = linear();
        let exec = Scripted::failing();
        let mut cache = OutputCache::new();

        let err = dry(&g, &exec, "h", &mut cache).await.unwrap_err();
        assert!(matches!(err, DryRunError::Step { .. }));
        assert!(cache.contains("t"));
        assert_eq!(
            cache.take_status_changes().last(),
            Some(&("h".to_string(), NodeStatus::Error))
        );
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let mut cache = OutputCache::new();
        let err = dry(&linear(), &Scripted::new(), "nope", &mut cache).await.unwrap_err();
        assert_eq!(err, DryRunError::NodeNotFound("nope".into()));
    }

    #[tokio::test]
    async fn test_cancelled_before_any_node() {
        let g = linear();
        let exec = Scripted::new();
        let http = HttpConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut cache = OutputCache::new();
        let err = test_step(&g, "s", &mut cache, &exec, &http, &cancel).await.unwrap_err();
        assert_eq!(err, DryRunError::Cancelled);
        assert!(cache.is_empty());
        assert!(cache.take_status_changes().is_empty());
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_branches_reach_merge() {
        let mut g = Graph::new();
        let mut cond = IfConditionConfig::default();
        cond.conditions[0].field = "user".into();
        cond.conditions[0].operation = ConditionOperation::Equals;
        cond.conditions[0].value = "bob".into();
        g.nodes = vec![
            trigger(),
            Node::with_config("if", NodeConfig::IfCondition(cond)),
            set_node("a", "side", "{{ $branches.true.user }}"),
            Node::with_config(
                "m",
                NodeConfig::Merge(MergeConfig {
                    strategy: MergeStrategy::ChooseBranch,
                    key_field: None,
                }),
            ),
        ];
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "if"),
            Edge::new("e2", "if", Handle::True, "a"),
            Edge::new("e3", "a", Handle::Main, "m"),
        ];

        let mut cache = OutputCache::new();
        let out = dry(&g, &Scripted::new(), "m", &mut cache).await.unwrap();
        assert_eq!(out.json, json!({ "side": "bob" }));
        assert_eq!(
            cache.get("if").unwrap().branch_taken,
            Some(BranchTaken::True)
        );
    }

    #[tokio::test]
    async fn test_loop_preview_binds_item() {
        let mut g = Graph::new();
        g.nodes = vec![
            trigger(),
            http_node("h"),
            Node::with_config(
                "loop",
                NodeConfig::Loop(LoopConfig {
                    source: Some("{{ $steps[2].json.items }}".into()),
                    ..LoopConfig::default()
                }),
            ),
            set_node("b", "current", "{{ $item.id }}/{{ $index }}"),
        ];
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "h"),
            Edge::new("e2", "h", Handle::Main, "loop"),
            Edge::new("e3", "loop", Handle::LoopBody, "b"),
        ];

        let mut cache = OutputCache::new();
        let out = dry(&g, &Scripted::new(), "b", &mut cache).await.unwrap();
        assert_eq!(out.json, json!({ "current": "1/0" }));
        assert_eq!(cache.get("loop").unwrap().json["totalItems"], 2);
    }

    #[tokio::test]
    async fn test_derived_labels_are_addressable() {
        let mut g = Graph::new();
        let mut cond = IfConditionConfig::default();
        cond.conditions[0].field = "user".into();
        cond.conditions[0].value = "nobody".into();
        g.nodes = vec![
            trigger(),
            Node::with_config("if", NodeConfig::IfCondition(cond)),
            set_node("f", "x", "1"),
            set_node("after", "seen", "{{ $steps['2b'].json.x }}"),
        ];
        g.edges = vec![
            Edge::new("e1", "t", Handle::Main, "if"),
            Edge::new("e2", "if", Handle::False, "f"),
            Edge::new("e3", "f", Handle::Main, "after"),
        ];
        let mut cache = OutputCache::new();
        let out = dry(&g, &Scripted::new(), "after", &mut cache).await.unwrap();
        assert_eq!(out.json, json!({ "seen": "1" }));
        assert_eq!(cache.get("if").unwrap().branch_taken, Some(BranchTaken::False));
    }
}
