//! Editor session: the single owner of one workflow's graph and dry-run cache.
//!
//! Readers get an `Arc<Graph>` snapshot; every mutation builds a new graph
//! (copy-on-write) and swaps it in. Structural edits re-run layout.

use std::sync::Arc;

use flowforge_types::config::EngineConfig;
use flowforge_types::error::GraphError;
use flowforge_types::graph::{Graph, Node, NodeStatus, OnErrorMode};
use flowforge_types::node::{NodeConfig, NodeKind};
use flowforge_types::output::NodeOutput;
use tokio_util::sync::CancellationToken;

use crate::graph::layout::layout;
use crate::graph::mutator::{self, Anchor};
use crate::graph::numbering::{StepLabels, compute_step_labels};
use crate::graph::view::{GraphView, derive_view};
use crate::workflow::dry_run::{DryRun, DryRunError, OutputCache};
use crate::workflow::step_runner::StepExecutionContext;
use crate::workflow::validation::derive_status;

/// Per-node error-handling settings. Stored only; dry runs ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorHandling {
    pub on_error: OnErrorMode,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for ErrorHandling {
    fn default() -> Self {
        Self {
            on_error: OnErrorMode::Stop,
            retry_count: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Editing state for one workflow.
///
/// Generic over the execution context so core never depends on infra.
pub struct EditorSession<E: StepExecutionContext> {
    graph: Arc<Graph>,
    cache: OutputCache,
    config: EngineConfig,
    exec: E,
}

impl<E: StepExecutionContext> EditorSession<E> {
    pub fn new(graph: Graph, config: EngineConfig, exec: E) -> Self {
        Self {
            graph: Arc::new(graph),
            cache: OutputCache::new(),
            config,
            exec,
        }
    }

    // -- reads --

    pub fn snapshot(&self) -> Arc<Graph> {
        Arc::clone(&self.graph)
    }

    pub fn step_labels(&self) -> StepLabels {
        compute_step_labels(&self.graph)
    }

    pub fn view(&self) -> GraphView {
        derive_view(&self.graph, &self.step_labels())
    }

    pub fn output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.cache.get(node_id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- whole-graph operations --

    /// Replace the graph and drop every cached output.
    pub fn load(&mut self, graph: Graph) {
        tracing::debug!(nodes = graph.nodes.len(), edges = graph.edges.len(), "graph loaded");
        self.graph = Arc::new(graph);
        self.cache.clear();
    }

    /// Re-run layout on the current graph and return the new snapshot.
    pub fn layout(&mut self) -> Arc<Graph> {
        self.graph = Arc::new(layout(&self.graph, &self.config.layout));
        self.snapshot()
    }

    // -- structural edits --

    /// Insert `node` at `anchor`. Its status is derived from its config.
    pub fn insert_node(&mut self, mut node: Node, anchor: &Anchor) -> Result<(), GraphError> {
        node.status = derive_status(&node);
        let next = mutator::insert_node(&self.graph, node, anchor)?;
        self.commit(next);
        Ok(())
    }

    /// Insert an `if_condition` plus its merge. Returns the merge node's id.
    pub fn insert_branch_node(
        &mut self,
        mut if_node: Node,
        anchor: &Anchor,
    ) -> Result<String, GraphError> {
        if_node.status = derive_status(&if_node);
        let mut next = mutator::insert_branch_node(&self.graph, if_node, anchor)?;
        let mut merge_id = String::new();
        for node in next.nodes.iter_mut() {
            if node.kind() == NodeKind::Merge && !self.graph.contains_node(&node.id) {
                node.status = derive_status(node);
                merge_id = node.id.clone();
            }
        }
        self.commit(next);
        Ok(merge_id)
    }

    pub fn delete_node(&mut self, node_id: &str) -> Result<(), GraphError> {
        let next = mutator::delete_node(&self.graph, node_id)?;
        self.cache.invalidate(node_id);
        self.commit(next);
        Ok(())
    }

    fn commit(&mut self, next: Graph) {
        self.graph = Arc::new(layout(&next, &self.config.layout));
    }

    // -- node edits --

    /// Replace a node's config. The status is re-derived (demoting
    /// `tested`/`error`) and the node's cached output dropped.
    pub fn update_node_config(
        &mut self,
        node_id: &str,
        config: NodeConfig,
    ) -> Result<NodeStatus, GraphError> {
        let node = self.node_mut(node_id)?;
        if node.kind() != config.kind() {
            return Err(GraphError::ConfigKindMismatch {
                node_id: node_id.to_string(),
                expected: node.kind(),
                found: config.kind(),
            });
        }
        node.config = config;
        node.status = derive_status(node);
        let status = node.status;
        self.cache.invalidate(node_id);
        tracing::debug!(node_id, status = status.as_str(), "node config updated");
        Ok(status)
    }

    pub fn update_node_error_handling(
        &mut self,
        node_id: &str,
        settings: ErrorHandling,
    ) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        node.on_error = Some(settings.on_error);
        node.retry_count = Some(settings.retry_count);
        node.retry_delay_ms = Some(settings.retry_delay_ms);
        Ok(())
    }

    pub fn rename_node(&mut self, node_id: &str, label: impl Into<String>) -> Result<(), GraphError> {
        self.node_mut(node_id)?.label = label.into();
        Ok(())
    }

    fn node_mut(&mut self, node_id: &str) -> Result<&mut Node, GraphError> {
        Arc::make_mut(&mut self.graph)
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))
    }

    // -- dry run --

    /// Test `node_id`, then apply the resulting status changes to the graph.
    pub async fn test_step(
        &mut self,
        node_id: &str,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, DryRunError> {
        let graph = Arc::clone(&self.graph);
        let result = DryRun::new(&graph, &self.exec, &self.config.http)
            .test_step(node_id, &mut self.cache, cancel)
            .await;
        drop(graph);

        let changes = self.cache.take_status_changes();
        if !changes.is_empty() {
            let next = Arc::make_mut(&mut self.graph);
            for (id, status) in changes {
                if let Some(node) = next.nodes.iter_mut().find(|n| n.id == id) {
                    node.status = status;
                }
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
