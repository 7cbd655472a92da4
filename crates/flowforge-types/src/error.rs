use thiserror::Error;

use crate::graph::Handle;
use crate::node::NodeKind;

/// Errors from structural graph edits.
///
/// Mutations never partially apply: an `Err` leaves the input graph as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node '{0}' not found")]
    UnknownNode(String),

    #[error("node id '{0}' already exists")]
    DuplicateNode(String),

    #[error("no edge '{source_id}' --{handle}--> '{target_id}' to insert into")]
    MissingAnchorEdge {
        source_id: String,
        handle: Handle,
        target_id: String,
    },

    #[error("{count} edges match '{source_id}' --{handle}--> '{target_id}'; expected exactly one")]
    AmbiguousAnchorEdge {
        source_id: String,
        handle: Handle,
        target_id: String,
        count: usize,
    },

    #[error("handle '{handle}' on node '{node_id}' is already connected")]
    HandleOccupied { node_id: String, handle: Handle },

    #[error("an anchor source is required once the graph has nodes")]
    SourceRequired,

    #[error("node type '{kind}' has no '{handle}' output")]
    InvalidHandle { kind: NodeKind, handle: Handle },

    #[error("target handle '{handle}' on edge '{edge_id}' is not a merge input")]
    InvalidTargetHandle { edge_id: String, handle: Handle },

    #[error("edge id '{0}' already exists")]
    DuplicateEdge(String),

    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("cycle detected involving node '{0}'")]
    CycleDetected(String),

    #[error("insert_branch_node requires an if_condition node, got '{0}'")]
    NotABranchNode(NodeKind),

    #[error("node '{node_id}' is a '{expected}' node; cannot apply a '{found}' config")]
    ConfigKindMismatch {
        node_id: String,
        expected: NodeKind,
        found: NodeKind,
    },
}
