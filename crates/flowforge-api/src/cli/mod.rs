//! CLI command definitions for the `flowforge` binary.
//!
//! Every subcommand operates on a workflow graph stored as a JSON file.

pub mod edit;
pub mod inspect;
pub mod test_step;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use flowforge_types::graph::Handle;
use flowforge_types::node::NodeKind;

/// Edit, lay out and dry-run FlowForge workflow graphs.
#[derive(Parser)]
#[command(name = "flowforge", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory containing flowforge.toml.
    #[arg(long, global = true, env = "FLOWFORGE_CONFIG_DIR", default_value = ".")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where a new node attaches: after `--after` on `--handle`, optionally
/// spliced before `--before`.
#[derive(clap::Args, Debug, Clone)]
pub struct AnchorArgs {
    /// Upstream node id. Omit only for the first node of an empty graph.
    #[arg(long)]
    pub after: Option<String>,

    /// Output handle of the upstream node.
    #[arg(long, default_value = "main", value_parser = parse_handle)]
    pub handle: Handle,

    /// Splice into the existing edge ending at this node.
    #[arg(long)]
    pub before: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the step label of every node.
    Labels {
        /// Workflow JSON file.
        file: PathBuf,
    },

    /// Recompute node positions.
    Layout {
        file: PathBuf,

        /// Write the laid-out graph back to the file.
        #[arg(long)]
        write: bool,
    },

    /// Check graph structure and per-node configuration.
    Validate { file: PathBuf },

    /// Show the render view: labels, terminal flags, connected handles.
    View { file: PathBuf },

    /// Insert a node.
    Insert {
        file: PathBuf,

        /// Node type tag, e.g. `http_request`.
        #[arg(long = "type", value_parser = parse_kind)]
        kind: NodeKind,

        /// Node id (generated when omitted).
        #[arg(long)]
        id: Option<String>,

        /// Display label (type default when omitted).
        #[arg(long)]
        label: Option<String>,

        /// Node config as JSON (type default when omitted).
        #[arg(long)]
        config: Option<String>,

        #[command(flatten)]
        anchor: AnchorArgs,
    },

    /// Insert an if-condition with its merge node.
    Branch {
        file: PathBuf,

        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        label: Option<String>,

        #[command(flatten)]
        anchor: AnchorArgs,
    },

    /// Delete a node, reconnecting its neighbours.
    #[command(alias = "rm")]
    Delete { file: PathBuf, node_id: String },

    /// Replace a node's config and re-derive its status.
    Configure {
        file: PathBuf,
        node_id: String,

        /// New config as JSON.
        config: String,
    },

    /// Dry-run a node (and any untested ancestors).
    #[command(name = "test-step")]
    TestStep {
        file: PathBuf,
        node_id: String,

        /// Persist the resulting node statuses.
        #[arg(long)]
        write: bool,
    },

    /// List the expressions a node can reference.
    Variables { file: PathBuf, node_id: String },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn parse_handle(s: &str) -> Result<Handle, String> {
    Handle::parse(s).ok_or_else(|| format!("unknown handle '{s}' (main, true, false, loopBody, loopComplete)"))
}

fn parse_kind(s: &str) -> Result<NodeKind, String> {
    NodeKind::parse(s).ok_or_else(|| format!("unknown node type '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_insert() {
        let cli = Cli::try_parse_from([
            "flowforge", "insert", "wf.json", "--type", "http_request", "--after", "t", "--handle", "true",
        ])
        .unwrap();
        match cli.command {
            Commands::Insert { kind, anchor, .. } => {
                assert_eq!(kind, NodeKind::HttpRequest);
                assert_eq!(anchor.after.as_deref(), Some("t"));
                assert_eq!(anchor.handle, Handle::True);
                assert!(anchor.before.is_none());
            }
            _ => panic!("expected insert"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(Cli::try_parse_from(["flowforge", "insert", "wf.json", "--type", "fax"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["flowforge", "-vv", "--json", "labels", "wf.json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
    }
}
