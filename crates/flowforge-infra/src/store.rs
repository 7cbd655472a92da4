//! JSON graph files.
//!
//! The core never performs I/O; the CLI loads and saves graphs through here.
//! Saves go to a sibling temp file first and are renamed into place.

use std::path::{Path, PathBuf};

use flowforge_types::graph::Graph;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize graph: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub async fn load_graph(path: &Path) -> Result<Graph, StoreError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let graph: Graph = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(
        path = %path.display(),
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "loaded graph"
    );
    Ok(graph)
}

pub async fn save_graph(path: &Path, graph: &Graph) -> Result<(), StoreError> {
    let mut content = serde_json::to_string_pretty(graph)?;
    content.push('\n');

    let tmp = temp_path(path);
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, content).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;

    tracing::debug!(path = %path.display(), nodes = graph.nodes.len(), "saved graph");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_types::graph::{Edge, Handle, Node};
    use flowforge_types::node::NodeKind;
    use tempfile::TempDir;

    fn sample() -> Graph {
        let mut graph = Graph::new();
        graph.nodes = vec![
            Node::new("t", NodeKind::ManualTrigger),
            Node::new("h", NodeKind::HttpRequest),
        ];
        graph.edges = vec![Edge::new("e1", "t", Handle::Main, "h")];
        graph
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("workflow.json");
        let graph = sample();

        save_graph(&path, &graph).await.unwrap();
        let loaded = load_graph(&path).await.unwrap();
        assert_eq!(loaded, graph);
        assert!(!tmp.path().join("workflow.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = load_graph(&tmp.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }

    #[tokio::test]
    async fn test_load_malformed_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        tokio::fs::write(&path, "{ nodes: ").await.unwrap();
        let err = load_graph(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.to_string().contains("bad.json"));
    }
}
