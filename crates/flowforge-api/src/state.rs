//! Shared application state for CLI handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flowforge_core::session::EditorSession;
use flowforge_infra::config::load_engine_config;
use flowforge_infra::store::{load_graph, save_graph};
use flowforge_infra::workflow::execution_context::LiveExecutionContext;
use flowforge_types::config::EngineConfig;
use flowforge_types::graph::Graph;

pub type Session = EditorSession<LiveExecutionContext>;

pub struct AppState {
    pub config_dir: PathBuf,
    pub config: EngineConfig,
}

impl AppState {
    /// Load `flowforge.toml` from `config_dir` (defaults when absent).
    pub async fn init(config_dir: &Path) -> Self {
        let config = load_engine_config(config_dir).await;
        Self {
            config_dir: config_dir.to_path_buf(),
            config,
        }
    }

    pub async fn load(&self, path: &Path) -> Result<Graph> {
        load_graph(path)
            .await
            .with_context(|| format!("Failed to load workflow '{}'", path.display()))
    }

    pub async fn save(&self, path: &Path, graph: &Graph) -> Result<()> {
        save_graph(path, graph)
            .await
            .with_context(|| format!("Failed to save workflow '{}'", path.display()))
    }

    /// Open an editor session over the graph stored at `path`.
    pub async fn open_session(&self, path: &Path) -> Result<Session> {
        let graph = self.load(path).await?;
        let exec = LiveExecutionContext::new(&self.config).context("Failed to build HTTP client")?;
        Ok(EditorSession::new(graph, self.config.clone(), exec))
    }
}
