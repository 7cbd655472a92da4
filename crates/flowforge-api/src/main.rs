//! FlowForge CLI entry point.
//!
//! Binary name: `flowforge`
//!
//! Parses CLI arguments, sets up tracing, loads `flowforge.toml`, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::edit::NewNode;
use cli::{Cli, Commands};
use flowforge_observe::tracing_setup::{init_tracing, shutdown_tracing, verbosity_filter};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or tracing
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowforge", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(&cli.config_dir).await;

    let mut logging = state.config.logging.clone();
    if cli.verbose > 0 || cli.quiet {
        logging.level = verbosity_filter(cli.verbose, cli.quiet).to_string();
    }
    if let Err(e) = init_tracing(&logging) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }
    tracing::debug!(config_dir = %state.config_dir.display(), "configuration loaded");

    let result = run(cli, &state).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli, state: &AppState) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Labels { file } => cli::inspect::handle_labels(state, &file, json).await,
        Commands::Layout { file, write } => cli::inspect::handle_layout(state, &file, write, json).await,
        Commands::Validate { file } => cli::inspect::handle_validate(state, &file, json).await,
        Commands::View { file } => cli::inspect::handle_view(state, &file, json).await,
        Commands::Insert {
            file,
            kind,
            id,
            label,
            config,
            anchor,
        } => {
            let spec = NewNode {
                kind,
                id,
                label,
                config,
            };
            cli::edit::handle_insert(state, &file, spec, &anchor, json).await
        }
        Commands::Branch {
            file,
            id,
            label,
            anchor,
        } => cli::edit::handle_branch(state, &file, id, label, &anchor, json).await,
        Commands::Delete { file, node_id } => cli::edit::handle_delete(state, &file, &node_id, json).await,
        Commands::Configure {
            file,
            node_id,
            config,
        } => cli::edit::handle_configure(state, &file, &node_id, &config, json).await,
        Commands::TestStep {
            file,
            node_id,
            write,
        } => cli::test_step::handle_test_step(state, &file, &node_id, write, json).await,
        Commands::Variables { file, node_id } => {
            cli::inspect::handle_variables(state, &file, &node_id, json).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}
