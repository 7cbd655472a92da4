//! Concrete collaborators for the FlowForge core.
//!
//! - `http` -- reqwest-backed executor for `http_request` dry runs
//! - `sandbox` -- boa_engine JavaScript sandbox for `code` steps, run in the
//!   `flowforge-sandbox` worker process
//! - `workflow` -- [`LiveExecutionContext`](workflow::execution_context::LiveExecutionContext)
//!   wiring both into the core `StepExecutionContext` trait
//! - `config` -- `flowforge.toml` loader
//! - `store` -- JSON graph file load/save

pub mod config;
pub mod http;
pub mod sandbox;
pub mod store;
pub mod workflow;
