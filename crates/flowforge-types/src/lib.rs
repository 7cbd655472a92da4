//! Shared domain types for FlowForge.
//!
//! The workflow graph (`Graph`, `Node`, `Edge`), the closed set of node
//! configurations, dry-run outputs, engine configuration, and graph errors.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, thiserror.

pub mod config;
pub mod error;
pub mod graph;
pub mod node;
pub mod output;
