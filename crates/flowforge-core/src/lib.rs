//! Workflow graph engine for FlowForge.
//!
//! Pure graph operations (numbering, structural edits, layout, views) and the
//! dry-run engine. Depends only on `flowforge-types`; network and script
//! execution reach the outside world through
//! [`workflow::step_runner::StepExecutionContext`], implemented in infra.

pub mod graph;
pub mod session;
pub mod workflow;
