//! Observability setup for FlowForge binaries.

pub mod tracing_setup;
