//! Dry-run wiring: the live implementation of the core execution context.

pub mod execution_context;
