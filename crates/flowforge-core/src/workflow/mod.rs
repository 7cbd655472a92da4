//! Dry-run engine: expression resolution, per-type executors, and the
//! "test this step" protocol.
//!
//! - `context` -- variable bindings for template resolution
//! - `expression` -- `{{ ... }}` interpreter and string coercion
//! - `validation` -- config completeness and status derivation
//! - `step_runner` -- per-type executors and the `StepExecutionContext` seam
//! - `dry_run` -- ancestor resolution, output cache, and `test_step`
//! - `variables` -- catalog of referenceable expressions

pub mod context;
pub mod dry_run;
pub mod expression;
pub mod step_runner;
pub mod validation;
pub mod variables;
