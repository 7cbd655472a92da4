//! Workflow graph engine: structure checks, step numbering, structural edits,
//! layout, and view derivation.
//!
//! - `dag` -- well-formedness predicate and topological order (petgraph)
//! - `numbering` -- Kahn-based step labels (`1`, `2a`, `3.1`)
//! - `mutator` -- insert / branch scaffold / delete, copy-on-write
//! - `layout` -- layered placement plus branch-order repair
//! - `view` -- per-node flags and derived loop-back edges

pub mod dag;
pub mod layout;
pub mod mutator;
pub mod numbering;
pub mod view;
