//! Code step worker.
//!
//! Reads one sandbox request on stdin and writes one reply on stdout. Spawned
//! by `CodeSandbox` for every execution.

use std::process::ExitCode;

use flowforge_infra::sandbox::worker::{LimitedAllocator, run_worker};

#[global_allocator]
static ALLOCATOR: LimitedAllocator = LimitedAllocator::new();

fn main() -> ExitCode {
    run_worker(&ALLOCATOR)
}
