//! Worker side of the code sandbox.
//!
//! The `flowforge-sandbox` binary reads one [`WorkerRequest`] as JSON on
//! stdin, evaluates the script, and writes one [`WorkerReply`] on stdout.
//! It installs [`LimitedAllocator`] as its global allocator, so the heap cap
//! covers everything the script allocates while it runs.
//!
//! A refused fallible allocation (e.g. an `ArrayBuffer`) surfaces as a script
//! exception and is reported as [`WorkerReply::MemoryExceeded`]. A refused
//! infallible allocation aborts the process; the parent recognizes the
//! runtime's `memory allocation of N bytes failed` line on stderr.

use std::alloc::{GlobalAlloc, Layout, System};
use std::io::{Read, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};

use boa_engine::{Context, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One script evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub script: String,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
    pub memory_limit_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum WorkerReply {
    Ok { value: Value },
    Error { message: String },
    MemoryExceeded { max: u64, actual: u64 },
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

/// System allocator with a byte budget.
///
/// The limit starts unbounded; [`run_worker`] lowers it once the request has
/// been read. `refused` keeps the largest heap size a rejected allocation
/// would have produced.
pub struct LimitedAllocator {
    used: AtomicUsize,
    limit: AtomicUsize,
    refused: AtomicUsize,
}

impl LimitedAllocator {
    pub const fn new() -> Self {
        Self {
            used: AtomicUsize::new(0),
            limit: AtomicUsize::new(usize::MAX),
            refused: AtomicUsize::new(0),
        }
    }

    pub fn set_limit(&self, bytes: u64) {
        let bytes = usize::try_from(bytes).unwrap_or(usize::MAX);
        self.limit.store(bytes, Ordering::SeqCst);
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn refused(&self) -> Option<usize> {
        match self.refused.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    fn reserve(&self, size: usize) -> bool {
        let after = self.used.fetch_add(size, Ordering::Relaxed).saturating_add(size);
        if after > self.limit.load(Ordering::Relaxed) {
            self.used.fetch_sub(size, Ordering::Relaxed);
            self.refused.fetch_max(after, Ordering::Relaxed);
            return false;
        }
        true
    }

    fn release(&self, size: usize) {
        self.used.fetch_sub(size, Ordering::Relaxed);
    }
}

impl Default for LimitedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for LimitedAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !self.reserve(layout.size()) {
            return std::ptr::null_mut();
        }
        let ptr = unsafe { System.alloc(layout) };
        if ptr.is_null() {
            self.release(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if !self.reserve(layout.size()) {
            return std::ptr::null_mut();
        }
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if ptr.is_null() {
            self.release(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        self.release(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old_size = layout.size();
        if new_size > old_size {
            let extra = new_size - old_size;
            if !self.reserve(extra) {
                return std::ptr::null_mut();
            }
            let grown = unsafe { System.realloc(ptr, layout, new_size) };
            if grown.is_null() {
                self.release(extra);
            }
            grown
        } else {
            let shrunk = unsafe { System.realloc(ptr, layout, new_size) };
            if !shrunk.is_null() {
                self.release(old_size - new_size);
            }
            shrunk
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Entry point of the worker binary.
pub fn run_worker(allocator: &'static LimitedAllocator) -> ExitCode {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("failed to read sandbox request: {e}");
        return ExitCode::FAILURE;
    }
    let request: WorkerRequest = match serde_json::from_str(&input) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("malformed sandbox request: {e}");
            return ExitCode::FAILURE;
        }
    };
    drop(input);

    allocator.set_limit(request.memory_limit_bytes);
    let outcome = run_script(
        &request.script,
        request.loop_iteration_limit,
        request.recursion_limit,
    );
    let reply = match allocator.refused() {
        Some(actual) => WorkerReply::MemoryExceeded {
            max: request.memory_limit_bytes,
            actual: actual as u64,
        },
        None => outcome,
    };
    allocator.set_limit(u64::MAX);

    let mut stdout = std::io::stdout().lock();
    let written = serde_json::to_writer(&mut stdout, &reply)
        .map_err(std::io::Error::from)
        .and_then(|()| stdout.flush());
    match written {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("failed to write sandbox reply: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Evaluate a wrapper script in a fresh boa context.
///
/// The script must evaluate to a JSON string of `{ ok }` or `{ error }`.
pub fn run_script(script: &str, loop_iteration_limit: u64, recursion_limit: usize) -> WorkerReply {
    let raw = {
        let mut context = Context::default();
        let limits = context.runtime_limits_mut();
        limits.set_loop_iteration_limit(loop_iteration_limit);
        limits.set_recursion_limit(recursion_limit);

        match context.eval(Source::from_bytes(script)) {
            Ok(value) => match value.as_string() {
                Some(s) => s.to_std_string_escaped(),
                None => {
                    return WorkerReply::Error {
                        message: "script wrapper returned a non-string".into(),
                    };
                }
            },
            Err(e) => return WorkerReply::Error { message: e.to_string() },
        }
    };

    let envelope: Value = match serde_json::from_str(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            return WorkerReply::Error {
                message: format!("failed to parse result: {e}"),
            };
        }
    };
    match envelope.get("error") {
        Some(Value::String(message)) => WorkerReply::Error { message: message.clone() },
        Some(other) => WorkerReply::Error { message: other.to_string() },
        None => WorkerReply::Ok {
            value: envelope.get("ok").cloned().unwrap_or(Value::Null),
        },
    }
}
