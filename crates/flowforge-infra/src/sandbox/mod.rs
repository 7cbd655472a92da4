//! JavaScript sandbox for `code` steps.
//!
//! Each execution runs in a fresh `flowforge-sandbox` worker process (see
//! [`worker`]). The user script becomes the body of a function whose
//! parameters are the step bindings (`$input`, `$steps`, `$item`, `$index`,
//! `$now` and any named input mappings). Its return value, round-tripped
//! through `JSON.stringify`, is the step output.
//!
//! Limits:
//! - code size (`max_code_bytes`), checked before spawning
//! - wall clock (`timeout_ms`); the worker is killed at the deadline
//! - heap (`memory_limit_bytes`), enforced by the worker's allocator
//! - loop iterations and recursion depth (boa runtime limits)

pub mod worker;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use flowforge_types::config::SandboxConfig;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use worker::{WorkerReply, WorkerRequest};

/// Name of the worker executable.
pub const WORKER_BIN: &str = "flowforge-sandbox";

/// Errors raised by the code sandbox.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SandboxError {
    #[error("code is {actual} bytes, limit is {max}")]
    CodeTooLarge { max: usize, actual: usize },

    #[error("execution exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("memory limit of {max} bytes exceeded ({actual} bytes requested)")]
    MemoryLimitExceeded { max: u64, actual: u64 },

    /// The script threw, failed to parse, or hit a runtime limit.
    #[error("{0}")]
    Exception(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("sandbox worker failed: {0}")]
    Internal(String),
}

/// Resource-capped script runner. Every call gets a fresh worker process.
#[derive(Debug, Clone)]
pub struct CodeSandbox {
    config: SandboxConfig,
    worker: PathBuf,
}

impl CodeSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let worker = config.worker_path.clone().unwrap_or_else(default_worker_path);
        Self { config, worker }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker
    }

    /// Run `code` with `bindings` in a worker process under the configured
    /// limits.
    pub async fn execute(&self, code: &str, bindings: &Map<String, Value>) -> Result<Value, SandboxError> {
        if code.len() > self.config.max_code_bytes {
            return Err(SandboxError::CodeTooLarge {
                max: self.config.max_code_bytes,
                actual: code.len(),
            });
        }

        let bindings_json = serde_json::to_string(bindings)
            .map_err(|e| SandboxError::Serialization(e.to_string()))?;
        let bindings_len = bindings_json.len() as u64;
        if bindings_len > self.config.memory_limit_bytes {
            return Err(SandboxError::MemoryLimitExceeded {
                max: self.config.memory_limit_bytes,
                actual: bindings_len,
            });
        }

        let request = WorkerRequest {
            script: wrap_script(code, bindings, &bindings_json)?,
            loop_iteration_limit: self.config.loop_iteration_limit,
            recursion_limit: self.config.recursion_limit,
            memory_limit_bytes: self.config.memory_limit_bytes,
        };
        let payload = serde_json::to_vec(&request).map_err(|e| SandboxError::Serialization(e.to_string()))?;

        let timeout_ms = self.config.timeout_ms;
        let started = Instant::now();
        let mut child = Command::new(&self.worker)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SandboxError::Internal(format!("cannot start {}: {e}", self.worker.display()))
            })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Internal("worker stdin unavailable".into()))?;

        let run = async move {
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!(error = %e, "sandbox worker closed stdin early");
            }
            drop(stdin);
            child.wait_with_output().await
        };

        // Dropping `run` on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(SandboxError::Internal(e.to_string())),
            Err(_) => {
                tracing::warn!(timeout_ms, "code step timed out, worker killed");
                return Err(SandboxError::Timeout { timeout_ms });
            }
        };

        let reply = interpret_output(
            output.status.success(),
            &output.stdout,
            &output.stderr,
            self.config.memory_limit_bytes,
        )?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            output_bytes = output.stdout.len(),
            "code step finished"
        );

        match reply {
            WorkerReply::Ok { value } => Ok(value),
            WorkerReply::Error { message } => Err(SandboxError::Exception(message)),
            WorkerReply::MemoryExceeded { max, actual } => {
                tracing::warn!(max, actual, "code step exceeded its memory limit");
                Err(SandboxError::MemoryLimitExceeded { max, actual })
            }
        }
    }
}

/// `flowforge-sandbox` in the directory of the running executable.
fn default_worker_path() -> PathBuf {
    let file = format!("{WORKER_BIN}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file)))
        .unwrap_or_else(|| PathBuf::from(file))
}

fn interpret_output(
    success: bool,
    stdout: &[u8],
    stderr: &[u8],
    memory_limit_bytes: u64,
) -> Result<WorkerReply, SandboxError> {
    if success {
        return serde_json::from_slice(stdout)
            .map_err(|e| SandboxError::Serialization(format!("unreadable worker reply: {e}")));
    }
    let stderr = String::from_utf8_lossy(stderr);
    if let Some(requested) = failed_allocation(&stderr) {
        return Ok(WorkerReply::MemoryExceeded {
            max: memory_limit_bytes,
            actual: requested,
        });
    }
    Err(SandboxError::Internal(format!("worker exited abnormally: {}", stderr.trim())))
}

/// Size from the runtime's `memory allocation of N bytes failed` abort line.
fn failed_allocation(stderr: &str) -> Option<u64> {
    let rest = stderr.split("memory allocation of ").nth(1)?;
    rest.split_whitespace().next()?.parse().ok()
}

/// Build the wrapper program. Mapping names that are not plain identifiers
/// stay reachable only through `$bindings`.
fn wrap_script(code: &str, bindings: &Map<String, Value>, bindings_json: &str) -> Result<String, SandboxError> {
    let literal = serde_json::to_string(bindings_json)
        .map_err(|e| SandboxError::Serialization(e.to_string()))?;

    let names: Vec<&str> = bindings
        .keys()
        .map(String::as_str)
        .filter(|name| is_identifier(name))
        .collect();
    let params = names.join(", ");
    let args = names
        .iter()
        .map(|name| format!("$bindings[{}]", Value::String((*name).to_string())))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        r#"(function() {{
    var $bindings = JSON.parse({literal});
    try {{
        var __result = (function({params}) {{
{code}
        }})({args});
        return JSON.stringify({{ ok: __result === undefined ? null : __result }});
    }} catch (e) {{
        var message = (e && e.message !== undefined) ? String(e.message) : String(e);
        return JSON.stringify({{ error: message }});
    }}
}})();"#
    ))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Evaluate in-process, skipping the worker.
    fn eval(code: &str, bindings: Value) -> WorkerReply {
        let map = match bindings {
            Value::Object(map) => map,
            _ => panic!("bindings must be an object"),
        };
        let json = serde_json::to_string(&map).unwrap();
        let script = wrap_script(code, &map, &json).unwrap();
        worker::run_script(&script, 100_000, 512)
    }

    fn ok(value: Value) -> WorkerReply {
        WorkerReply::Ok { value }
    }

    #[test]
    fn test_returns_object() {
        assert_eq!(
            eval("return { sum: 1 + 2, ok: true };", json!({})),
            ok(json!({ "sum": 3, "ok": true }))
        );
    }

    #[test]
    fn test_reads_bindings() {
        let b = json!({
            "$input": { "items": [1, 2, 3] },
            "$index": 4,
            "greeting": "hi"
        });
        assert_eq!(
            eval("return [$input.items.length, $index, greeting];", b),
            ok(json!([3, 4, "hi"]))
        );
    }

    #[test]
    fn test_no_return_is_null() {
        assert_eq!(eval("var x = 1;", json!({})), ok(Value::Null));
    }

    #[test]
    fn test_non_identifier_mapping_via_bindings() {
        let b = json!({ "my-key": 7 });
        assert_eq!(eval(r#"return $bindings["my-key"] * 2;"#, b), ok(json!(14)));
    }

    #[test]
    fn test_binding_with_quotes_survives() {
        let b = json!({ "$input": { "text": "it's \"quoted\"\nline" } });
        assert_eq!(eval("return $input.text;", b), ok(json!("it's \"quoted\"\nline")));
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[test]
    fn test_thrown_error_message() {
        assert_eq!(
            eval("throw new Error('boom');", json!({})),
            WorkerReply::Error { message: "boom".into() }
        );
    }

    #[test]
    fn test_syntax_error_is_error() {
        assert!(matches!(eval("return {", json!({})), WorkerReply::Error { .. }));
    }

    #[test]
    fn test_infinite_loop_hits_limit() {
        assert!(matches!(eval("while (true) {}", json!({})), WorkerReply::Error { .. }));
    }

    #[tokio::test]
    async fn test_code_size_cap() {
        let sandbox = CodeSandbox::new(SandboxConfig {
            max_code_bytes: 10,
            ..SandboxConfig::default()
        });
        let err = sandbox.execute("return 12345678901;", &Map::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::CodeTooLarge { max: 10, .. }));
    }

    #[tokio::test]
    async fn test_oversized_bindings_rejected_before_spawn() {
        let sandbox = CodeSandbox::new(SandboxConfig {
            memory_limit_bytes: 16,
            worker_path: Some(PathBuf::from("/nonexistent/flowforge-sandbox")),
            ..SandboxConfig::default()
        });
        let mut bindings = Map::new();
        bindings.insert("$input".into(), json!("x".repeat(64)));
        let err = sandbox.execute("return 1;", &bindings).await.unwrap_err();
        assert!(matches!(err, SandboxError::MemoryLimitExceeded { max: 16, .. }));
    }

    #[tokio::test]
    async fn test_missing_worker_is_internal_error() {
        let sandbox = CodeSandbox::new(SandboxConfig {
            worker_path: Some(PathBuf::from("/nonexistent/flowforge-sandbox")),
            ..SandboxConfig::default()
        });
        let err = sandbox.execute("return 1;", &Map::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Internal(_)));
    }

    // -----------------------------------------------------------------------
    // Worker output
    // -----------------------------------------------------------------------

    #[test]
    fn test_abort_on_allocation_is_memory_limit() {
        let stderr = b"memory allocation of 419430400 bytes failed\n";
        let reply = interpret_output(false, b"", stderr, 1024).unwrap();
        assert_eq!(
            reply,
            WorkerReply::MemoryExceeded { max: 1024, actual: 419_430_400 }
        );
    }

    #[test]
    fn test_other_crash_is_internal() {
        let err = interpret_output(false, b"", b"thread 'main' panicked", 1024).unwrap_err();
        assert!(matches!(err, SandboxError::Internal(msg) if msg.contains("panicked")));
    }

    #[test]
    fn test_successful_reply_is_decoded() {
        let reply = interpret_output(true, br#"{"outcome":"error","message":"bad"}"#, b"", 1024).unwrap();
        assert_eq!(reply, WorkerReply::Error { message: "bad".into() });
        assert!(interpret_output(true, b"garbage", b"", 1024).is_err());
    }

    #[test]
    fn test_default_worker_sits_next_to_executable() {
        let sandbox = CodeSandbox::new(SandboxConfig::default());
        let name = sandbox.worker_path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(WORKER_BIN));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("$input"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("my-key"));
        assert!(!is_identifier(""));
    }
}
