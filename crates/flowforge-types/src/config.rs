//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `flowforge.toml`. Every section and field
//! has a default, so an empty or partial file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub layout: LayoutConfig,
    pub http: HttpConfig,
    pub sandbox: SandboxConfig,
    pub logging: LoggingConfig,
}

/// Primary axis along which ranks advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutDirection {
    /// Left to right; ranks advance along x, branches stack along y.
    #[default]
    LR,
    /// Top to bottom; ranks advance along y, branches stack along x.
    TB,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub direction: LayoutDirection,
    pub node_width: f64,
    pub node_height: f64,
    /// Gap between neighbours within a rank.
    pub node_sep: f64,
    /// Gap between consecutive ranks.
    pub rank_sep: f64,
    /// Barycenter sweeps during crossing minimization.
    pub ordering_sweeps: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            direction: LayoutDirection::LR,
            node_width: 220.0,
            node_height: 80.0,
            node_sep: 80.0,
            rank_sep: 250.0,
            ordering_sweeps: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Used when a node's own timeout is zero.
    pub default_timeout_ms: u64,
    /// Upper clamp for any node timeout.
    pub max_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            max_timeout_ms: 60_000,
            user_agent: concat!("flowforge-dry-run/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Limits for user code steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Heap cap for the worker process running the script.
    pub memory_limit_bytes: u64,
    pub timeout_ms: u64,
    pub max_code_bytes: usize,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
    /// Worker executable. Defaults to `flowforge-sandbox` next to the
    /// running binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 128 * 1024 * 1024,
            timeout_ms: 10_000,
            max_code_bytes: 256 * 1024,
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
            worker_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
    /// Export spans to stdout via OpenTelemetry.
    pub otel: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
            otel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.layout.node_width, 220.0);
        assert_eq!(config.layout.rank_sep, 250.0);
        assert_eq!(config.http.default_timeout_ms, 5_000);
        assert_eq!(config.sandbox.memory_limit_bytes, 134_217_728);
        assert_eq!(config.sandbox.timeout_ms, 10_000);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_engine_config_partial_toml() {
        let toml_str = r#"
[layout]
direction = "TB"
node_sep = 40.0

[sandbox]
timeout_ms = 2000
worker_path = "/opt/flowforge/flowforge-sandbox"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.layout.direction, LayoutDirection::TB);
        assert_eq!(config.layout.node_sep, 40.0);
        assert_eq!(config.layout.node_width, 220.0);
        assert_eq!(config.sandbox.timeout_ms, 2000);
        assert_eq!(
            config.sandbox.worker_path.as_deref(),
            Some(std::path::Path::new("/opt/flowforge/flowforge-sandbox"))
        );
        assert_eq!(config.http.max_timeout_ms, 60_000);
    }

    #[test]
    fn test_engine_config_empty_toml() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
