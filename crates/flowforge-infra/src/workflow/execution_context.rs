//! Live execution context wiring dry-run steps to real collaborators.
//!
//! [`LiveExecutionContext`] implements the [`StepExecutionContext`] trait from
//! flowforge-core:
//! - `http_request` steps go through [`ReqwestHttpExecutor`]
//! - `code` steps run in a [`CodeSandbox`] worker process
//!
//! The trait is defined in core and implemented here, so core stays free of
//! network and script I/O.

use flowforge_core::workflow::step_runner::{
    CodeInvocation, ExecFuture, HttpRequestSpec, HttpResponseData, NetworkError, StepError,
    StepExecutionContext,
};
use flowforge_types::config::EngineConfig;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::http::ReqwestHttpExecutor;
use crate::sandbox::CodeSandbox;

pub struct LiveExecutionContext {
    http: ReqwestHttpExecutor,
    sandbox: CodeSandbox,
}

impl LiveExecutionContext {
    pub fn new(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: ReqwestHttpExecutor::new(&config.http)?,
            sandbox: CodeSandbox::new(config.sandbox.clone()),
        })
    }

    pub fn from_parts(http: ReqwestHttpExecutor, sandbox: CodeSandbox) -> Self {
        Self { http, sandbox }
    }
}

impl StepExecutionContext for LiveExecutionContext {
    fn execute_http(
        &self,
        spec: HttpRequestSpec,
        cancel: CancellationToken,
    ) -> ExecFuture<'_, HttpResponseData, NetworkError> {
        Box::pin(self.http.execute(spec, cancel))
    }

    fn execute_code(&self, invocation: CodeInvocation) -> ExecFuture<'_, Value, StepError> {
        Box::pin(async move {
            self.sandbox
                .execute(&invocation.code, &invocation.bindings)
                .await
                .map_err(|e| StepError::Code(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_sandbox_failure_maps_to_code_error() {
        let mut config = EngineConfig::default();
        config.sandbox.worker_path = Some(PathBuf::from("/nonexistent/flowforge-sandbox"));
        let live = LiveExecutionContext::new(&config).unwrap();

        let invocation = CodeInvocation {
            code: "return 1;".into(),
            bindings: Default::default(),
        };
        match live.execute_code(invocation).await.unwrap_err() {
            StepError::Code(message) => assert!(message.starts_with("sandbox worker failed")),
            other => panic!("expected code error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_url_surfaces_as_network_error() {
        let live = LiveExecutionContext::new(&EngineConfig::default()).unwrap();
        let spec = HttpRequestSpec {
            method: flowforge_types::node::HttpMethod::Get,
            url: "not a url".into(),
            headers: Vec::new(),
            body: None,
            timeout_ms: 1_000,
        };
        let err = live.execute_http(spec, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidRequest(_)));
    }
}
