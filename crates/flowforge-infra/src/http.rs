//! reqwest-backed executor for `http_request` dry runs.
//!
//! Applies the per-request timeout, races the caller's cancellation token,
//! and classifies failures into the [`NetworkError`] classes the node panel
//! distinguishes.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use flowforge_core::workflow::step_runner::{HttpRequestSpec, HttpResponseData, NetworkError};
use flowforge_types::config::HttpConfig;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Shared HTTP client for dry-run requests.
#[derive(Debug, Clone)]
pub struct ReqwestHttpExecutor {
    client: reqwest::Client,
}

impl ReqwestHttpExecutor {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }

    /// Send one request. Non-2xx answers are returned as responses; only
    /// transport failures become errors.
    pub async fn execute(
        &self,
        spec: HttpRequestSpec,
        cancel: CancellationToken,
    ) -> Result<HttpResponseData, NetworkError> {
        let timeout_ms = spec.timeout_ms;
        let url = spec.url.clone();
        let request = self.build(spec)?;
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NetworkError::Aborted),
            r = tokio::time::timeout(Duration::from_millis(timeout_ms), send(request, &url, timeout_ms)) => {
                r.unwrap_or(Err(NetworkError::Timeout { timeout_ms }))
            }
        };

        match &result {
            Ok(response) => tracing::info!(
                url = url.as_str(),
                status = response.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "dry-run request completed"
            ),
            Err(err) => tracing::warn!(url = url.as_str(), error = %err, "dry-run request failed"),
        }
        result
    }

    fn build(&self, spec: HttpRequestSpec) -> Result<reqwest::RequestBuilder, NetworkError> {
        let url = reqwest::Url::parse(&spec.url)
            .map_err(|e| NetworkError::InvalidRequest(format!("invalid URL \"{}\": {e}", spec.url)))?;
        let method = reqwest::Method::from_bytes(spec.method.as_str().as_bytes())
            .map_err(|e| NetworkError::InvalidRequest(format!("invalid HTTP method: {e}")))?;

        let mut request = self
            .client
            .request(method, url)
            .timeout(Duration::from_millis(spec.timeout_ms));
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = spec.body {
            request = request.body(body);
        }
        Ok(request)
    }
}

async fn send(
    request: reqwest::RequestBuilder,
    url: &str,
    timeout_ms: u64,
) -> Result<HttpResponseData, NetworkError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify(e, url, timeout_ms))?;

    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let is_json = headers
        .get("content-type")
        .is_some_and(|ct| ct.contains("application/json") || ct.contains("+json"));

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            NetworkError::Timeout { timeout_ms }
        } else {
            NetworkError::HttpStatus { status, detail: e.to_string() }
        }
    })?;
    let text = String::from_utf8_lossy(&bytes);

    let body = if is_json {
        serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
    } else {
        Value::String(text.into_owned())
    };

    Ok(HttpResponseData { status, headers, body })
}

fn classify(err: reqwest::Error, url: &str, timeout_ms: u64) -> NetworkError {
    if err.is_timeout() {
        NetworkError::Timeout { timeout_ms }
    } else if err.is_builder() {
        NetworkError::InvalidRequest(err.to_string())
    } else {
        NetworkError::Connectivity {
            url: url.to_string(),
            detail: root_cause(&err),
        }
    }
}

fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
