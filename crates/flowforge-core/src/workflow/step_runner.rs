//! Per-type node executors for dry runs.
//!
//! `StepRunner` dispatches on the node's `NodeConfig` variant. Every executor
//! resolves its templates against the supplied `ExpressionContext` first.
//! Network and script execution are delegated to a [`StepExecutionContext`]
//! implemented in infra; everything else runs in-process with no I/O.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flowforge_types::config::HttpConfig;
use flowforge_types::graph::Node;
use flowforge_types::node::{
    AuthType, BodyType, CodeConfig, ConditionOperation, ConditionRow, Combinator, HttpMethod,
    HttpRequestConfig, IfConditionConfig, LoopConfig, LoopMode, ManualTriggerConfig, MergeConfig,
    MergeStrategy, NodeConfig, NodeKind, ScheduleTriggerConfig, SchedulePreset, SetTransformConfig,
    WaitConfig, WaitMode, WebhookMethod, WebhookTriggerConfig,
};
use flowforge_types::output::{BranchTaken, NodeOutput};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::context::ExpressionContext;
use super::expression::{number_value, resolve_template, resolve_to_string, to_js_number, to_js_string};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure classes of an `http_request` dry run, each with its own copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection refused, DNS failure, TLS failure and the like.
    #[error("could not reach {url}: {detail}")]
    Connectivity { url: String, detail: String },

    /// The server answered but the response could not be read.
    #[error("HTTP {status}: {detail}")]
    HttpStatus { status: u16, detail: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The caller's cancellation token fired mid-request.
    #[error("request aborted")]
    Aborted,
}

impl NetworkError {
    /// Text shown in the node's output panel.
    pub fn user_message(&self) -> String {
        match self {
            NetworkError::Timeout { timeout_ms } => {
                format!("Request timed out after {timeout_ms}ms")
            }
            NetworkError::Connectivity { url, detail } => format!(
                "Network error: could not reach \"{url}\" ({detail}). \
                 Try a public API (e.g., https://jsonplaceholder.typicode.com/todos/1) to test the node."
            ),
            NetworkError::HttpStatus { status, detail } => {
                format!("The server responded with HTTP {status} but the body could not be read: {detail}")
            }
            NetworkError::InvalidRequest(msg) => format!("Invalid request: {msg}"),
            NetworkError::Aborted => "Request was aborted".to_string(),
        }
    }
}

/// Errors a single node executor can raise.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("step execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    /// User script threw, timed out, or exceeded a sandbox limit.
    #[error("Code error: {0}")]
    Code(String),

    #[error("step cancelled")]
    Cancelled,

    #[error("node type \"{0}\" cannot run in this context")]
    Unsupported(NodeKind),
}

impl StepError {
    /// Text shown in the node's output panel.
    pub fn user_message(&self) -> String {
        match self {
            StepError::Execution(msg) => msg.clone(),
            StepError::Network(e) => e.user_message(),
            StepError::Code(msg) => format!("Code error: {msg}"),
            StepError::Cancelled => "Test run was cancelled".to_string(),
            StepError::Unsupported(kind) => format!("Node type \"{kind}\" has no executor"),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution context (implemented in infra)
// ---------------------------------------------------------------------------

/// A fully resolved outgoing HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequestSpec {
    pub method: HttpMethod,
    pub url: String,
    /// Header name/value pairs in insertion order.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequestSpec {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn set_header(&mut self, name: &str, value: String) {
        match self.headers.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }
}

/// The response as seen by the dry run.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponseData {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the content type says so, otherwise the text body.
    pub body: Value,
}

/// A user script plus the variables bound for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeInvocation {
    /// Function body; its `return` value is the output.
    pub code: String,
    /// `$input`, `$steps`, `$item`, `$index`, `$now` plus named mappings.
    pub bindings: Map<String, Value>,
}

/// Boxed future returned by [`StepExecutionContext`] methods.
pub type ExecFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Side-effecting collaborators of the dry run.
///
/// The trait lives here and is implemented in infra, so core never performs
/// network or script I/O itself.
pub trait StepExecutionContext: Send + Sync {
    /// Perform one HTTP request, honouring `spec.timeout_ms` and `cancel`.
    fn execute_http(
        &self,
        spec: HttpRequestSpec,
        cancel: CancellationToken,
    ) -> ExecFuture<'_, HttpResponseData, NetworkError>;

    /// Run a user script in an isolated, resource-capped environment.
    fn execute_code(&self, invocation: CodeInvocation) -> ExecFuture<'_, Value, StepError>;
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Runs one node against a prepared expression context.
pub struct StepRunner<'a> {
    exec: &'a dyn StepExecutionContext,
    http: &'a HttpConfig,
}

impl<'a> StepRunner<'a> {
    pub fn new(exec: &'a dyn StepExecutionContext, http: &'a HttpConfig) -> Self {
        Self { exec, http }
    }

    /// Run `node`. `ctx.input` is the direct upstream output's `json`.
    pub async fn run(
        &self,
        node: &Node,
        ctx: &ExpressionContext,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, StepError> {
        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        let input = ctx.input.as_ref();

        match &node.config {
            NodeConfig::ManualTrigger(c) => Ok(run_manual_trigger(c, ctx)),
            NodeConfig::WebhookTrigger(c) => Ok(run_webhook_trigger(c)),
            NodeConfig::ScheduleTrigger(c) => Ok(run_schedule_trigger(c, ctx)),
            NodeConfig::HttpRequest(c) => self.run_http(c, ctx, cancel).await,
            NodeConfig::IfCondition(c) => run_if_condition(c, input, ctx),
            NodeConfig::SetTransform(c) => Ok(run_set_transform(c, ctx)),
            NodeConfig::Code(c) => self.run_code(c, ctx, cancel).await,
            NodeConfig::Loop(c) => Ok(run_loop(c, input, ctx)),
            NodeConfig::Wait(c) => Ok(run_wait(c)),
            NodeConfig::Merge(c) => Ok(run_merge(c, input)),
            NodeConfig::TelegramTrigger(_)
            | NodeConfig::TelegramSendMessage(_)
            | NodeConfig::GoogleSheetsAppend(_)
            | NodeConfig::GoogleSheetsRead(_) => Ok(NodeOutput::json(json!({
                "message": format!("Node type \"{}\" has no executor", node.kind()),
            }))),
        }
    }

    async fn run_http(
        &self,
        cfg: &HttpRequestConfig,
        ctx: &ExpressionContext,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, StepError> {
        let spec = build_http_request(cfg, ctx, self.http);
        tracing::debug!(
            method = spec.method.as_str(),
            url = spec.url.as_str(),
            timeout_ms = spec.timeout_ms,
            "sending dry-run request"
        );

        let child = cancel.child_token();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            r = self.exec.execute_http(spec, child) => r?,
        };

        Ok(NodeOutput {
            json: response.body,
            status_code: Some(response.status),
            response_headers: Some(response.headers),
            ..NodeOutput::default()
        })
    }

    async fn run_code(
        &self,
        cfg: &CodeConfig,
        ctx: &ExpressionContext,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, StepError> {
        let mut bindings = ctx.script_bindings();
        for mapping in &cfg.input_mappings {
            let name = mapping.name.trim();
            if !name.is_empty() {
                bindings.insert(name.to_string(), resolve_template(&mapping.expression, ctx));
            }
        }

        let invocation = CodeInvocation {
            code: cfg.code.clone(),
            bindings,
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            r = self.exec.execute_code(invocation) => r?,
        };
        Ok(NodeOutput::json(result))
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

fn manual_fallback(ctx: &ExpressionContext) -> Value {
    json!({ "triggeredAt": ctx.now, "source": "manual" })
}

fn run_manual_trigger(cfg: &ManualTriggerConfig, ctx: &ExpressionContext) -> NodeOutput {
    let json = match cfg.sample_data.as_deref().filter(|s| !s.is_empty()) {
        Some(text) => serde_json::from_str(text).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "sample data is not valid JSON, using default payload");
            manual_fallback(ctx)
        }),
        None => manual_fallback(ctx),
    };
    NodeOutput::json(json)
}

fn run_webhook_trigger(cfg: &WebhookTriggerConfig) -> NodeOutput {
    let method = match cfg.method {
        WebhookMethod::Get => "GET",
        WebhookMethod::Post | WebhookMethod::Any => "POST",
    };
    NodeOutput::json(json!({
        "method": method,
        "path": format!("/{}", cfg.path),
        "headers": {
            "content-type": "application/json",
            "user-agent": "webhook-client/1.0",
        },
        "body": { "event": "test_event", "data": { "id": 1, "name": "Sample payload" } },
        "query": {},
    }))
}

fn run_schedule_trigger(cfg: &ScheduleTriggerConfig, ctx: &ExpressionContext) -> NodeOutput {
    let cron = match cfg.preset {
        SchedulePreset::Custom => cfg.cron.clone().map(Value::String).unwrap_or(Value::Null),
        preset => preset.cron().map(Value::from).unwrap_or(Value::Null),
    };
    NodeOutput::json(json!({
        "firedAt": ctx.now,
        "timezone": cfg.timezone,
        "preset": serde_json::to_value(cfg.preset).unwrap_or(Value::Null),
        "cron": cron,
    }))
}

// ---------------------------------------------------------------------------
// HTTP request building
// ---------------------------------------------------------------------------

/// Resolve templates and assemble the outgoing request.
///
/// Empty header and query keys are skipped. Auth is applied after the
/// configured headers. A body is sent only for non-GET methods with a
/// non-empty body.
pub fn build_http_request(
    cfg: &HttpRequestConfig,
    ctx: &ExpressionContext,
    http: &HttpConfig,
) -> HttpRequestSpec {
    let timeout_ms = match cfg.timeout {
        0 => http.default_timeout_ms,
        t => t,
    }
    .min(http.max_timeout_ms);

    let mut spec = HttpRequestSpec {
        method: cfg.method,
        url: resolve_to_string(&cfg.url, ctx),
        headers: Vec::new(),
        body: None,
        timeout_ms,
    };

    for kv in &cfg.headers {
        let key = kv.key.trim();
        if !key.is_empty() {
            spec.set_header(key, resolve_to_string(&kv.value, ctx));
        }
    }

    let auth = |name: &str| -> Option<String> {
        cfg.auth_config
            .as_ref()
            .and_then(|m| m.get(name))
            .map(|v| resolve_to_string(v, ctx))
    };
    let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

    let mut query: Vec<(String, String)> = cfg
        .query_params
        .iter()
        .filter(|p| !p.key.trim().is_empty())
        .map(|p| (resolve_to_string(&p.key, ctx), resolve_to_string(&p.value, ctx)))
        .collect();

    match cfg.auth_type {
        AuthType::None => {}
        AuthType::Bearer => {
            let token = auth("token");
            if present(&token) {
                spec.set_header("Authorization", format!("Bearer {}", token.unwrap_or_default()));
            }
        }
        AuthType::Basic => {
            let username = auth("username");
            if present(&username) {
                let raw = format!(
                    "{}:{}",
                    username.unwrap_or_default(),
                    auth("password").unwrap_or_default()
                );
                spec.set_header("Authorization", format!("Basic {}", BASE64.encode(raw)));
            }
        }
        AuthType::ApiKey => {
            let key_name = auth("keyName");
            if let Some(name) = key_name.filter(|n| !n.is_empty()) {
                let value = auth("keyValue").unwrap_or_default();
                if auth("placement").as_deref() == Some("query") {
                    query.push((name, value));
                } else {
                    spec.set_header(&name, value);
                }
            }
        }
    }

    if !query.is_empty() {
        let qs = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let sep = if spec.url.contains('?') { '&' } else { '?' };
        spec.url = format!("{}{sep}{qs}", spec.url);
    }

    if cfg.method != HttpMethod::Get {
        let body = cfg
            .body
            .as_deref()
            .map(|b| resolve_to_string(b, ctx))
            .filter(|b| !b.is_empty());
        if let Some(body) = body {
            match cfg.body_type {
                BodyType::Json if spec.header("Content-Type").is_none() => {
                    spec.set_header("Content-Type", "application/json".to_string());
                }
                BodyType::Form => {
                    spec.set_header(
                        "Content-Type",
                        "application/x-www-form-urlencoded".to_string(),
                    );
                }
                _ => {}
            }
            spec.body = Some(body);
        }
    }

    spec
}

// ---------------------------------------------------------------------------
// Flow control
// ---------------------------------------------------------------------------

/// `String(v)` as JS prints it, including `undefined` and `null`.
fn string_form(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(v) => to_js_string(v),
    }
}

fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn evaluate_row(
    row: &ConditionRow,
    input: Option<&Value>,
    ctx: &ExpressionContext,
) -> Result<bool, StepError> {
    let resolved = resolve_template(&row.field, ctx);
    // A bare name with no placeholder reads a property of the input.
    let field = if resolved.as_str() == Some(row.field.as_str()) && !row.field.contains("{{") {
        input.and_then(|v| v.get(row.field.as_str())).cloned()
    } else {
        Some(resolved)
    };
    let field = field.as_ref();
    let compare = resolve_template(&row.value, ctx);
    let compare = Some(&compare);

    Ok(match row.operation {
        ConditionOperation::Equals => string_form(field) == string_form(compare),
        ConditionOperation::NotEquals => string_form(field) != string_form(compare),
        ConditionOperation::Contains => string_form(field).contains(&string_form(compare)),
        ConditionOperation::GreaterThan => to_js_number(field) > to_js_number(compare),
        ConditionOperation::LessThan => to_js_number(field) < to_js_number(compare),
        ConditionOperation::IsEmpty => is_empty_value(field),
        ConditionOperation::IsNotEmpty => !is_empty_value(field),
        ConditionOperation::Regex => {
            let pattern = string_form(compare);
            let re = regex::Regex::new(&pattern).map_err(|e| {
                StepError::Execution(format!("Invalid regular expression /{pattern}/: {e}"))
            })?;
            re.is_match(&string_form(field))
        }
    })
}

fn run_if_condition(
    cfg: &IfConditionConfig,
    input: Option<&Value>,
    ctx: &ExpressionContext,
) -> Result<NodeOutput, StepError> {
    let results = cfg
        .conditions
        .iter()
        .map(|row| evaluate_row(row, input, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let passed = match cfg.combinator {
        Combinator::And => results.iter().all(|r| *r),
        Combinator::Or => results.iter().any(|r| *r),
    };
    tracing::debug!(rows = results.len(), passed, "if condition evaluated");

    Ok(NodeOutput {
        json: input.cloned().unwrap_or(Value::Null),
        branch_taken: Some(BranchTaken::from_bool(passed)),
        ..NodeOutput::default()
    })
}

fn run_set_transform(cfg: &SetTransformConfig, ctx: &ExpressionContext) -> NodeOutput {
    let json: Map<String, Value> = cfg
        .fields
        .iter()
        .filter(|f| !f.name.trim().is_empty())
        .map(|f| (f.name.clone(), resolve_template(&f.value, ctx)))
        .collect();
    NodeOutput::json(Value::Object(json))
}

fn run_loop(cfg: &LoopConfig, input: Option<&Value>, ctx: &ExpressionContext) -> NodeOutput {
    match cfg.mode {
        LoopMode::Count => {
            let resolved = resolve_template(cfg.count.as_deref().unwrap_or("1"), ctx);
            let n = to_js_number(Some(&resolved));
            let count = if n.is_nan() || n == 0.0 { 1.0 } else { n };
            let count = number_value(count);
            NodeOutput {
                json: json!({
                    "mode": "count",
                    "totalIterations": count,
                    "note": format!("Test shows iteration 0 of {}", to_js_string(&count)),
                }),
                preview_item: Some(json!({ "index": 0 })),
                preview_index: Some(0),
                ..NodeOutput::default()
            }
        }
        LoopMode::ForEach => {
            let resolved = resolve_template(cfg.source.as_deref().unwrap_or(""), ctx);
            let items = match resolved {
                Value::Array(items) => items,
                v if is_truthy(&v) => vec![v],
                _ => match input {
                    Some(Value::Array(items)) => items.clone(),
                    _ => vec![json!({ "sample": "item" })],
                },
            };
            let first = items.first().cloned();
            let mut json = json!({
                "mode": "forEach",
                "totalItems": items.len(),
                "note": format!("Test shows iteration 0 of {}", items.len()),
            });
            if let (Some(obj), Some(first)) = (json.as_object_mut(), first.clone()) {
                obj.insert("previewItem".to_string(), first);
            }
            NodeOutput {
                json,
                preview_item: first,
                preview_index: Some(0),
                ..NodeOutput::default()
            }
        }
    }
}

fn run_wait(cfg: &WaitConfig) -> NodeOutput {
    let would = match cfg.mode {
        WaitMode::Duration => format!(
            "{} {}",
            cfg.duration_value
                .map(|v| to_js_string(&number_value(v)))
                .unwrap_or_else(|| "undefined".to_string()),
            cfg.duration_unit.map(|u| u.as_str()).unwrap_or("undefined"),
        ),
        WaitMode::WebhookResume => "webhook resume".to_string(),
    };
    NodeOutput::json(json!({
        "skippedWait": true,
        "note": "Wait is skipped in test mode",
        "wouldHaveWaited": would,
    }))
}

fn run_merge(cfg: &MergeConfig, input: Option<&Value>) -> NodeOutput {
    let input = input.cloned().unwrap_or(Value::Null);
    let as_items = |v: Value| match v {
        Value::Array(items) => items,
        other => vec![other],
    };

    match cfg.strategy {
        MergeStrategy::ChooseBranch => NodeOutput::json(input),
        MergeStrategy::Append => NodeOutput::json(Value::Array(as_items(input))),
        MergeStrategy::CombineByKey => {
            let key = cfg.key_field.as_deref().filter(|k| !k.is_empty()).unwrap_or("id");
            // First-seen key order; later items replace earlier ones.
            let mut merged: Vec<(String, Value)> = Vec::new();
            for item in as_items(input) {
                let Some(obj) = item.as_object() else { continue };
                let key_val = obj
                    .get(key)
                    .filter(|v| !v.is_null())
                    .map(to_js_string)
                    .unwrap_or_default();
                match merged.iter_mut().find(|(k, _)| *k == key_val) {
                    Some(slot) => slot.1 = item,
                    None => merged.push((key_val, item)),
                }
            }
            NodeOutput::json(Value::Array(merged.into_iter().map(|(_, v)| v).collect()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
