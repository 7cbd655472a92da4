//! Node types and their per-type configuration payloads.
//!
//! `NodeConfig` is a closed sum type: the node's type tag is derived from the
//! config variant, so a config can never be paired with the wrong tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Node kind catalog
// ---------------------------------------------------------------------------

/// The closed set of node type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    ManualTrigger,
    WebhookTrigger,
    ScheduleTrigger,
    TelegramTrigger,
    HttpRequest,
    IfCondition,
    SetTransform,
    Code,
    Loop,
    Wait,
    Merge,
    TelegramSendMessage,
    GoogleSheetsAppend,
    GoogleSheetsRead,
}

/// Broad grouping used by the editor palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    Action,
    FlowControl,
    Integration,
}

impl NodeKind {
    /// Every kind, in palette order.
    pub const ALL: [NodeKind; 14] = [
        NodeKind::ManualTrigger,
        NodeKind::WebhookTrigger,
        NodeKind::ScheduleTrigger,
        NodeKind::TelegramTrigger,
        NodeKind::HttpRequest,
        NodeKind::SetTransform,
        NodeKind::Code,
        NodeKind::IfCondition,
        NodeKind::Loop,
        NodeKind::Wait,
        NodeKind::Merge,
        NodeKind::TelegramSendMessage,
        NodeKind::GoogleSheetsAppend,
        NodeKind::GoogleSheetsRead,
    ];

    /// The wire tag (e.g. `"if_condition"`).
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::ManualTrigger => "manual_trigger",
            NodeKind::WebhookTrigger => "webhook_trigger",
            NodeKind::ScheduleTrigger => "schedule_trigger",
            NodeKind::TelegramTrigger => "telegram_trigger",
            NodeKind::HttpRequest => "http_request",
            NodeKind::IfCondition => "if_condition",
            NodeKind::SetTransform => "set_transform",
            NodeKind::Code => "code",
            NodeKind::Loop => "loop",
            NodeKind::Wait => "wait",
            NodeKind::Merge => "merge",
            NodeKind::TelegramSendMessage => "telegram_send_message",
            NodeKind::GoogleSheetsAppend => "google_sheets_append",
            NodeKind::GoogleSheetsRead => "google_sheets_read",
        }
    }

    /// Parse a wire tag.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }

    pub fn category(self) -> NodeCategory {
        match self {
            NodeKind::ManualTrigger | NodeKind::WebhookTrigger | NodeKind::ScheduleTrigger => {
                NodeCategory::Trigger
            }
            NodeKind::HttpRequest | NodeKind::SetTransform | NodeKind::Code => NodeCategory::Action,
            NodeKind::IfCondition | NodeKind::Loop | NodeKind::Wait | NodeKind::Merge => {
                NodeCategory::FlowControl
            }
            NodeKind::TelegramTrigger
            | NodeKind::TelegramSendMessage
            | NodeKind::GoogleSheetsAppend
            | NodeKind::GoogleSheetsRead => NodeCategory::Integration,
        }
    }

    /// Whether this kind starts a workflow. `telegram_trigger` is an
    /// integration by category but still a trigger.
    pub fn is_trigger(self) -> bool {
        matches!(
            self,
            NodeKind::ManualTrigger
                | NodeKind::WebhookTrigger
                | NodeKind::ScheduleTrigger
                | NodeKind::TelegramTrigger
        )
    }

    pub fn default_label(self) -> &'static str {
        match self {
            NodeKind::ManualTrigger => "Manual Trigger",
            NodeKind::WebhookTrigger => "Webhook",
            NodeKind::ScheduleTrigger => "Schedule / Cron",
            NodeKind::TelegramTrigger => "Telegram — Message",
            NodeKind::HttpRequest => "HTTP Request",
            NodeKind::IfCondition => "IF / Condition",
            NodeKind::SetTransform => "Set / Transform",
            NodeKind::Code => "Code",
            NodeKind::Loop => "Loop",
            NodeKind::Wait => "Wait",
            NodeKind::Merge => "Merge",
            NodeKind::TelegramSendMessage => "Telegram — Send Message",
            NodeKind::GoogleSheetsAppend => "Google Sheets — Append",
            NodeKind::GoogleSheetsRead => "Google Sheets — Read",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            NodeKind::ManualTrigger => "Start this workflow manually",
            NodeKind::WebhookTrigger => "Trigger on incoming HTTP request",
            NodeKind::ScheduleTrigger => "Run on a time-based schedule",
            NodeKind::TelegramTrigger => "Trigger when your Telegram bot gets a message",
            NodeKind::HttpRequest => "Make a request to any API endpoint",
            NodeKind::IfCondition => "Branch the flow based on conditions",
            NodeKind::SetTransform => "Create or transform data fields",
            NodeKind::Code => "Run custom JavaScript in a sandbox",
            NodeKind::Loop => "Iterate over a list or repeat N times",
            NodeKind::Wait => "Pause execution for a duration",
            NodeKind::Merge => "Combine outputs from parallel branches",
            NodeKind::TelegramSendMessage => "Send a message via your Telegram bot",
            NodeKind::GoogleSheetsAppend => "Append a row to a Google Sheet",
            NodeKind::GoogleSheetsRead => "Read rows from a Google Sheet",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Config union
// ---------------------------------------------------------------------------

/// Type-specific node configuration.
///
/// Adjacently tagged so that a node serializes as
/// `{ "type": "http_request", "config": { ... } }` once flattened into `Node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum NodeConfig {
    ManualTrigger(ManualTriggerConfig),
    WebhookTrigger(WebhookTriggerConfig),
    ScheduleTrigger(ScheduleTriggerConfig),
    TelegramTrigger(IntegrationConfig),
    HttpRequest(HttpRequestConfig),
    IfCondition(IfConditionConfig),
    SetTransform(SetTransformConfig),
    Code(CodeConfig),
    Loop(LoopConfig),
    Wait(WaitConfig),
    Merge(MergeConfig),
    TelegramSendMessage(IntegrationConfig),
    GoogleSheetsAppend(IntegrationConfig),
    GoogleSheetsRead(IntegrationConfig),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::ManualTrigger(_) => NodeKind::ManualTrigger,
            NodeConfig::WebhookTrigger(_) => NodeKind::WebhookTrigger,
            NodeConfig::ScheduleTrigger(_) => NodeKind::ScheduleTrigger,
            NodeConfig::TelegramTrigger(_) => NodeKind::TelegramTrigger,
            NodeConfig::HttpRequest(_) => NodeKind::HttpRequest,
            NodeConfig::IfCondition(_) => NodeKind::IfCondition,
            NodeConfig::SetTransform(_) => NodeKind::SetTransform,
            NodeConfig::Code(_) => NodeKind::Code,
            NodeConfig::Loop(_) => NodeKind::Loop,
            NodeConfig::Wait(_) => NodeKind::Wait,
            NodeConfig::Merge(_) => NodeKind::Merge,
            NodeConfig::TelegramSendMessage(_) => NodeKind::TelegramSendMessage,
            NodeConfig::GoogleSheetsAppend(_) => NodeKind::GoogleSheetsAppend,
            NodeConfig::GoogleSheetsRead(_) => NodeKind::GoogleSheetsRead,
        }
    }

    /// The palette default for a freshly added node of `kind`.
    pub fn default_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::ManualTrigger => NodeConfig::ManualTrigger(ManualTriggerConfig::default()),
            NodeKind::WebhookTrigger => NodeConfig::WebhookTrigger(WebhookTriggerConfig::default()),
            NodeKind::ScheduleTrigger => {
                NodeConfig::ScheduleTrigger(ScheduleTriggerConfig::default())
            }
            NodeKind::TelegramTrigger => NodeConfig::TelegramTrigger(IntegrationConfig::default()),
            NodeKind::HttpRequest => NodeConfig::HttpRequest(HttpRequestConfig::default()),
            NodeKind::IfCondition => NodeConfig::IfCondition(IfConditionConfig::default()),
            NodeKind::SetTransform => NodeConfig::SetTransform(SetTransformConfig::default()),
            NodeKind::Code => NodeConfig::Code(CodeConfig::default()),
            NodeKind::Loop => NodeConfig::Loop(LoopConfig::default()),
            NodeKind::Wait => NodeConfig::Wait(WaitConfig::default()),
            NodeKind::Merge => NodeConfig::Merge(MergeConfig::default()),
            NodeKind::TelegramSendMessage => {
                NodeConfig::TelegramSendMessage(IntegrationConfig::default())
            }
            NodeKind::GoogleSheetsAppend => {
                NodeConfig::GoogleSheetsAppend(IntegrationConfig::default())
            }
            NodeKind::GoogleSheetsRead => NodeConfig::GoogleSheetsRead(IntegrationConfig::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualTriggerConfig {
    /// Sample payload as JSON text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookMethod {
    Get,
    Post,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Immediately,
    AfterWorkflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTriggerConfig {
    pub path: String,
    pub method: WebhookMethod,
    pub response_mode: ResponseMode,
}

impl Default for WebhookTriggerConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            method: WebhookMethod::Post,
            response_mode: ResponseMode::Immediately,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePreset {
    #[serde(rename = "every_5m")]
    Every5m,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl SchedulePreset {
    /// Cron expression for the fixed presets; `None` for `Custom`.
    pub fn cron(self) -> Option<&'static str> {
        match self {
            SchedulePreset::Every5m => Some("*/5 * * * *"),
            SchedulePreset::Hourly => Some("0 * * * *"),
            SchedulePreset::Daily => Some("0 9 * * *"),
            SchedulePreset::Weekly => Some("0 9 * * 1"),
            SchedulePreset::Monthly => Some("0 9 1 * *"),
            SchedulePreset::Custom => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTriggerConfig {
    pub preset: SchedulePreset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    pub timezone: String,
}

impl Default for ScheduleTriggerConfig {
    fn default() -> Self {
        Self {
            preset: SchedulePreset::Daily,
            cron: None,
            timezone: "UTC".to_string(),
        }
    }
}

/// Config for credential-backed integration nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    /// Integration-specific fields, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// HTTP request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    Json,
    Form,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Bearer,
    Basic,
    ApiKey,
}

/// A `{ key, value }` row (headers, query params).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    #[serde(default)]
    pub query_params: Vec<KeyValue>,
    pub body_type: BodyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub auth_type: AuthType,
    /// Keys: `token`, `username`, `password`, `keyName`, `keyValue`, `placement`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<BTreeMap<String, String>>,
    /// Request timeout in milliseconds.
    pub timeout: u64,
}

impl Default for HttpRequestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            query_params: Vec::new(),
            body_type: BodyType::Json,
            body: None,
            auth_type: AuthType::None,
            auth_config: None,
            timeout: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Flow control
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperation {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRow {
    pub id: String,
    pub field: String,
    pub operation: ConditionOperation,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfConditionConfig {
    pub combinator: Combinator,
    #[serde(default)]
    pub conditions: Vec<ConditionRow>,
}

impl Default for IfConditionConfig {
    fn default() -> Self {
        Self {
            combinator: Combinator::And,
            conditions: vec![ConditionRow {
                id: "c-1".to_string(),
                field: String::new(),
                operation: ConditionOperation::Equals,
                value: String::new(),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetField {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTransformConfig {
    #[serde(default)]
    pub fields: Vec<SetField>,
}

impl Default for SetTransformConfig {
    fn default() -> Self {
        Self {
            fields: vec![SetField {
                id: "f-1".to_string(),
                ..SetField::default()
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputMapping {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeConfig {
    pub code: String,
    #[serde(default)]
    pub input_mappings: Vec<InputMapping>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            code: "// Return the output data\nreturn $input".to_string(),
            input_mappings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopMode {
    ForEach,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnItemError {
    StopAll,
    SkipItem,
    StopLoop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    pub mode: LoopMode,
    /// Expression yielding the array for `forEach`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Number or expression for `count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<String>,
    pub batch_size: u32,
    pub on_item_error: OnItemError,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            mode: LoopMode::ForEach,
            source: None,
            count: None,
            batch_size: 1,
            on_item_error: OnItemError::StopAll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitMode {
    Duration,
    WebhookResume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Seconds,
    Minutes,
    Hours,
}

impl DurationUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            DurationUnit::Seconds => "seconds",
            DurationUnit::Minutes => "minutes",
            DurationUnit::Hours => "hours",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    pub mode: WaitMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_unit: Option<DurationUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_hours: Option<f64>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            mode: WaitMode::Duration,
            duration_value: Some(5.0),
            duration_unit: Some(DurationUnit::Minutes),
            max_wait_hours: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Append,
    ChooseBranch,
    CombineByKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    pub strategy: MergeStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Append,
            key_field: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_tags_roundtrip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
            assert_eq!(NodeConfig::default_for(kind).kind(), kind);
        }
        assert_eq!(NodeKind::parse("nope"), None);
    }

    #[test]
    fn test_telegram_trigger_is_integration_but_triggers() {
        assert_eq!(NodeKind::TelegramTrigger.category(), NodeCategory::Integration);
        assert!(NodeKind::TelegramTrigger.is_trigger());
        assert!(!NodeKind::HttpRequest.is_trigger());
    }

    #[test]
    fn test_config_adjacent_tagging() {
        let cfg = NodeConfig::Merge(MergeConfig {
            strategy: MergeStrategy::CombineByKey,
            key_field: Some("id".to_string()),
        });
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(
            v,
            json!({ "type": "merge", "config": { "strategy": "combine_by_key", "keyField": "id" } })
        );
    }

    #[test]
    fn test_http_config_wire_shape() {
        let v = json!({
            "url": "https://example.com",
            "method": "POST",
            "headers": [{ "key": "X-A", "value": "1" }],
            "queryParams": [],
            "bodyType": "json",
            "body": "{}",
            "authType": "api_key",
            "authConfig": { "keyName": "k", "keyValue": "v", "placement": "query" },
            "timeout": 3000
        });
        let cfg: HttpRequestConfig = serde_json::from_value(v).unwrap();
        assert_eq!(cfg.method, HttpMethod::Post);
        assert_eq!(cfg.auth_type, AuthType::ApiKey);
        assert_eq!(cfg.timeout, 3000);
    }

    #[test]
    fn test_schedule_preset_cron() {
        assert_eq!(SchedulePreset::Every5m.cron(), Some("*/5 * * * *"));
        assert_eq!(SchedulePreset::Custom.cron(), None);
        let p: SchedulePreset = serde_json::from_value(json!("every_5m")).unwrap();
        assert_eq!(p, SchedulePreset::Every5m);
    }

    #[test]
    fn test_integration_config_keeps_extra_fields() {
        let v = json!({ "credentialId": "cred-1", "chatId": "42" });
        let cfg: IntegrationConfig = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(cfg.credential_id.as_deref(), Some("cred-1"));
        assert_eq!(cfg.extra["chatId"], json!("42"));
        assert_eq!(serde_json::to_value(&cfg).unwrap(), v);
    }
}
