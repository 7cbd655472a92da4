//! Per-type config validation and status derivation.
//!
//! A failed validation is not an error path: it only explains why a node is
//! still `unconfigured`.

use flowforge_types::graph::{Node, NodeStatus};
use flowforge_types::node::{
    LoopMode, NodeConfig, SchedulePreset, WaitMode,
};

/// Why a node's config is incomplete, with the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: &'static str,
}

impl ValidationIssue {
    fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

fn filled(s: &str) -> bool {
    !s.trim().is_empty()
}

fn filled_opt(s: &Option<String>) -> bool {
    s.as_deref().is_some_and(filled)
}

/// Check a node's config against its type's completeness rule.
pub fn validate_node(node: &Node) -> Result<(), ValidationIssue> {
    validate_config(&node.config)
}

pub fn validate_config(config: &NodeConfig) -> Result<(), ValidationIssue> {
    let ok = |cond: bool, field, message| {
        if cond {
            Ok(())
        } else {
            Err(ValidationIssue::new(field, message))
        }
    };

    match config {
        NodeConfig::ManualTrigger(_) | NodeConfig::Merge(_) => Ok(()),
        NodeConfig::WebhookTrigger(c) => ok(filled(&c.path), "path", "webhook path is required"),
        NodeConfig::ScheduleTrigger(c) => match c.preset {
            SchedulePreset::Custom => ok(
                filled_opt(&c.cron),
                "cron",
                "a custom schedule needs a cron expression",
            ),
            _ => Ok(()),
        },
        NodeConfig::HttpRequest(c) => ok(filled(&c.url), "url", "request URL is required"),
        NodeConfig::IfCondition(c) => ok(
            c.conditions.iter().any(|row| filled(&row.field)),
            "conditions",
            "at least one condition needs a field",
        ),
        NodeConfig::SetTransform(c) => ok(
            c.fields.iter().any(|f| filled(&f.name)),
            "fields",
            "at least one field needs a name",
        ),
        NodeConfig::Code(c) => ok(filled(&c.code), "code", "code is required"),
        NodeConfig::Loop(c) => match c.mode {
            LoopMode::ForEach => ok(filled_opt(&c.source), "source", "a source array is required"),
            LoopMode::Count => ok(filled_opt(&c.count), "count", "an iteration count is required"),
        },
        NodeConfig::Wait(c) => match c.mode {
            WaitMode::Duration => ok(
                c.duration_value.is_some_and(|v| v > 0.0),
                "durationValue",
                "duration must be greater than zero",
            ),
            WaitMode::WebhookResume => Ok(()),
        },
        NodeConfig::TelegramTrigger(c)
        | NodeConfig::TelegramSendMessage(c)
        | NodeConfig::GoogleSheetsAppend(c)
        | NodeConfig::GoogleSheetsRead(c) => ok(
            filled_opt(&c.credential_id),
            "credentialId",
            "select a credential",
        ),
    }
}

/// Status after a config edit: `configured` or `unconfigured`.
///
/// `tested` and `error` never survive an edit.
pub fn derive_status(node: &Node) -> NodeStatus {
    match validate_node(node) {
        Ok(()) => NodeStatus::Configured,
        Err(_) => NodeStatus::Unconfigured,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_types::node::*;

    fn status(config: NodeConfig) -> NodeStatus {
        derive_status(&Node::with_config("n", config))
    }

    #[test]
    fn test_defaults() {
        assert_eq!(status(NodeConfig::default_for(NodeKind::ManualTrigger)), NodeStatus::Configured);
        assert_eq!(status(NodeConfig::default_for(NodeKind::Merge)), NodeStatus::Configured);
        assert_eq!(status(NodeConfig::default_for(NodeKind::Wait)), NodeStatus::Configured);
        assert_eq!(status(NodeConfig::default_for(NodeKind::Code)), NodeStatus::Configured);
        assert_eq!(status(NodeConfig::default_for(NodeKind::HttpRequest)), NodeStatus::Unconfigured);
        assert_eq!(status(NodeConfig::default_for(NodeKind::IfCondition)), NodeStatus::Unconfigured);
        assert_eq!(
            status(NodeConfig::default_for(NodeKind::GoogleSheetsRead)),
            NodeStatus::Unconfigured
        );
    }

    #[test]
    fn test_http_needs_url() {
        let mut cfg = HttpRequestConfig::default();
        cfg.url = "   ".into();
        let err = validate_config(&NodeConfig::HttpRequest(cfg.clone())).unwrap_err();
        assert_eq!(err.field, "url");
        cfg.url = "https://example.com".into();
        assert!(validate_config(&NodeConfig::HttpRequest(cfg)).is_ok());
    }

    #[test]
    fn test_custom_schedule_needs_cron() {
        let mut cfg = ScheduleTriggerConfig::default();
        cfg.preset = SchedulePreset::Custom;
        cfg.cron = None;
        assert!(validate_config(&NodeConfig::ScheduleTrigger(cfg.clone())).is_err());
        cfg.cron = Some("0 9 * * 1".into());
        assert!(validate_config(&NodeConfig::ScheduleTrigger(cfg)).is_ok());
    }

    #[test]
    fn test_loop_modes() {
        let mut cfg = LoopConfig::default();
        cfg.mode = LoopMode::Count;
        cfg.count = Some("3".into());
        assert!(validate_config(&NodeConfig::Loop(cfg.clone())).is_ok());
        cfg.mode = LoopMode::ForEach;
        cfg.source = None;
        assert_eq!(
            validate_config(&NodeConfig::Loop(cfg)).unwrap_err().field,
            "source"
        );
    }

    #[test]
    fn test_wait_duration_must_be_positive() {
        let mut cfg = WaitConfig::default();
        cfg.duration_value = Some(0.0);
        assert!(validate_config(&NodeConfig::Wait(cfg.clone())).is_err());
        cfg.mode = WaitMode::WebhookResume;
        assert!(validate_config(&NodeConfig::Wait(cfg)).is_ok());
    }

    #[test]
    fn test_if_and_set_rows() {
        let mut cfg = IfConditionConfig::default();
        cfg.conditions[0].field = "{{ $input.x }}".into();
        assert!(validate_config(&NodeConfig::IfCondition(cfg)).is_ok());

        let mut set = SetTransformConfig::default();
        set.fields[0].name = " ".into();
        assert!(validate_config(&NodeConfig::SetTransform(set.clone())).is_err());
        set.fields[0].name = "total".into();
        assert!(validate_config(&NodeConfig::SetTransform(set)).is_ok());
    }

    #[test]
    fn test_integration_needs_credential() {
        let cfg = IntegrationConfig {
            credential_id: Some("cred-1".into()),
            ..IntegrationConfig::default()
        };
        assert!(validate_config(&NodeConfig::TelegramSendMessage(cfg)).is_ok());
    }
}
