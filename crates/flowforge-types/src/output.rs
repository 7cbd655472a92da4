//! Dry-run results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of an `if_condition` a dry run went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchTaken {
    True,
    False,
}

impl BranchTaken {
    pub fn from_bool(b: bool) -> Self {
        if b { BranchTaken::True } else { BranchTaken::False }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BranchTaken::True => "true",
            BranchTaken::False => "false",
        }
    }
}

/// Output of a single node's dry run, cached per node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    pub json: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_taken: Option<BranchTaken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_index: Option<u64>,
}

impl NodeOutput {
    /// An output carrying only a JSON payload.
    pub fn json(json: Value) -> Self {
        Self {
            json,
            ..Self::default()
        }
    }

    /// View of this output as the `$steps[N]` / `$trigger` binding.
    ///
    /// `json` always appears; the optional fields only when present.
    pub fn to_binding(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
