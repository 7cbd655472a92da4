//! Expression context: the read-only bindings a template can reference.
//!
//! Built fresh for every node a dry run executes, from the outputs cached so
//! far. Nothing in here is ever mutated by expression evaluation.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// BranchOutputs
// ---------------------------------------------------------------------------

/// Outputs recorded on each side of a tested `if_condition`, keyed by the
/// branch it took. Backs `$branches.true` / `$branches.false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchOutputs {
    pub on_true: Option<Value>,
    pub on_false: Option<Value>,
}

impl BranchOutputs {
    pub fn is_empty(&self) -> bool {
        self.on_true.is_none() && self.on_false.is_none()
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(v) = &self.on_true {
            map.insert("true".to_string(), v.clone());
        }
        if let Some(v) = &self.on_false {
            map.insert("false".to_string(), v.clone());
        }
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// ExpressionContext
// ---------------------------------------------------------------------------

/// Variable bindings for one node's template resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionContext {
    /// `$trigger`: the first trigger node's output binding.
    pub trigger: Option<Value>,
    /// `$steps`: output bindings keyed by step label (`"1"`, `"2a"`, ...).
    pub steps: BTreeMap<String, Value>,
    /// `$item`: the current loop item.
    pub item: Option<Value>,
    /// `$index`: the current loop index.
    pub index: Option<u64>,
    /// `$now`: RFC 3339 timestamp fixed for the whole dry run.
    pub now: String,
    /// `$branches`.
    pub branches: BranchOutputs,
    /// `$input`: the direct upstream output's `json`.
    pub input: Option<Value>,
}

impl ExpressionContext {
    pub fn new(now: impl Into<String>) -> Self {
        Self {
            now: now.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: Option<Value>) -> Self {
        self.input = input;
        self
    }

    pub fn with_item(mut self, item: Option<Value>, index: Option<u64>) -> Self {
        self.item = item;
        self.index = index;
        self
    }

    /// Resolve a `$name` root. Unknown roots are undefined.
    pub fn root(&self, name: &str) -> Option<Value> {
        match name {
            "trigger" => self.trigger.clone(),
            "steps" => Some(Value::Object(
                self.steps
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )),
            "item" => self.item.clone(),
            "index" => self.index.map(Value::from),
            "now" => Some(Value::String(self.now.clone())),
            "branches" => Some(self.branches.to_value()),
            "input" => self.input.clone(),
            _ => None,
        }
    }

    /// Bindings handed to a code step's script, as one JSON object.
    pub fn script_bindings(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("$input".into(), self.input.clone().unwrap_or(Value::Null));
        map.insert("$steps".into(), self.root("steps").unwrap_or(Value::Null));
        map.insert("$item".into(), self.item.clone().unwrap_or(Value::Null));
        map.insert("$index".into(), self.index.map(Value::from).unwrap_or(Value::Null));
        map.insert("$now".into(), Value::String(self.now.clone()));
        map
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
