use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::value::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogicAction {
    #[default]
    Show,
    Hide,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogicEval {
    #[default]
    And,
    Or,
}

/// Visibility rule attached to a field, a page or a collection schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Logic {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub action: LogicAction,
    #[serde(default)]
    pub eval: LogicEval,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// One comparison against the current value of `field`.
///
/// `condition` keeps the operator as written so that unknown operators
/// survive a round trip and fail only that condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    pub field: String,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Condition {
    pub fn new(field: impl Into<String>, condition: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id: None,
            file: None,
            page: None,
            field: field.into(),
            condition: condition.into(),
            value: value.into(),
            extra: BTreeMap::new(),
        }
    }
}

impl Logic {
    pub fn new(action: LogicAction, eval: LogicEval, conditions: Vec<Condition>) -> Self {
        Self {
            id: None,
            action,
            eval,
            conditions,
            extra: BTreeMap::new(),
        }
    }

    /// Field ids referenced by the conditions.
    pub fn referenced_fields(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .map(|condition| condition.field.as_str())
    }
}
