use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Formula declared at document level.
///
/// Fields pick formulas up through their `formulas` list; a formula can
/// also name its target field directly with `target` (id or identifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Formula {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub expression: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Formula {
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            desc: None,
            kind: Some("calc".into()),
            scope: None,
            target: None,
            expression: expression.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn targeting(mut self, field: impl Into<String>) -> Self {
        self.target = Some(field.into());
        self
    }
}
