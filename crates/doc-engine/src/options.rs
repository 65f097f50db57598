use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Session settings. Every key is optional in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineOptions {
    /// Label written to the `sdk` key of changelog entries.
    pub sdk: String,
    /// Reject documents whose field values do not match their types.
    pub validate_schema: bool,
    /// Model view (e.g. `mobile`) used when listing pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    pub record_changelog: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sdk: "rust".into(),
            validate_schema: true,
            view: None,
            record_changelog: true,
        }
    }
}
