use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::SchemaError;
use crate::spec::logic::Logic;
use crate::value::{Value, ValueKind, is_false};

/// Field type discriminant. Unknown type strings decode to [`FieldType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    Dropdown,
    MultiSelect,
    Signature,
    Block,
    Chart,
    RichText,
    Table,
    Image,
    Collection,
    #[serde(other)]
    Unknown,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Dropdown => "dropdown",
            FieldType::MultiSelect => "multiSelect",
            FieldType::Signature => "signature",
            FieldType::Block => "block",
            FieldType::Chart => "chart",
            FieldType::RichText => "richText",
            FieldType::Table => "table",
            FieldType::Image => "image",
            FieldType::Collection => "collection",
            FieldType::Unknown => "unknown",
        }
    }

    /// Value variant a field of this type must hold (`Null` is always accepted).
    pub fn expected_kind(&self) -> Option<ValueKind> {
        match self {
            FieldType::Text
            | FieldType::Textarea
            | FieldType::Dropdown
            | FieldType::Signature
            | FieldType::Block
            | FieldType::RichText => Some(ValueKind::Text),
            FieldType::Number | FieldType::Date => Some(ValueKind::Number),
            FieldType::MultiSelect => Some(ValueKind::StringArray),
            FieldType::Table | FieldType::Chart | FieldType::Image | FieldType::Collection => {
                Some(ValueKind::ElementArray)
            }
            FieldType::Unknown => None,
        }
    }

    /// Rows or lines live in the value's element array.
    pub fn is_tabular(&self) -> bool {
        matches!(
            self,
            FieldType::Table | FieldType::Collection | FieldType::Chart
        )
    }

    /// Value a field falls back to when its formula cannot be resolved.
    pub fn default_value(&self) -> Value {
        match self.expected_kind() {
            Some(ValueKind::Text) => Value::Text(String::new()),
            Some(ValueKind::Number) if *self == FieldType::Number => Value::Number(0.0),
            Some(ValueKind::StringArray) => Value::StringArray(Vec::new()),
            Some(ValueKind::ElementArray) => Value::ElementArray(Vec::new()),
            _ => Value::Null,
        }
    }
}

/// Choice attached to dropdown, multi-select and column definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldOption {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    Text,
    Dropdown,
    MultiSelect,
    Number,
    Date,
    Image,
    Signature,
    Block,
    Barcode,
    Table,
    #[serde(other)]
    Unknown,
}

/// Column definition of a table field or a collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableColumn {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl TableColumn {
    pub fn new(id: impl Into<String>, kind: ColumnType, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            identifier: None,
            required: false,
            hidden: false,
            options: Vec::new(),
            value: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Nested table schema of a collection field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CollectionSchema {
    #[serde(default, skip_serializing_if = "is_false")]
    pub root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "tableColumns", default, skip_serializing_if = "Vec::is_empty")]
    pub table_columns: Vec<TableColumn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Logic>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// What a formula attached to a field writes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum FormulaKey {
    #[default]
    Value,
    Hidden,
}

/// Link from a field to one of the document's formulas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AppliedFormula {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub formula: String,
    #[serde(default)]
    pub key: FormulaKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Field {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Logic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(rename = "rowOrder", default, skip_serializing_if = "Vec::is_empty")]
    pub row_order: Vec<String>,
    #[serde(rename = "tableColumns", default, skip_serializing_if = "Vec::is_empty")]
    pub table_columns: Vec<TableColumn>,
    #[serde(rename = "tableColumnOrder", default, skip_serializing_if = "Vec::is_empty")]
    pub table_column_order: Vec<String>,
    #[serde(rename = "yTitle", default, skip_serializing_if = "Option::is_none")]
    pub y_title: Option<String>,
    #[serde(rename = "yMax", default, skip_serializing_if = "Option::is_none")]
    pub y_max: Option<f64>,
    #[serde(rename = "yMin", default, skip_serializing_if = "Option::is_none")]
    pub y_min: Option<f64>,
    #[serde(rename = "xTitle", default, skip_serializing_if = "Option::is_none")]
    pub x_title: Option<String>,
    #[serde(rename = "xMax", default, skip_serializing_if = "Option::is_none")]
    pub x_max: Option<f64>,
    #[serde(rename = "xMin", default, skip_serializing_if = "Option::is_none")]
    pub x_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formulas: Vec<AppliedFormula>,
    /// Nested table schemas of a collection field keyed by schema id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<BTreeMap<String, CollectionSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Field {
    pub fn new(id: impl Into<String>, kind: FieldType) -> Self {
        Self {
            id: id.into(),
            identifier: String::new(),
            title: None,
            kind,
            value: Value::Null,
            required: false,
            hidden: false,
            logic: None,
            options: Vec::new(),
            row_order: Vec::new(),
            table_columns: Vec::new(),
            table_column_order: Vec::new(),
            y_title: None,
            y_max: None,
            y_min: None,
            x_title: None,
            x_max: None,
            x_min: None,
            formulas: Vec::new(),
            schema: None,
            metadata: None,
            file: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    /// Identifier when set, id otherwise.
    pub fn reference_name(&self) -> &str {
        if self.identifier.is_empty() {
            &self.id
        } else {
            &self.identifier
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(self.reference_name())
    }

    pub fn column(&self, column_id: &str) -> Option<&TableColumn> {
        self.table_columns
            .iter()
            .find(|column| column.id == column_id)
    }

    /// Columns in `tableColumnOrder` order, falling back to declaration order.
    pub fn ordered_columns(&self) -> Vec<&TableColumn> {
        if self.table_column_order.is_empty() {
            return self.table_columns.iter().collect();
        }
        self.table_column_order
            .iter()
            .filter_map(|id| self.column(id))
            .collect()
    }

    /// Checks that the value variant matches the declared type.
    pub fn check_value(&self) -> Result<(), SchemaError> {
        let Some(expected) = self.kind.expected_kind() else {
            return Ok(());
        };
        let matches = match expected {
            _ if self.value.is_null() => true,
            ValueKind::ElementArray => self.value.as_elements().is_some(),
            ValueKind::StringArray => self.value.as_strings().is_some(),
            kind => self.value.kind() == kind,
        };
        if matches {
            Ok(())
        } else {
            Err(SchemaError::ValueTypeMismatch {
                field_id: self.id.clone(),
                expected,
                found: self.value.kind(),
            })
        }
    }

    /// Brings empty arrays to the variant the type expects and seeds a
    /// missing row order from the element array.
    pub fn normalize(&mut self) {
        match self.kind.expected_kind() {
            Some(ValueKind::ElementArray) => {
                if matches!(&self.value, Value::StringArray(items) if items.is_empty()) {
                    self.value = Value::ElementArray(Vec::new());
                }
            }
            Some(ValueKind::StringArray) => {
                if matches!(&self.value, Value::ElementArray(items) if items.is_empty()) {
                    self.value = Value::StringArray(Vec::new());
                }
            }
            _ => {}
        }
        if matches!(self.kind, FieldType::Table | FieldType::Collection)
            && self.row_order.is_empty()
            && let Value::ElementArray(rows) = &self.value
        {
            self.row_order = rows.iter().map(|row| row.id.clone()).collect();
        }
    }

    pub fn merge_metadata(&mut self, patch: &Map<String, JsonValue>) {
        let metadata = self.metadata.get_or_insert_with(Map::new);
        for (key, value) in patch {
            metadata.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_type_decodes() {
        let field: Field = serde_json::from_value(json!({
            "_id": "f1",
            "type": "hologram",
            "value": "x"
        }))
        .expect("deserialize");
        assert_eq!(field.kind, FieldType::Unknown);
        assert!(field.check_value().is_ok());
    }

    #[test]
    fn value_variant_must_match_type() {
        let field = Field::new("n1", FieldType::Number).with_value("not a number");
        let error = field.check_value().expect_err("mismatch");
        assert!(matches!(
            error,
            SchemaError::ValueTypeMismatch {
                expected: ValueKind::Number,
                found: ValueKind::Text,
                ..
            }
        ));
        assert!(Field::new("n2", FieldType::Number).check_value().is_ok());
    }

    #[test]
    fn normalize_turns_empty_list_into_rows() {
        let mut field: Field = serde_json::from_value(json!({
            "_id": "t1",
            "type": "table",
            "value": []
        }))
        .expect("deserialize");
        field.normalize();
        assert_eq!(field.value.kind(), ValueKind::ElementArray);
        assert!(field.check_value().is_ok());
    }

    #[test]
    fn defaults_follow_type() {
        assert_eq!(FieldType::Number.default_value(), Value::Number(0.0));
        assert_eq!(FieldType::Text.default_value(), Value::Text(String::new()));
        assert_eq!(
            FieldType::MultiSelect.default_value(),
            Value::StringArray(Vec::new())
        );
        assert_eq!(FieldType::Date.default_value(), Value::Null);
    }
}
