use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::EngineError;
use crate::rows::RowPath;
use crate::value::{Element, Value};

/// Kind of edit a [`Change`] carries. Unrecognised wire strings are kept in
/// [`ChangeTarget::Unsupported`] and rejected when applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeTarget {
    FieldUpdate,
    RowCreate,
    RowUpdate,
    RowDelete,
    RowMove,
    Unsupported(String),
}

impl ChangeTarget {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeTarget::FieldUpdate => "field.update",
            ChangeTarget::RowCreate => "field.value.rowCreate",
            ChangeTarget::RowUpdate => "field.value.rowUpdate",
            ChangeTarget::RowDelete => "field.value.rowDelete",
            ChangeTarget::RowMove => "field.value.rowMove",
            ChangeTarget::Unsupported(raw) => raw,
        }
    }
}

impl From<String> for ChangeTarget {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "field.update" => ChangeTarget::FieldUpdate,
            "field.value.rowCreate" => ChangeTarget::RowCreate,
            "field.value.rowUpdate" => ChangeTarget::RowUpdate,
            "field.value.rowDelete" => ChangeTarget::RowDelete,
            "field.value.rowMove" => ChangeTarget::RowMove,
            _ => ChangeTarget::Unsupported(raw),
        }
    }
}

impl From<ChangeTarget> for String {
    fn from(target: ChangeTarget) -> Self {
        target.as_str().to_string()
    }
}

impl fmt::Display for ChangeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn wire_version() -> u32 {
    1
}

/// A structured edit as exchanged with collaborators, and the changelog
/// entry emitted after applying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default = "wire_version")]
    pub v: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sdk: String,
    pub target: ChangeTarget,
    /// Document id.
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub document_id: String,
    /// Document identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identifier: String,
    #[serde(rename = "fileId", default, skip_serializing_if = "String::is_empty")]
    pub file_id: String,
    #[serde(rename = "pageId", default, skip_serializing_if = "String::is_empty")]
    pub page_id: String,
    #[serde(rename = "fieldId")]
    pub field_id: String,
    #[serde(rename = "fieldIdentifier", default, skip_serializing_if = "String::is_empty")]
    pub field_identifier: String,
    #[serde(rename = "fieldPositionId", default, skip_serializing_if = "String::is_empty")]
    pub field_position_id: String,
    #[serde(rename = "rowId", default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(rename = "schemaId", default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(rename = "parentPath", default, skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
    #[serde(default)]
    pub change: Map<String, JsonValue>,
    /// Epoch milliseconds.
    #[serde(rename = "createdOn", default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<i64>,
}

/// A change payload decoded for its target.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOp {
    FieldUpdate {
        value: Option<Value>,
        metadata: Option<Map<String, JsonValue>>,
    },
    RowCreate {
        path: RowPath,
        /// Row to insert; an empty id is replaced by a generated one.
        row: Element,
        index: Option<usize>,
    },
    RowUpdate {
        path: RowPath,
        row_id: String,
        cells: BTreeMap<String, Value>,
        metadata: Option<Map<String, JsonValue>>,
    },
    RowDelete {
        path: RowPath,
        row_id: String,
    },
    RowMove {
        row_id: String,
        index: usize,
    },
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidChange(message.into())
}

fn decode_cells(raw: &JsonValue) -> Result<BTreeMap<String, Value>, EngineError> {
    let JsonValue::Object(map) = raw else {
        return Err(invalid("cells must be an object"));
    };
    map.iter()
        .map(|(column, value)| Ok((column.clone(), Value::from_json(value.clone())?)))
        .collect()
}

fn decode_metadata(raw: Option<&JsonValue>) -> Result<Option<Map<String, JsonValue>>, EngineError> {
    match raw {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(invalid("metadata must be an object")),
    }
}

fn decode_index(raw: Option<&JsonValue>) -> Result<Option<usize>, EngineError> {
    match raw {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|index| Some(index as usize))
            .ok_or_else(|| invalid("targetRowIndex must be a non-negative integer")),
    }
}

impl Change {
    pub fn new(target: ChangeTarget, field_id: impl Into<String>) -> Self {
        Self {
            v: wire_version(),
            sdk: String::new(),
            target,
            document_id: String::new(),
            identifier: String::new(),
            file_id: String::new(),
            page_id: String::new(),
            field_id: field_id.into(),
            field_identifier: String::new(),
            field_position_id: String::new(),
            row_id: None,
            schema_id: None,
            parent_path: None,
            change: Map::new(),
            created_on: None,
        }
    }

    /// `field.update` replacing the field value.
    pub fn update_value(field_id: impl Into<String>, value: &Value) -> Self {
        Self::new(ChangeTarget::FieldUpdate, field_id).with("value", value.to_json())
    }

    /// `field.update` merging field metadata.
    pub fn update_metadata(field_id: impl Into<String>, metadata: Map<String, JsonValue>) -> Self {
        Self::new(ChangeTarget::FieldUpdate, field_id).with("metadata", JsonValue::Object(metadata))
    }

    pub fn with(mut self, key: &str, value: JsonValue) -> Self {
        self.change.insert(key.to_string(), value);
        self
    }

    pub fn with_row(mut self, row_id: impl Into<String>) -> Self {
        self.row_id = Some(row_id.into());
        self
    }

    /// Places the change under a nested collection table.
    pub fn nested(mut self, parent_path: impl Into<String>, schema_id: impl Into<String>) -> Self {
        self.parent_path = Some(parent_path.into());
        self.schema_id = Some(schema_id.into());
        self
    }

    fn payload_text(&self, key: &str) -> Option<String> {
        self.change
            .get(key)
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }

    /// Row id from the change keys, falling back to the payload.
    pub fn target_row_id(&self) -> Option<String> {
        self.row_id.clone().or_else(|| self.payload_text("rowId"))
    }

    fn row_path(&self) -> Result<RowPath, EngineError> {
        let parent_path = self.parent_path.clone().or_else(|| self.payload_text("parentPath"));
        let schema_id = self.schema_id.clone().or_else(|| self.payload_text("schemaId"));
        RowPath::parse(parent_path.as_deref(), schema_id.as_deref())
            .ok_or_else(|| invalid("malformed parentPath or missing schemaId"))
    }

    fn require_row_id(&self) -> Result<String, EngineError> {
        self.target_row_id()
            .ok_or_else(|| invalid(format!("{} requires a rowId", self.target)))
    }

    /// Decodes the payload for the change's target.
    pub fn op(&self) -> Result<ChangeOp, EngineError> {
        match &self.target {
            ChangeTarget::FieldUpdate => {
                let value = match self.change.get("value") {
                    Some(raw) => Some(Value::from_json(raw.clone())?),
                    None => None,
                };
                let metadata = decode_metadata(self.change.get("metadata"))?;
                if value.is_none() && metadata.is_none() {
                    return Err(invalid("field.update needs a value or metadata"));
                }
                Ok(ChangeOp::FieldUpdate { value, metadata })
            }
            ChangeTarget::RowCreate => {
                let mut row = match (self.change.get("row"), self.change.get("cells")) {
                    (Some(raw), _) => serde_json::from_value::<Element>(raw.clone())?,
                    (None, Some(cells)) => Element::with_cells(String::new(), decode_cells(cells)?),
                    (None, None) => Element::new(String::new()),
                };
                if let Some(metadata) = decode_metadata(self.change.get("metadata"))? {
                    let target = row.metadata.get_or_insert_with(Map::new);
                    target.extend(metadata);
                }
                Ok(ChangeOp::RowCreate {
                    path: self.row_path()?,
                    row,
                    index: decode_index(self.change.get("targetRowIndex"))?,
                })
            }
            ChangeTarget::RowUpdate => {
                let cells = match self.change.get("row") {
                    Some(row) => match row.get("cells") {
                        Some(cells) => decode_cells(cells)?,
                        None => BTreeMap::new(),
                    },
                    None => match self.change.get("cells") {
                        Some(cells) => decode_cells(cells)?,
                        None => BTreeMap::new(),
                    },
                };
                let metadata = decode_metadata(
                    self.change
                        .get("metadata")
                        .or_else(|| self.change.get("row").and_then(|row| row.get("metadata"))),
                )?;
                Ok(ChangeOp::RowUpdate {
                    path: self.row_path()?,
                    row_id: self.require_row_id()?,
                    cells,
                    metadata,
                })
            }
            ChangeTarget::RowDelete => Ok(ChangeOp::RowDelete {
                path: self.row_path()?,
                row_id: self.require_row_id()?,
            }),
            ChangeTarget::RowMove => {
                let index = decode_index(self.change.get("targetRowIndex"))?
                    .ok_or_else(|| invalid("field.value.rowMove requires targetRowIndex"))?;
                Ok(ChangeOp::RowMove {
                    row_id: self.require_row_id()?,
                    index,
                })
            }
            ChangeTarget::Unsupported(raw) => Err(EngineError::UnsupportedTarget(raw.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(value: JsonValue) -> Change {
        serde_json::from_value(value).expect("deserialize")
    }

    #[test]
    fn decodes_wire_shape() {
        let parsed = change(json!({
            "v": 1,
            "sdk": "js",
            "target": "field.update",
            "_id": "doc1",
            "identifier": "doc_one",
            "fileId": "file1",
            "pageId": "page1",
            "fieldId": "f1",
            "fieldIdentifier": "field_one",
            "fieldPositionId": "pos1",
            "change": { "value": "hello" },
            "createdOn": 1700000000000i64
        }));
        assert_eq!(parsed.target, ChangeTarget::FieldUpdate);
        assert_eq!(parsed.field_position_id, "pos1");
        assert_eq!(
            parsed.op().expect("op"),
            ChangeOp::FieldUpdate {
                value: Some(Value::Text("hello".into())),
                metadata: None
            }
        );
        let encoded = serde_json::to_value(&parsed).expect("serialize");
        assert_eq!(encoded["target"], json!("field.update"));
        assert_eq!(encoded["createdOn"], json!(1700000000000i64));
    }

    #[test]
    fn unknown_targets_are_unsupported() {
        let parsed = change(json!({ "target": "file.update", "fieldId": "f1" }));
        assert_eq!(parsed.target, ChangeTarget::Unsupported("file.update".into()));
        assert!(matches!(parsed.op(), Err(EngineError::UnsupportedTarget(raw)) if raw == "file.update"));
        assert_eq!(parsed.v, 1);
    }

    #[test]
    fn row_create_accepts_row_or_cells() {
        let with_row = change(json!({
            "target": "field.value.rowCreate",
            "fieldId": "t1",
            "change": {
                "row": { "_id": "r9", "cells": { "c1": 4 } },
                "targetRowIndex": 1,
                "metadata": { "source": "api" }
            }
        }));
        let ChangeOp::RowCreate { path, row, index } = with_row.op().expect("op") else {
            panic!("expected row create");
        };
        assert!(path.is_root());
        assert_eq!(row.id, "r9");
        assert_eq!(row.cell("c1"), Some(&Value::Number(4.0)));
        assert_eq!(row.metadata.expect("metadata")["source"], json!("api"));
        assert_eq!(index, Some(1));

        let with_cells = change(json!({
            "target": "field.value.rowCreate",
            "fieldId": "t1",
            "change": { "cells": { "c1": "x" } }
        }));
        let ChangeOp::RowCreate { row, index, .. } = with_cells.op().expect("op") else {
            panic!("expected row create");
        };
        assert!(row.id.is_empty());
        assert_eq!(index, None);
    }

    #[test]
    fn nested_rows_need_a_schema() {
        let nested = change(json!({
            "target": "field.value.rowDelete",
            "fieldId": "c1",
            "rowId": "child",
            "parentPath": "r1.s1.r2",
            "schemaId": "s2"
        }));
        let ChangeOp::RowDelete { path, row_id } = nested.op().expect("op") else {
            panic!("expected row delete");
        };
        assert_eq!(row_id, "child");
        assert_eq!(path.levels.len(), 2);

        let broken = change(json!({
            "target": "field.value.rowDelete",
            "fieldId": "c1",
            "rowId": "child",
            "parentPath": "r1"
        }));
        assert!(matches!(broken.op(), Err(EngineError::InvalidChange(_))));
    }

    #[test]
    fn row_ids_fall_back_to_payload() {
        let parsed = change(json!({
            "target": "field.value.rowUpdate",
            "fieldId": "t1",
            "change": { "rowId": "r1", "row": { "cells": { "c1": 2 } } }
        }));
        let ChangeOp::RowUpdate { row_id, cells, .. } = parsed.op().expect("op") else {
            panic!("expected row update");
        };
        assert_eq!(row_id, "r1");
        assert_eq!(cells.get("c1"), Some(&Value::Number(2.0)));
    }
}
