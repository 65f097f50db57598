use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Dynamically typed value stored in a field, a table cell or a dictionary entry.
///
/// On the wire every variant maps onto plain JSON. Arrays decode to
/// [`Value::ElementArray`] when every item is an object and to
/// [`Value::StringArray`] otherwise; `[]` decodes to an empty string array,
/// which compares equal to an empty element array.
#[derive(Debug, Clone, Default)]
pub enum Value {
    Number(f64),
    Text(String),
    StringArray(Vec<String>),
    ElementArray(Vec<Element>),
    Dict(BTreeMap<String, Value>),
    Bool(bool),
    #[default]
    Null,
}

/// Variant tag used in diagnostics and schema checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Text,
    StringArray,
    ElementArray,
    Dict,
    Bool,
    Null,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Text => "text",
            ValueKind::StringArray => "string array",
            ValueKind::ElementArray => "element array",
            ValueKind::Dict => "dictionary",
            ValueKind::Bool => "boolean",
            ValueKind::Null => "null",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Text(_) => ValueKind::Text,
            Value::StringArray(_) => ValueKind::StringArray,
            Value::ElementArray(_) => ValueKind::ElementArray,
            Value::Dict(_) => ValueKind::Dict,
            Value::Bool(_) => ValueKind::Bool,
            Value::Null => ValueKind::Null,
        }
    }

    /// Empty strings, arrays and dictionaries, `false` and `Null` are empty.
    /// Numbers never are, zero included.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Number(_) => false,
            Value::Text(text) => text.is_empty(),
            Value::StringArray(items) => items.is_empty(),
            Value::ElementArray(items) => items.is_empty(),
            Value::Dict(map) => map.is_empty(),
            Value::Bool(flag) => !flag,
            Value::Null => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Value::StringArray(items) => Some(items),
            Value::ElementArray(items) if items.is_empty() => Some(&[]),
            _ => None,
        }
    }

    pub fn as_elements(&self) -> Option<&[Element]> {
        match self {
            Value::ElementArray(items) => Some(items),
            Value::StringArray(items) if items.is_empty() => Some(&[]),
            _ => None,
        }
    }

    /// Mutable access to the element list, turning an empty string array or
    /// `Null` into an empty element array first.
    pub fn elements_mut(&mut self) -> Option<&mut Vec<Element>> {
        if self.is_null() || matches!(self, Value::StringArray(items) if items.is_empty()) {
            *self = Value::ElementArray(Vec::new());
        }
        match self {
            Value::ElementArray(items) => Some(items),
            _ => None,
        }
    }

    /// Text rendering used by string concatenation and condition matching.
    pub fn to_text(&self) -> String {
        match self {
            Value::Number(number) => format_number(*number),
            Value::Text(text) => text.clone(),
            Value::StringArray(items) => items.join(","),
            Value::ElementArray(items) => items
                .iter()
                .map(|element| element.id.clone())
                .collect::<Vec<_>>()
                .join(","),
            Value::Dict(_) => self.to_json().to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Null => String::new(),
        }
    }

    /// Numeric reading: numbers as-is, numeric text parsed, booleans as 1/0.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            Value::Text(text) => text.trim().parse::<f64>().ok(),
            Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Value::Bool(flag) => *flag,
            Value::Number(number) => *number != 0.0,
            Value::Text(text) => !text.is_empty() && !text.eq_ignore_ascii_case("false"),
            other => !other.is_empty(),
        }
    }

    /// Reads the value as a list of strings. A non-empty scalar becomes a
    /// single-item list.
    pub fn to_string_array(&self) -> Vec<String> {
        match self {
            Value::StringArray(items) => items.clone(),
            Value::ElementArray(items) => items.iter().map(|element| element.id.clone()).collect(),
            Value::Null => Vec::new(),
            Value::Text(text) if text.is_empty() => Vec::new(),
            other => vec![other.to_text()],
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    pub fn from_json(json: JsonValue) -> Result<Value, serde_json::Error> {
        Ok(match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(flag) => Value::Bool(flag),
            JsonValue::Number(number) => number.as_f64().map_or(Value::Null, Value::Number),
            JsonValue::String(text) => Value::Text(text),
            JsonValue::Array(items) => {
                if !items.is_empty() && items.iter().all(JsonValue::is_object) {
                    let elements = items
                        .into_iter()
                        .map(serde_json::from_value::<Element>)
                        .collect::<Result<Vec<_>, _>>()?;
                    Value::ElementArray(elements)
                } else {
                    Value::StringArray(items.into_iter().map(scalar_text).collect())
                }
            }
            JsonValue::Object(map) => {
                let mut dict = BTreeMap::new();
                for (key, value) in map {
                    dict.insert(key, Value::from_json(value)?);
                }
                Value::Dict(dict)
            }
        })
    }
}

fn scalar_text(item: JsonValue) -> String {
    match item {
        JsonValue::String(text) => text,
        JsonValue::Null => String::new(),
        JsonValue::Number(number) => number.as_f64().map(format_number).unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Integral numbers print without a fractional part.
pub fn format_number(number: f64) -> String {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(left), Value::Number(right)) => left == right,
            (Value::Text(left), Value::Text(right)) => left == right,
            (Value::StringArray(left), Value::StringArray(right)) => left == right,
            (Value::ElementArray(left), Value::ElementArray(right)) => left == right,
            (Value::StringArray(strings), Value::ElementArray(elements))
            | (Value::ElementArray(elements), Value::StringArray(strings)) => {
                strings.is_empty() && elements.is_empty()
            }
            (Value::Dict(left), Value::Dict(right)) => left == right,
            (Value::Bool(left), Value::Bool(right)) => left == right,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(number) => {
                if !number.is_finite() {
                    serializer.serialize_none()
                } else if number.fract() == 0.0 && number.abs() < 9.0e15 {
                    serializer.serialize_i64(*number as i64)
                } else {
                    serializer.serialize_f64(*number)
                }
            }
            Value::Text(text) => serializer.serialize_str(text),
            Value::StringArray(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::ElementArray(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dict(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Value::Bool(flag) => serializer.serialize_bool(*flag),
            Value::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        Value::from_json(raw).map_err(de::Error::custom)
    }
}

impl JsonSchema for Value {
    fn schema_name() -> Cow<'static, str> {
        "Value".into()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        let element = generator.subschema_for::<Element>();
        json_schema!({
            "description": "Field or cell value: number, text, string list, element list, dictionary, boolean or null.",
            "anyOf": [
                { "type": "number" },
                { "type": "string" },
                { "type": "boolean" },
                { "type": "null" },
                { "type": "array", "items": { "type": "string" } },
                { "type": "array", "items": element },
                { "type": "object", "additionalProperties": true }
            ]
        })
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::StringArray(value)
    }
}

impl From<Vec<Element>> for Value {
    fn from(value: Vec<Element>) -> Self {
        Value::ElementArray(value)
    }
}

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

/// A table or collection row, a chart line, or an uploaded file entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Element {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cells: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(rename = "filePath", default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, JsonValue>>,
    /// Nested collection rows keyed by child schema id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, NestedRows>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Element {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_cells(id: impl Into<String>, cells: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            cells: Some(cells),
            ..Self::default()
        }
    }

    pub fn cell(&self, column_id: &str) -> Option<&Value> {
        self.cells.as_ref().and_then(|cells| cells.get(column_id))
    }
}

/// Rows of one nested schema inside a collection row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NestedRows {
    #[serde(default)]
    pub value: Vec<Element>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// Chart point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: &Value) -> Value {
        let encoded = serde_json::to_string(value).expect("encode");
        serde_json::from_str(&encoded).expect("decode")
    }

    #[test]
    fn every_variant_round_trips() {
        let mut cells = BTreeMap::new();
        cells.insert("col1".to_string(), Value::Text("a".into()));
        cells.insert("col2".to_string(), Value::Number(2.5));
        let mut row = Element::with_cells("row1", cells);
        row.deleted = true;
        let mut dict = BTreeMap::new();
        dict.insert("nested".to_string(), Value::StringArray(vec!["x".into()]));

        let values = vec![
            Value::Number(42.0),
            Value::Number(-0.125),
            Value::Text("hello".into()),
            Value::Text(String::new()),
            Value::StringArray(vec!["a".into(), "b".into()]),
            Value::StringArray(Vec::new()),
            Value::ElementArray(vec![row]),
            Value::ElementArray(Vec::new()),
            Value::Dict(dict),
            Value::Bool(false),
            Value::Null,
        ];
        for value in values {
            assert_eq!(round_trip(&value), value, "variant {:?}", value.kind());
        }
    }

    #[test]
    fn integral_numbers_encode_without_fraction() {
        assert_eq!(Value::Number(3.0).to_json(), json!(3));
        assert_eq!(Value::Number(3.5).to_json(), json!(3.5));
    }

    #[test]
    fn arrays_pick_variant_from_items() {
        let elements: Value =
            serde_json::from_value(json!([{ "_id": "r1", "cells": { "c": 1 } }])).expect("decode");
        assert_eq!(elements.kind(), ValueKind::ElementArray);

        let strings: Value = serde_json::from_value(json!(["a", 2])).expect("decode");
        assert_eq!(strings, Value::StringArray(vec!["a".into(), "2".into()]));
    }

    #[test]
    fn empty_arrays_compare_equal_across_variants() {
        assert_eq!(Value::StringArray(Vec::new()), Value::ElementArray(Vec::new()));
        assert_ne!(
            Value::StringArray(vec!["a".into()]),
            Value::ElementArray(Vec::new())
        );
    }

    #[test]
    fn emptiness_per_variant() {
        assert!(Value::Text(String::new()).is_empty());
        assert!(Value::StringArray(Vec::new()).is_empty());
        assert!(Value::Dict(BTreeMap::new()).is_empty());
        assert!(Value::Bool(false).is_empty());
        assert!(Value::Null.is_empty());
        assert!(!Value::Number(0.0).is_empty());
        assert!(!Value::Bool(true).is_empty());
    }

    #[test]
    fn coercions() {
        assert_eq!(Value::Text(" 12 ".into()).to_number(), Some(12.0));
        assert_eq!(Value::Bool(true).to_number(), Some(1.0));
        assert_eq!(Value::Number(4.0).to_text(), "4");
        assert!(!Value::Text("false".into()).to_bool());
        assert_eq!(Value::Text("x".into()).to_string_array(), vec!["x".to_string()]);
    }

    #[test]
    fn element_keeps_unknown_keys() {
        let raw = json!({ "_id": "r1", "custom": { "a": 1 }, "fileName": "a.png" });
        let element: Element = serde_json::from_value(raw.clone()).expect("decode");
        assert_eq!(element.file_name.as_deref(), Some("a.png"));
        assert_eq!(serde_json::to_value(&element).expect("encode"), raw);
    }
}
