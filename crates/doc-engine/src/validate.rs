use std::collections::BTreeMap;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::spec::{Document, Field, FieldType};
use crate::value::Value;
use crate::visibility::{ValueLookup, Visibility};

/// Field identifiers that formulas can address as bare names.
const ADDRESSABLE_IDENTIFIER: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
    #[serde(default)]
    pub missing_required: Vec<String>,
    /// Per-field outcome; hidden fields are always valid.
    #[serde(default)]
    pub field_validities: BTreeMap<String, bool>,
}

/// Every structural problem in the document.
pub fn validate_schema(document: &Document) -> Vec<SchemaError> {
    document
        .fields
        .iter()
        .filter_map(|field| field.check_structure().err())
        .collect()
}

fn shown(document: &Document, visibility: &Visibility, field: &Field) -> bool {
    if !visibility.field(&field.id) {
        return false;
    }
    let pages = document.pages_hosting(&field.id);
    pages.is_empty() || pages.iter().any(|page| visibility.page(page))
}

/// Checks required fields, required table cells, choice values and
/// identifiers against current values.
pub fn validate(document: &Document, values: &dyn ValueLookup, visibility: &Visibility) -> ValidationResult {
    let addressable = Regex::new(ADDRESSABLE_IDENTIFIER).ok();
    let mut errors = Vec::new();
    let mut missing_required = Vec::new();
    let mut field_validities = BTreeMap::new();

    for field in &document.fields {
        if !shown(document, visibility, field) {
            field_validities.insert(field.id.clone(), true);
            continue;
        }
        let value = values
            .field_value(&field.id)
            .unwrap_or_else(|| field.value.clone());
        let before = errors.len();
        let mut missing = false;

        if let Err(err) = field.check_value() {
            errors.push(base_error(field, &err.to_string(), "type_mismatch"));
        }

        if field.required {
            if matches!(field.kind, FieldType::Table | FieldType::Collection) {
                let rows = field.active_rows();
                if rows.is_empty() {
                    missing = true;
                }
                for row in rows {
                    for column in field.ordered_columns() {
                        if column.required
                            && !column.hidden
                            && row.cell(&column.id).is_none_or(Value::is_empty)
                        {
                            errors.push(ValidationError {
                                field_id: Some(field.id.clone()),
                                path: Some(format!("/{}/{}/{}", field.id, row.id, column.id)),
                                message: "required cell is empty".into(),
                                code: Some("required_cell".into()),
                            });
                        }
                    }
                }
            } else if value.is_empty() {
                missing = true;
            }
        }

        if let Some(error) = check_options(field, &value) {
            errors.push(error);
        }

        if let Some(regex) = &addressable
            && !field.identifier.is_empty()
            && !regex.is_match(&field.identifier)
        {
            errors.push(base_error(
                field,
                "identifier cannot be referenced from formulas",
                "identifier_not_addressable",
            ));
        }

        if missing {
            missing_required.push(field.id.clone());
        }
        field_validities.insert(field.id.clone(), !missing && errors.len() == before);
    }

    ValidationResult {
        valid: errors.is_empty() && missing_required.is_empty(),
        errors,
        missing_required,
        field_validities,
    }
}

fn check_options(field: &Field, value: &Value) -> Option<ValidationError> {
    let choices: Vec<&str> = field
        .options
        .iter()
        .filter(|option| !option.deleted)
        .flat_map(|option| [option.id.as_str(), option.value.as_str()])
        .collect();
    if choices.is_empty() {
        return None;
    }
    let picked: Vec<&str> = match (field.kind, value) {
        (FieldType::Dropdown, Value::Text(text)) if !text.is_empty() => vec![text.as_str()],
        (FieldType::MultiSelect, Value::StringArray(items)) => items.iter().map(String::as_str).collect(),
        _ => return None,
    };
    if picked.iter().all(|choice| choices.contains(choice)) {
        None
    } else {
        Some(base_error(field, "value is not one of the options", "option_mismatch"))
    }
}

fn base_error(field: &Field, message: &str, code: &str) -> ValidationError {
    ValidationError {
        field_id: Some(field.id.clone()),
        path: Some(format!("/{}", field.id)),
        message: message.into(),
        code: Some(code.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::resolve_visibility;
    use serde_json::json;

    fn document(fields: serde_json::Value) -> Document {
        Document::from_value(json!({ "_id": "doc", "files": [], "fields": fields })).expect("deserialize")
    }

    fn run(document: &Document) -> ValidationResult {
        let visibility = resolve_visibility(document, document);
        validate(document, document, &visibility)
    }

    #[test]
    fn required_fields_must_be_filled() {
        let doc = document(json!([
            { "_id": "name", "type": "text", "required": true, "value": "" },
            { "_id": "age", "type": "number", "required": true, "value": 0 },
            { "_id": "secret", "type": "text", "required": true, "hidden": true },
        ]));
        let result = run(&doc);
        assert!(!result.valid);
        assert_eq!(result.missing_required, vec!["name".to_string()]);
        assert_eq!(result.field_validities.get("age"), Some(&true));
        assert_eq!(result.field_validities.get("secret"), Some(&true));
    }

    #[test]
    fn required_columns_checked_on_live_rows() {
        let doc = document(json!([{
            "_id": "t", "type": "table", "required": true,
            "tableColumns": [
                { "_id": "c1", "type": "text", "required": true },
                { "_id": "c2", "type": "text", "required": true, "hidden": true },
            ],
            "value": [
                { "_id": "r1", "cells": { "c1": "ok" } },
                { "_id": "r2", "cells": { "c1": "" } },
                { "_id": "r3", "deleted": true },
            ]
        }]));
        let result = run(&doc);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path.as_deref(), Some("/t/r2/c1"));
        assert_eq!(result.field_validities.get("t"), Some(&false));
    }

    #[test]
    fn choices_and_identifiers() {
        let doc = document(json!([
            { "_id": "d", "identifier": "has space", "type": "dropdown", "value": "opt3",
              "options": [{ "_id": "opt1", "value": "Yes" }, { "_id": "opt2", "value": "No" }] },
            { "_id": "m", "type": "multiSelect", "value": ["opt1"],
              "options": [{ "_id": "opt1", "value": "Yes" }] },
        ]));
        let result = run(&doc);
        let codes: Vec<_> = result.errors.iter().filter_map(|error| error.code.as_deref()).collect();
        assert_eq!(codes, vec!["option_mismatch", "identifier_not_addressable"]);
        assert_eq!(result.field_validities.get("m"), Some(&true));
    }

    #[test]
    fn schema_errors_are_collected() {
        let mut doc = document(json!([{ "_id": "n", "type": "number", "value": 1 }]));
        doc.fields[0].value = Value::Text("one".into());
        let errors = validate_schema(&doc);
        assert!(matches!(errors.as_slice(), [SchemaError::ValueTypeMismatch { .. }]));
    }
}
