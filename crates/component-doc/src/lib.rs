use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use doc_engine::{
    Change, Document, DocumentSession, EngineError, EngineOptions, RenderPayload,
    build_render_payload, render_json_ui as doc_render_json_ui, render_text as doc_render_text,
};

const DEFAULT_DOCUMENT: &str = include_str!("../../doc-engine/tests/fixtures/simple_document.json");

#[derive(Debug, Error)]
enum ComponentError {
    #[error("failed to parse config/{0}")]
    ConfigParse(#[source] serde_json::Error),
    #[error("document '{0}' is not available")]
    DocumentUnavailable(String),
    #[error("json encode error: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct ComponentConfig {
    #[serde(default)]
    document_json: Option<String>,
    #[serde(default)]
    options: Option<EngineOptions>,
}

fn load_config(config_json: &str) -> Result<ComponentConfig, ComponentError> {
    if config_json.trim().is_empty() {
        Ok(ComponentConfig::default())
    } else {
        serde_json::from_str(config_json).map_err(ComponentError::ConfigParse)
    }
}

fn open_session(document_id: &str, config_json: &str) -> Result<DocumentSession, ComponentError> {
    let config = load_config(config_json)?;
    let text = config.document_json.as_deref().unwrap_or(DEFAULT_DOCUMENT);
    let document = Document::from_json(text).map_err(ComponentError::ConfigParse)?;
    if document.id != document_id {
        return Err(ComponentError::DocumentUnavailable(document_id.to_string()));
    }
    Ok(DocumentSession::new(document, config.options.unwrap_or_default())?)
}

fn parse_changes(changes_json: &str) -> Result<Vec<Change>, ComponentError> {
    let raw: Value = serde_json::from_str(changes_json).map_err(ComponentError::ConfigParse)?;
    match raw {
        Value::Array(_) => serde_json::from_value(raw).map_err(ComponentError::ConfigParse),
        other => Ok(vec![
            serde_json::from_value(other).map_err(ComponentError::ConfigParse)?,
        ]),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ComponentError> {
    serde_json::to_value(value).map_err(ComponentError::JsonEncode)
}

fn respond(result: Result<Value, ComponentError>) -> String {
    match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|error| {
            json!({"error": format!("json encode: {}", error)}).to_string()
        }),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

fn respond_string(result: Result<String, ComponentError>) -> String {
    match result {
        Ok(value) => value,
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

/// The stored document as configured, without formula results applied.
pub fn describe(document_id: &str, config_json: &str) -> String {
    respond(open_session(document_id, config_json).and_then(|session| encode(session.document())))
}

/// The document with every formula resolved, plus per-field state.
pub fn resolve(document_id: &str, config_json: &str) -> String {
    respond(open_session(document_id, config_json).and_then(|mut session| {
        let fields = encode(&session.field_states())?;
        let document = encode(&session.resolved_document())?;
        Ok(json!({
            "document": document,
            "fields": fields,
            "visibility": encode(session.visibility())?,
        }))
    }))
}

/// Applies one change object or an array of changes in order. The first
/// rejected change aborts the call.
pub fn apply_changes(document_id: &str, config_json: &str, changes_json: &str) -> String {
    respond(open_session(document_id, config_json).and_then(|mut session| {
        let changes = parse_changes(changes_json)?;
        let outcome = session.apply_changes(changes)?;
        Ok(json!({
            "document": encode(session.document())?,
            "changelog": encode(&outcome.changelog)?,
            "invalidated": outcome.invalidated,
            "visibility_changes": encode(&outcome.visibility_changes)?,
        }))
    }))
}

pub fn validate_document(document_id: &str, config_json: &str) -> String {
    respond(open_session(document_id, config_json).and_then(|mut session| encode(&session.validate())))
}

/// The page to show: `current_page_id` when visible, else the first
/// visible page.
pub fn first_valid_page(document_id: &str, config_json: &str, current_page_id: &str) -> String {
    respond(open_session(document_id, config_json).map(|mut session| {
        let current = Some(current_page_id).filter(|id| !id.is_empty());
        let page = session.first_valid_page(current).map(|page| page.id.clone());
        json!({ "page_id": page })
    }))
}

fn render_payload(document_id: &str, config_json: &str) -> Result<RenderPayload, ComponentError> {
    let mut session = open_session(document_id, config_json)?;
    Ok(build_render_payload(&mut session))
}

pub fn render_text(document_id: &str, config_json: &str) -> String {
    respond_string(render_payload(document_id, config_json).map(|payload| doc_render_text(&payload)))
}

pub fn render_json_ui(document_id: &str, config_json: &str) -> String {
    respond(render_payload(document_id, config_json).map(|payload| doc_render_json_ui(&payload)))
}

/// JSON schema of the document model.
pub fn document_schema() -> String {
    respond(encode(&schemars::schema_for!(Document)))
}
