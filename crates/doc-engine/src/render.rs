use serde_json::{Map, Value as JsonValue, json};

use crate::session::DocumentSession;
use crate::spec::FieldType;
use crate::value::Value;

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// A visible required field is still empty.
    NeedInput,
    /// Every visible required field is filled.
    Complete,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Complete => "complete",
        }
    }
}

/// Describes a single field for render outputs.
#[derive(Debug, Clone)]
pub struct RenderField {
    pub id: String,
    pub identifier: String,
    pub title: String,
    pub kind: FieldType,
    pub required: bool,
    pub visible: bool,
    pub value: Value,
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderPage {
    pub id: String,
    pub name: Option<String>,
    pub visible: bool,
    pub fields: Vec<String>,
}

/// Collected payload used by both text and JSON renderers.
#[derive(Debug, Clone)]
pub struct RenderPayload {
    pub document_id: String,
    pub document_name: String,
    pub status: RenderStatus,
    pub missing_required: Vec<String>,
    pub pages: Vec<RenderPage>,
    pub fields: Vec<RenderField>,
}

/// Build the renderer payload from the session's current state.
pub fn build_render_payload(session: &mut DocumentSession) -> RenderPayload {
    let validation = session.validate();
    let states = session.field_states();
    let document = session.document();

    let fields = document
        .fields
        .iter()
        .filter_map(|field| {
            let state = states.get(&field.id)?;
            Some(RenderField {
                id: field.id.clone(),
                identifier: field.identifier.clone(),
                title: field.display_title().to_string(),
                kind: field.kind,
                required: field.required,
                visible: state.visible,
                value: state.value.clone(),
                diagnostic: state.diagnostic.clone(),
            })
        })
        .collect();

    let pages = session
        .pages()
        .into_iter()
        .map(|page| RenderPage {
            id: page.id.clone(),
            name: page.name.clone(),
            visible: session.is_page_visible(&page.id),
            fields: page
                .field_positions
                .iter()
                .map(|position| position.field.clone())
                .collect(),
        })
        .collect();

    let status = if validation.missing_required.is_empty() {
        RenderStatus::Complete
    } else {
        RenderStatus::NeedInput
    };

    RenderPayload {
        document_id: document.id.clone(),
        document_name: document.name.clone().unwrap_or_else(|| document.id.clone()),
        status,
        missing_required: validation.missing_required,
        pages,
        fields,
    }
}

/// Render the payload as a structured JSON-friendly value.
pub fn render_json_ui(payload: &RenderPayload) -> JsonValue {
    let fields = payload
        .fields
        .iter()
        .map(|field| {
            let mut map = Map::new();
            map.insert("id".into(), JsonValue::String(field.id.clone()));
            if !field.identifier.is_empty() {
                map.insert("identifier".into(), JsonValue::String(field.identifier.clone()));
            }
            map.insert("title".into(), JsonValue::String(field.title.clone()));
            map.insert("type".into(), JsonValue::String(field.kind.as_str().to_string()));
            map.insert("required".into(), JsonValue::Bool(field.required));
            map.insert("visible".into(), JsonValue::Bool(field.visible));
            map.insert("value".into(), field.value.to_json());
            if let Some(diagnostic) = &field.diagnostic {
                map.insert("diagnostic".into(), JsonValue::String(diagnostic.clone()));
            }
            JsonValue::Object(map)
        })
        .collect::<Vec<_>>();

    let pages = payload
        .pages
        .iter()
        .map(|page| {
            json!({
                "id": page.id,
                "name": page.name,
                "visible": page.visible,
                "fields": page.fields,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "document_id": payload.document_id,
        "document_name": payload.document_name,
        "status": payload.status.as_str(),
        "missing_required": payload.missing_required,
        "pages": pages,
        "fields": fields,
    })
}

/// Render the payload as human-friendly text.
pub fn render_text(payload: &RenderPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Document: {} ({})",
        payload.document_name, payload.document_id
    ));
    lines.push(format!("Status: {}", payload.status.as_str()));
    if !payload.missing_required.is_empty() {
        lines.push(format!("Missing required: {}", payload.missing_required.join(", ")));
    }

    for page in payload.pages.iter().filter(|page| page.visible) {
        lines.push(format!(
            "Page: {}",
            page.name.as_deref().unwrap_or(page.id.as_str())
        ));
        for field_id in &page.fields {
            let Some(field) = payload
                .fields
                .iter()
                .find(|field| &field.id == field_id && field.visible)
            else {
                continue;
            };
            let mut entry = format!(" - {} ({})", field.title, field.kind.as_str());
            if field.required {
                entry.push_str(" [required]");
            }
            if !field.value.is_empty() {
                entry.push_str(&format!(" = {}", value_to_display(&field.value)));
            }
            if let Some(diagnostic) = &field.diagnostic {
                entry.push_str(&format!(" ! {}", diagnostic));
            }
            lines.push(entry);
        }
    }

    lines.join("\n")
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::ElementArray(rows) => {
            let live = rows.iter().filter(|row| !row.deleted).count();
            format!("{} row(s)", live)
        }
        Value::StringArray(items) => items.join(", "),
        Value::Dict(_) => value.to_json().to_string(),
        other => other.to_text(),
    }
}
