use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use tracing::{debug, warn};

use crate::change::{Change, ChangeOp, ChangeTarget};
use crate::error::EngineError;
use crate::formula::{FormulaEngine, ResolvedValues, Target};
use crate::ids::IdGenerator;
use crate::options::EngineOptions;
use crate::spec::{Document, Field, Page};
use crate::validate::{ValidationResult, validate};
use crate::value::{Element, Value};
use crate::visibility::{Visibility, VisibilityMap, resolve_visibility_with};

/// What a consumer needs to present one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldState {
    pub value: Value,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Result of applying one change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeOutcome {
    /// Normalized entries describing what was applied.
    pub changelog: Vec<Change>,
    /// Fields whose formula results were dropped.
    pub invalidated: Vec<String>,
    /// Fields and pages whose visibility flipped, with the new state.
    pub visibility_changes: Visibility,
}

/// Produces URLs for uploaded files. The engine never reads file contents.
pub trait UploadResolver {
    fn resolve(&self, file_name: &str) -> Option<String>;
}

impl<F> UploadResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, file_name: &str) -> Option<String> {
        self(file_name)
    }
}

/// Single owner of an open document: the document itself, its formula
/// cache, visibility and the changelog of applied edits.
#[derive(Debug)]
pub struct DocumentSession {
    document: Document,
    engine: FormulaEngine,
    visibility: Visibility,
    options: EngineOptions,
    ids: IdGenerator,
    changelog: Vec<Change>,
}

fn diff(before: &VisibilityMap, after: &VisibilityMap) -> VisibilityMap {
    after
        .iter()
        .filter(|(id, visible)| before.get(*id) != Some(visible))
        .map(|(id, visible)| (id.clone(), *visible))
        .collect()
}

impl DocumentSession {
    pub fn new(document: Document, options: EngineOptions) -> Result<Self, EngineError> {
        if options.validate_schema {
            for field in &document.fields {
                field.check_structure()?;
            }
        }
        let engine = FormulaEngine::new(&document);
        let ids = IdGenerator::seeded(&document);
        let mut session = Self {
            document,
            engine,
            visibility: Visibility::default(),
            options,
            ids,
            changelog: Vec::new(),
        };
        session.visibility = session.compute_visibility();
        Ok(session)
    }

    pub fn from_json(text: &str, options: EngineOptions) -> Result<Self, EngineError> {
        Self::new(Document::from_json(text)?, options)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn is_field_visible(&self, field_id: &str) -> bool {
        self.visibility.field(field_id)
    }

    pub fn is_page_visible(&self, page_id: &str) -> bool {
        self.visibility.page(page_id)
    }

    /// Current value of a field, formula results included.
    pub fn value(&mut self, field_id: &str) -> Option<Value> {
        self.engine.field_value(&self.document, field_id)
    }

    pub fn field_state(&mut self, field_id: &str) -> Option<FieldState> {
        let value = self.value(field_id)?;
        Some(FieldState {
            value,
            visible: self.visibility.field(field_id),
            diagnostic: self.engine.diagnostic(field_id).map(ToString::to_string),
        })
    }

    pub fn field_states(&mut self) -> BTreeMap<String, FieldState> {
        let ids: Vec<String> = self.document.fields.iter().map(|field| field.id.clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.field_state(&id).map(|state| (id, state)))
            .collect()
    }

    /// Pages in display order for the configured view.
    pub fn pages(&self) -> Vec<&Page> {
        self.document.pages_for_view(self.options.view.as_deref())
    }

    pub fn first_valid_page(&mut self, current_page_id: Option<&str>) -> Option<&Page> {
        self.engine.resolve_all(&self.document);
        let lookup = ResolvedValues {
            document: &self.document,
            engine: &self.engine,
        };
        self.document
            .first_valid_page_in_view(self.options.view.as_deref(), current_page_id, &lookup)
    }

    /// Copy of the document with formula results written back.
    pub fn resolved_document(&mut self) -> Document {
        self.engine.resolved_document(&self.document)
    }

    pub fn validate(&mut self) -> ValidationResult {
        self.engine.resolve_all(&self.document);
        let lookup = ResolvedValues {
            document: &self.document,
            engine: &self.engine,
        };
        validate(&self.document, &lookup, &self.visibility)
    }

    /// Entries recorded since the last call.
    pub fn take_changelog(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changelog)
    }

    pub fn changelog(&self) -> &[Change] {
        &self.changelog
    }

    fn compute_visibility(&mut self) -> Visibility {
        self.engine.resolve_all(&self.document);
        let engine = &self.engine;
        let lookup = ResolvedValues {
            document: &self.document,
            engine,
        };
        let hidden = |field: &Field| {
            engine
                .cached(&Target::hidden(&field.id))
                .map_or(field.hidden, Value::to_bool)
        };
        resolve_visibility_with(&self.document, &lookup, &hidden)
    }

    fn field_mut(&mut self, field_id: &str) -> Result<&mut Field, EngineError> {
        self.document
            .field_mut(field_id)
            .ok_or_else(|| EngineError::UnknownField(field_id.to_string()))
    }

    /// Applies a submitted change, then invalidates dependent formulas,
    /// recomputes visibility and records a changelog entry.
    pub fn apply_change(&mut self, change: Change) -> Result<ChangeOutcome, EngineError> {
        let op = change.op()?;
        if self.document.field(&change.field_id).is_none() {
            return Err(EngineError::UnknownField(change.field_id));
        }
        let mut entry = change;
        let value_touched = self.apply_op(&mut entry, op)?;
        Ok(self.finish(vec![entry], value_touched))
    }

    /// Applies changes in order as one batch. When any change is rejected
    /// the session is restored to its state before the call.
    pub fn apply_changes(&mut self, changes: Vec<Change>) -> Result<ChangeOutcome, EngineError> {
        let document = self.document.clone();
        let visibility = self.visibility.clone();
        let ids = self.ids.clone();
        let logged = self.changelog.len();
        let mut outcome = ChangeOutcome::default();
        for change in changes {
            let applied = match self.apply_change(change) {
                Ok(applied) => applied,
                Err(err) => {
                    warn!(error = %err, applied = outcome.changelog.len(), "change batch rolled back");
                    self.document = document;
                    self.engine = FormulaEngine::new(&self.document);
                    self.visibility = visibility;
                    self.ids = ids;
                    self.changelog.truncate(logged);
                    return Err(err);
                }
            };
            outcome.changelog.extend(applied.changelog);
            for id in applied.invalidated {
                if !outcome.invalidated.contains(&id) {
                    outcome.invalidated.push(id);
                }
            }
            outcome.visibility_changes.fields.extend(applied.visibility_changes.fields);
            outcome.visibility_changes.pages.extend(applied.visibility_changes.pages);
        }
        Ok(outcome)
    }

    /// Mutates the document. Returns whether row or field values changed.
    fn apply_op(&mut self, entry: &mut Change, op: ChangeOp) -> Result<bool, EngineError> {
        let field_id = entry.field_id.clone();
        let validate_schema = self.options.validate_schema;
        match op {
            ChangeOp::FieldUpdate { value, metadata } => {
                let field = self.field_mut(&field_id)?;
                let touched = value.is_some();
                if let Some(value) = value {
                    let previous = std::mem::replace(&mut field.value, value);
                    let previous_order = field.row_order.clone();
                    field.normalize();
                    field.sync_row_order();
                    if validate_schema && let Err(err) = field.check_structure() {
                        field.value = previous;
                        field.row_order = previous_order;
                        return Err(err.into());
                    }
                }
                if let Some(patch) = &metadata {
                    field.merge_metadata(patch);
                }
                if touched
                    && let Some(rows) = self.document.field(&field_id).and_then(|field| field.value.as_elements())
                {
                    self.ids.reserve_rows(rows);
                }
                Ok(touched)
            }
            ChangeOp::RowCreate { path, mut row, index } => {
                if row.id.is_empty() {
                    row.id = self.ids.next_id();
                } else if self
                    .document
                    .field(&field_id)
                    .and_then(|field| field.rows_at(&path))
                    .is_some_and(|rows| rows.iter().any(|existing| existing.id == row.id))
                {
                    return Err(EngineError::InvalidChange(format!(
                        "row '{}' already exists in field '{}'",
                        row.id, field_id
                    )));
                }
                self.ids.reserve_rows(std::slice::from_ref(&row));
                let row_json = serde_json::to_value(&row)?;
                let field = self.field_mut(&field_id)?;
                let position = field
                    .insert_row_at(&path, row, index)?
                    .ok_or_else(|| EngineError::UnknownRow {
                        field_id: field_id.clone(),
                        row_id: entry.parent_path.clone().unwrap_or_default(),
                    })?;
                entry.change.insert("row".into(), row_json);
                entry.change.remove("cells");
                entry.change.insert("targetRowIndex".into(), json!(position));
                Ok(true)
            }
            ChangeOp::RowUpdate {
                path,
                row_id,
                cells,
                metadata,
            } => {
                let field = self.field_mut(&field_id)?;
                if !field.update_row_at(&path, &row_id, &cells, metadata.as_ref())? {
                    return Err(EngineError::UnknownRow { field_id, row_id });
                }
                entry.row_id.get_or_insert(row_id);
                Ok(!cells.is_empty())
            }
            ChangeOp::RowDelete { path, row_id } => {
                let field = self.field_mut(&field_id)?;
                if !field.delete_row_at(&path, &row_id)? {
                    return Err(EngineError::UnknownRow { field_id, row_id });
                }
                entry.row_id.get_or_insert(row_id);
                Ok(true)
            }
            ChangeOp::RowMove { row_id, index } => {
                let field = self.field_mut(&field_id)?;
                let Some(position) = field.move_row(&row_id, index)? else {
                    return Err(EngineError::UnknownRow { field_id, row_id });
                };
                entry.change.insert("targetRowIndex".into(), json!(position));
                entry.row_id.get_or_insert(row_id);
                Ok(true)
            }
        }
    }

    /// Fills the changelog keys the submitter left out.
    fn stamp(&self, mut entry: Change) -> Change {
        if entry.sdk.is_empty() {
            entry.sdk = self.options.sdk.clone();
        }
        if entry.document_id.is_empty() {
            entry.document_id = self.document.id.clone();
        }
        if entry.identifier.is_empty()
            && let Some(identifier) = &self.document.identifier
        {
            entry.identifier = identifier.clone();
        }
        if let Some(field) = self.document.field(&entry.field_id)
            && entry.field_identifier.is_empty()
        {
            entry.field_identifier = field.identifier.clone();
        }
        if let Some(location) = self.document.field_position(&entry.field_id) {
            if entry.file_id.is_empty() {
                entry.file_id = location.file_id;
            }
            if entry.page_id.is_empty() {
                entry.page_id = location.page_id;
            }
            if entry.field_position_id.is_empty() {
                entry.field_position_id = location.position_id;
            }
        }
        entry
            .created_on
            .get_or_insert_with(|| Utc::now().timestamp_millis());
        entry
    }

    fn finish(&mut self, entries: Vec<Change>, value_touched: bool) -> ChangeOutcome {
        let mut invalidated = Vec::new();
        if value_touched {
            for entry in &entries {
                for id in self.engine.invalidate(&entry.field_id) {
                    if !invalidated.contains(&id) {
                        invalidated.push(id);
                    }
                }
            }
        }
        let after = self.compute_visibility();
        let visibility_changes = Visibility {
            fields: diff(&self.visibility.fields, &after.fields),
            pages: diff(&self.visibility.pages, &after.pages),
        };
        self.visibility = after;

        let changelog: Vec<Change> = entries.into_iter().map(|entry| self.stamp(entry)).collect();
        debug!(
            entries = changelog.len(),
            invalidated = invalidated.len(),
            "applied document change"
        );
        if self.options.record_changelog {
            self.changelog.extend(changelog.iter().cloned());
        }
        ChangeOutcome {
            changelog,
            invalidated,
            visibility_changes,
        }
    }

    pub fn update_value(&mut self, field_id: &str, value: Value) -> Result<ChangeOutcome, EngineError> {
        self.apply_change(Change::update_value(field_id, &value))
    }

    pub fn update_metadata(
        &mut self,
        field_id: &str,
        metadata: Map<String, JsonValue>,
    ) -> Result<ChangeOutcome, EngineError> {
        self.apply_change(Change::update_metadata(field_id, metadata))
    }

    /// Appends a row. Returns the new row's id and position.
    pub fn add_row(
        &mut self,
        field_id: &str,
        cells: BTreeMap<String, Value>,
    ) -> Result<(String, usize), EngineError> {
        let row = Element::with_cells(self.ids.next_id(), cells);
        let change = Change::new(ChangeTarget::RowCreate, field_id).with("row", serde_json::to_value(&row)?);
        let outcome = self.apply_change(change)?;
        Ok((row.id, created_position(&outcome)))
    }

    pub fn delete_row(&mut self, field_id: &str, row_id: &str) -> Result<ChangeOutcome, EngineError> {
        self.apply_change(Change::new(ChangeTarget::RowDelete, field_id).with_row(row_id))
    }

    /// Copies a row right below itself under a fresh id.
    pub fn duplicate_row(&mut self, field_id: &str, row_id: &str) -> Result<(String, usize), EngineError> {
        let ids = &mut self.ids;
        let field = self
            .document
            .field_mut(field_id)
            .ok_or_else(|| EngineError::UnknownField(field_id.to_string()))?;
        let Some((new_id, position)) = field.duplicate_row(row_id, ids)? else {
            return Err(EngineError::UnknownRow {
                field_id: field_id.to_string(),
                row_id: row_id.to_string(),
            });
        };
        self.record_created_row(field_id, &new_id, position)?;
        Ok((new_id, position))
    }

    pub fn insert_row_below(
        &mut self,
        field_id: &str,
        row_id: &str,
        cells: BTreeMap<String, Value>,
    ) -> Result<(String, usize), EngineError> {
        let ids = &mut self.ids;
        let field = self
            .document
            .field_mut(field_id)
            .ok_or_else(|| EngineError::UnknownField(field_id.to_string()))?;
        let Some((new_id, position)) = field.insert_row_below(row_id, ids, cells)? else {
            return Err(EngineError::UnknownRow {
                field_id: field_id.to_string(),
                row_id: row_id.to_string(),
            });
        };
        self.record_created_row(field_id, &new_id, position)?;
        Ok((new_id, position))
    }

    fn record_created_row(&mut self, field_id: &str, row_id: &str, position: usize) -> Result<(), EngineError> {
        let row = self
            .document
            .field(field_id)
            .and_then(|field| field.row(row_id))
            .map(serde_json::to_value)
            .transpose()?
            .unwrap_or(JsonValue::Null);
        let entry = Change::new(ChangeTarget::RowCreate, field_id)
            .with("row", row)
            .with("targetRowIndex", json!(position));
        self.finish(vec![entry], true);
        Ok(())
    }

    pub fn move_row_up(&mut self, field_id: &str, row_id: &str) -> Result<usize, EngineError> {
        let current = self.row_position(field_id, row_id)?;
        self.move_row(field_id, row_id, current.saturating_sub(1))
    }

    pub fn move_row_down(&mut self, field_id: &str, row_id: &str) -> Result<usize, EngineError> {
        let current = self.row_position(field_id, row_id)?;
        self.move_row(field_id, row_id, current + 1)
    }

    pub fn move_row(&mut self, field_id: &str, row_id: &str, index: usize) -> Result<usize, EngineError> {
        let change = Change::new(ChangeTarget::RowMove, field_id)
            .with_row(row_id)
            .with("targetRowIndex", json!(index));
        let outcome = self.apply_change(change)?;
        Ok(created_position(&outcome))
    }

    fn row_position(&self, field_id: &str, row_id: &str) -> Result<usize, EngineError> {
        let field = self
            .document
            .field(field_id)
            .ok_or_else(|| EngineError::UnknownField(field_id.to_string()))?;
        field
            .ordered_rows()
            .iter()
            .position(|row| row.id == row_id)
            .ok_or_else(|| EngineError::UnknownRow {
                field_id: field_id.to_string(),
                row_id: row_id.to_string(),
            })
    }

    /// Replaces one cell of a row.
    pub fn cell_did_change(
        &mut self,
        field_id: &str,
        row_id: &str,
        column_id: &str,
        value: Value,
    ) -> Result<ChangeOutcome, EngineError> {
        let mut cells = Map::new();
        cells.insert(column_id.to_string(), value.to_json());
        let change = Change::new(ChangeTarget::RowUpdate, field_id)
            .with_row(row_id)
            .with("row", json!({ "cells": cells }));
        self.apply_change(change)
    }

    /// Sets the same cells on several rows. Returns how many rows changed.
    pub fn bulk_edit(
        &mut self,
        field_id: &str,
        row_ids: &[String],
        cells: BTreeMap<String, Value>,
    ) -> Result<usize, EngineError> {
        let changed = self.field_mut(field_id)?.bulk_edit(row_ids, &cells)?;
        let cells_json: Map<String, JsonValue> = cells
            .iter()
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect();
        let entries: Vec<Change> = row_ids
            .iter()
            .filter(|row_id| {
                self.document
                    .field(field_id)
                    .is_some_and(|field| field.row(row_id).is_some())
            })
            .map(|row_id| {
                Change::new(ChangeTarget::RowUpdate, field_id)
                    .with_row(row_id.clone())
                    .with("row", json!({ "cells": cells_json }))
            })
            .collect();
        if !entries.is_empty() {
            self.finish(entries, true);
        }
        Ok(changed)
    }

    /// Appends uploaded files to an image field. Files the resolver cannot
    /// place are skipped.
    pub fn attach_uploads(
        &mut self,
        field_id: &str,
        file_names: &[String],
        resolver: &dyn UploadResolver,
    ) -> Result<ChangeOutcome, EngineError> {
        let mut value = self
            .document
            .field(field_id)
            .ok_or_else(|| EngineError::UnknownField(field_id.to_string()))?
            .value
            .clone();
        let mut attached = Vec::new();
        for file_name in file_names {
            match resolver.resolve(file_name) {
                Some(url) => attached.push(Element {
                    url: Some(url),
                    file_name: Some(file_name.clone()),
                    ..Element::new(self.ids.next_id())
                }),
                None => warn!(field = field_id, file = %file_name, "upload could not be resolved"),
            }
        }
        let Some(elements) = value.elements_mut() else {
            return Err(EngineError::InvalidChange(format!(
                "field '{}' cannot hold uploads",
                field_id
            )));
        };
        elements.extend(attached);
        self.update_value(field_id, value)
    }
}

fn created_position(outcome: &ChangeOutcome) -> usize {
    outcome
        .changelog
        .first()
        .and_then(|entry| entry.change.get("targetRowIndex"))
        .and_then(JsonValue::as_u64)
        .unwrap_or_default() as usize
}
