use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use crate::error::SchemaError;
use crate::ids::IdGenerator;
use crate::spec::field::{Field, FieldType, TableColumn};
use crate::value::{Element, Value, ValueKind};

/// Addresses a row list inside a field: the top-level rows, or the rows of a
/// nested collection schema under a chain of parent rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPath {
    /// `(parent row id, child schema id)` pairs from the top level down.
    pub levels: Vec<(String, String)>,
}

impl RowPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a path from a change's `parentPath` (`rowId.schemaId.rowId...`,
    /// ending with the parent row id) and the child `schemaId`.
    /// Returns `None` for a malformed path.
    pub fn parse(parent_path: Option<&str>, schema_id: Option<&str>) -> Option<Self> {
        let parent_path = parent_path.map(str::trim).unwrap_or_default();
        if parent_path.is_empty() {
            return Some(Self::root());
        }
        let segments: Vec<&str> = parent_path.split('.').collect();
        let schema_id = schema_id?;
        if segments.len() % 2 == 0 || segments.iter().any(|segment| segment.is_empty()) {
            return None;
        }
        let mut levels = segments
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect::<Vec<_>>();
        let last_row = segments[segments.len() - 1].to_string();
        levels.push((last_row, schema_id.to_string()));
        Some(Self { levels })
    }

    pub fn is_root(&self) -> bool {
        self.levels.is_empty()
    }
}

fn merge_cells(row: &mut Element, cells: &BTreeMap<String, Value>) {
    let target = row.cells.get_or_insert_with(BTreeMap::new);
    for (column, value) in cells {
        target.insert(column.clone(), value.clone());
    }
}

fn merge_metadata(row: &mut Element, patch: &Map<String, JsonValue>) {
    let metadata = row.metadata.get_or_insert_with(Map::new);
    for (key, value) in patch {
        metadata.insert(key.clone(), value.clone());
    }
}

impl Field {
    fn tabular_mismatch(&self) -> SchemaError {
        SchemaError::ValueTypeMismatch {
            field_id: self.id.clone(),
            expected: ValueKind::ElementArray,
            found: self.value.kind(),
        }
    }

    /// Tables and collections keep an explicit `rowOrder`; chart lines are
    /// ordered by the element array itself.
    pub fn uses_row_order(&self) -> bool {
        matches!(self.kind, FieldType::Table | FieldType::Collection)
    }

    pub fn rows(&self) -> &[Element] {
        self.value.as_elements().unwrap_or_default()
    }

    fn rows_mut(&mut self) -> Result<&mut Vec<Element>, SchemaError> {
        let error = self.tabular_mismatch();
        if !self.kind.is_tabular() {
            return Err(error);
        }
        self.value.elements_mut().ok_or(error)
    }

    /// Row list addressed by `path`, or `None` when a parent row is missing.
    pub fn rows_at_mut(&mut self, path: &RowPath) -> Result<Option<&mut Vec<Element>>, SchemaError> {
        let mut rows = self.rows_mut()?;
        for (row_id, schema_id) in &path.levels {
            let current = rows;
            let Some(parent) = current.iter_mut().find(|row| &row.id == row_id) else {
                return Ok(None);
            };
            rows = &mut parent
                .children
                .get_or_insert_with(BTreeMap::new)
                .entry(schema_id.clone())
                .or_default()
                .value;
        }
        Ok(Some(rows))
    }

    /// Read-only counterpart of [`Field::rows_at_mut`].
    pub fn rows_at(&self, path: &RowPath) -> Option<&[Element]> {
        let mut rows = self.rows();
        for (row_id, schema_id) in &path.levels {
            let parent = rows.iter().find(|row| &row.id == row_id)?;
            rows = parent
                .children
                .as_ref()
                .and_then(|children| children.get(schema_id))
                .map(|nested| nested.value.as_slice())
                .unwrap_or_default();
        }
        Some(rows)
    }

    pub fn row(&self, row_id: &str) -> Option<&Element> {
        self.rows().iter().find(|row| row.id == row_id)
    }

    /// Rows in display order, soft-deleted rows included.
    pub fn ordered_rows(&self) -> Vec<&Element> {
        if !self.uses_row_order() {
            return self.rows().iter().collect();
        }
        self.row_order
            .iter()
            .filter_map(|id| self.row(id))
            .collect()
    }

    pub fn active_rows(&self) -> Vec<&Element> {
        self.ordered_rows()
            .into_iter()
            .filter(|row| !row.deleted)
            .collect()
    }

    /// Row count as shown to a user: soft-deleted rows excluded.
    pub fn active_row_count(&self) -> usize {
        self.active_rows().len()
    }

    fn order_position(&self, row_id: &str) -> Option<usize> {
        if self.uses_row_order() {
            self.row_order.iter().position(|id| id == row_id)
        } else {
            self.rows().iter().position(|row| row.id == row_id)
        }
    }

    fn order_len(&self) -> usize {
        if self.uses_row_order() {
            self.row_order.len()
        } else {
            self.rows().len()
        }
    }

    /// Inserts a top-level row at `index` of the display order (appending
    /// when absent or out of range). Returns the row's position.
    pub fn insert_row(&mut self, row: Element, index: Option<usize>) -> Result<usize, SchemaError> {
        let order_len = self.order_len();
        let position = index.map_or(order_len, |index| index.min(order_len));
        let uses_order = self.uses_row_order();
        let row_id = row.id.clone();
        let rows = self.rows_mut()?;
        if uses_order {
            rows.push(row);
            self.row_order.insert(position, row_id);
        } else {
            rows.insert(position, row);
        }
        Ok(position)
    }

    /// Inserts a row into the list addressed by `path`.
    pub fn insert_row_at(
        &mut self,
        path: &RowPath,
        row: Element,
        index: Option<usize>,
    ) -> Result<Option<usize>, SchemaError> {
        if path.is_root() {
            return self.insert_row(row, index).map(Some);
        }
        let Some(rows) = self.rows_at_mut(path)? else {
            return Ok(None);
        };
        let position = index.map_or(rows.len(), |index| index.min(rows.len()));
        rows.insert(position, row);
        Ok(Some(position))
    }

    /// Appends a fresh row. Returns its id and position.
    pub fn add_row(
        &mut self,
        ids: &mut IdGenerator,
        cells: BTreeMap<String, Value>,
    ) -> Result<(String, usize), SchemaError> {
        let id = ids.next_id();
        let position = self.insert_row(Element::with_cells(id.clone(), cells), None)?;
        Ok((id, position))
    }

    /// Soft delete: the row keeps its slot in the order and element array.
    pub fn delete_row(&mut self, row_id: &str) -> Result<bool, SchemaError> {
        self.delete_row_at(&RowPath::root(), row_id)
    }

    pub fn delete_row_at(&mut self, path: &RowPath, row_id: &str) -> Result<bool, SchemaError> {
        let Some(rows) = self.rows_at_mut(path)? else {
            return Ok(false);
        };
        match rows.iter_mut().find(|row| row.id == row_id) {
            Some(row) => {
                row.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Copies a row's cells under a new id right after the source.
    pub fn duplicate_row(
        &mut self,
        row_id: &str,
        ids: &mut IdGenerator,
    ) -> Result<Option<(String, usize)>, SchemaError> {
        let Some(source) = self.row(row_id).cloned() else {
            return Ok(None);
        };
        let Some(source_position) = self.order_position(row_id) else {
            return Err(SchemaError::RowOrderMismatch {
                field_id: self.id.clone(),
            });
        };
        let new_id = ids.next_id();
        let copy = Element {
            id: new_id.clone(),
            deleted: false,
            ..source
        };
        let position = source_position + 1;
        let uses_order = self.uses_row_order();
        let rows = self.rows_mut()?;
        let array_position = rows
            .iter()
            .position(|row| row.id == row_id)
            .map_or(rows.len(), |index| index + 1);
        rows.insert(array_position, copy);
        if uses_order {
            self.row_order.insert(position, new_id.clone());
        }
        Ok(Some((new_id, position)))
    }

    /// Adds an empty (or pre-filled) row directly below `row_id`.
    pub fn insert_row_below(
        &mut self,
        row_id: &str,
        ids: &mut IdGenerator,
        cells: BTreeMap<String, Value>,
    ) -> Result<Option<(String, usize)>, SchemaError> {
        let Some(position) = self.order_position(row_id) else {
            return Ok(None);
        };
        let id = ids.next_id();
        let position = self.insert_row(Element::with_cells(id.clone(), cells), Some(position + 1))?;
        Ok(Some((id, position)))
    }

    /// Moves a row to `target_index` of the display order.
    pub fn move_row(&mut self, row_id: &str, target_index: usize) -> Result<Option<usize>, SchemaError> {
        let Some(current) = self.order_position(row_id) else {
            return Ok(None);
        };
        if self.uses_row_order() {
            let id = self.row_order.remove(current);
            let target = target_index.min(self.row_order.len());
            self.row_order.insert(target, id);
            Ok(Some(target))
        } else {
            let rows = self.rows_mut()?;
            let row = rows.remove(current);
            let target = target_index.min(rows.len());
            rows.insert(target, row);
            Ok(Some(target))
        }
    }

    pub fn move_row_up(&mut self, row_id: &str) -> Result<Option<usize>, SchemaError> {
        match self.order_position(row_id) {
            Some(current) => self.move_row(row_id, current.saturating_sub(1)),
            None => Ok(None),
        }
    }

    pub fn move_row_down(&mut self, row_id: &str) -> Result<Option<usize>, SchemaError> {
        match self.order_position(row_id) {
            Some(current) => self.move_row(row_id, current + 1),
            None => Ok(None),
        }
    }

    /// Replaces one cell, creating the cells map when the row has none.
    pub fn cell_did_change(
        &mut self,
        row_id: &str,
        column_id: &str,
        value: Value,
    ) -> Result<bool, SchemaError> {
        let rows = self.rows_mut()?;
        let Some(row) = rows.iter_mut().find(|row| row.id == row_id) else {
            return Ok(false);
        };
        row.cells
            .get_or_insert_with(BTreeMap::new)
            .insert(column_id.to_string(), value);
        Ok(true)
    }

    /// Merges cells and metadata into a row; cells not named stay untouched.
    pub fn update_row_at(
        &mut self,
        path: &RowPath,
        row_id: &str,
        cells: &BTreeMap<String, Value>,
        metadata: Option<&Map<String, JsonValue>>,
    ) -> Result<bool, SchemaError> {
        let Some(rows) = self.rows_at_mut(path)? else {
            return Ok(false);
        };
        let Some(row) = rows.iter_mut().find(|row| row.id == row_id) else {
            return Ok(false);
        };
        merge_cells(row, cells);
        if let Some(patch) = metadata {
            merge_metadata(row, patch);
        }
        Ok(true)
    }

    /// Sets the same cells on every listed row. Returns how many rows changed.
    pub fn bulk_edit(
        &mut self,
        row_ids: &[String],
        cells: &BTreeMap<String, Value>,
    ) -> Result<usize, SchemaError> {
        let wanted: HashSet<&str> = row_ids.iter().map(String::as_str).collect();
        let rows = self.rows_mut()?;
        let mut changed = 0;
        for row in rows.iter_mut().filter(|row| wanted.contains(row.id.as_str())) {
            merge_cells(row, cells);
            changed += 1;
        }
        if changed < wanted.len() {
            warn!(
                requested = wanted.len(),
                changed, "bulk edit skipped rows that do not exist"
            );
        }
        Ok(changed)
    }

    /// Adds a column and its order entry together.
    pub fn add_column(&mut self, column: TableColumn, index: Option<usize>) -> Result<usize, SchemaError> {
        if !self.kind.is_tabular() {
            return Err(self.tabular_mismatch());
        }
        if self.table_column_order.is_empty() {
            self.table_column_order = self
                .table_columns
                .iter()
                .map(|column| column.id.clone())
                .collect();
        }
        let len = self.table_column_order.len();
        let position = index.map_or(len, |index| index.min(len));
        self.table_column_order.insert(position, column.id.clone());
        self.table_columns.push(column);
        Ok(position)
    }

    pub fn remove_column(&mut self, column_id: &str) -> Result<bool, SchemaError> {
        if !self.kind.is_tabular() {
            return Err(self.tabular_mismatch());
        }
        let before = self.table_columns.len();
        self.table_columns.retain(|column| column.id != column_id);
        self.table_column_order.retain(|id| id != column_id);
        Ok(self.table_columns.len() != before)
    }

    /// Rebuilds `rowOrder` after the element array was replaced wholesale.
    /// Rows that survive keep their slots; new rows follow in array order.
    pub fn sync_row_order(&mut self) {
        if !self.uses_row_order() {
            return;
        }
        let ids: Vec<&String> = self.rows().iter().map(|row| &row.id).collect();
        let present: HashSet<&String> = ids.iter().copied().collect();
        let mut seen = HashSet::new();
        let order: Vec<String> = self
            .row_order
            .iter()
            .filter(|id| present.contains(id))
            .chain(ids.iter().copied())
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        self.row_order = order;
    }

    /// Value variant plus row and column order consistency.
    pub fn check_structure(&self) -> Result<(), SchemaError> {
        self.check_value()?;
        if self.uses_row_order() {
            let order: HashSet<&str> = self.row_order.iter().map(String::as_str).collect();
            let ids: HashSet<&str> = self.rows().iter().map(|row| row.id.as_str()).collect();
            if order.len() != self.row_order.len() || ids.len() != self.rows().len() || order != ids {
                return Err(SchemaError::RowOrderMismatch {
                    field_id: self.id.clone(),
                });
            }
        }
        if !self.table_column_order.is_empty() {
            let order: HashSet<&str> = self
                .table_column_order
                .iter()
                .map(String::as_str)
                .collect();
            let ids: HashSet<&str> = self
                .table_columns
                .iter()
                .map(|column| column.id.as_str())
                .collect();
            if order.len() != self.table_column_order.len() || order != ids {
                return Err(SchemaError::ColumnOrderMismatch {
                    field_id: self.id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::field::ColumnType;
    use serde_json::json;

    fn table() -> Field {
        let mut field: Field = serde_json::from_value(json!({
            "_id": "table1",
            "type": "table",
            "tableColumns": [
                { "_id": "c1", "type": "text", "title": "Name" },
                { "_id": "c2", "type": "number", "title": "Qty" }
            ],
            "tableColumnOrder": ["c1", "c2"],
            "rowOrder": ["r1", "r2", "r3"],
            "value": [
                { "_id": "r1", "cells": { "c1": "a", "c2": 1 } },
                { "_id": "r2", "cells": { "c1": "b", "c2": 2 } },
                { "_id": "r3", "cells": { "c1": "c", "c2": 3 } }
            ]
        }))
        .expect("deserialize");
        field.normalize();
        field
    }

    #[test]
    fn duplicate_inserts_after_source() {
        let mut field = table();
        let mut ids = IdGenerator::new();
        let (new_id, index) = field
            .duplicate_row("r1", &mut ids)
            .expect("structure")
            .expect("row exists");
        assert_eq!(index, 1);
        assert_eq!(field.row_order[1], new_id);
        assert_ne!(new_id, "r1");
        assert_eq!(
            field.row(&new_id).and_then(|row| row.cell("c1")),
            Some(&Value::Text("a".into()))
        );
        assert!(field.check_structure().is_ok());
    }

    #[test]
    fn delete_keeps_order_and_flags_row() {
        let mut field = table();
        assert_eq!(field.active_row_count(), 3);
        assert!(field.delete_row("r2").expect("structure"));
        assert_eq!(field.row_order, vec!["r1", "r2", "r3"]);
        assert!(field.row("r2").expect("row").deleted);
        assert_eq!(field.active_row_count(), 2);
        assert!(!field.delete_row("missing").expect("structure"));
    }

    #[test]
    fn cell_change_creates_cells_map() {
        let mut field = table();
        field
            .insert_row(Element::new("r4"), None)
            .expect("insert");
        assert!(field.cell_did_change("r4", "c2", Value::Number(9.0)).expect("structure"));
        assert_eq!(field.row("r4").and_then(|row| row.cell("c2")), Some(&Value::Number(9.0)));
        assert_eq!(field.row_order.last().map(String::as_str), Some("r4"));
    }

    #[test]
    fn move_and_insert_below() {
        let mut field = table();
        assert_eq!(field.move_row("r3", 0).expect("structure"), Some(0));
        assert_eq!(field.row_order, vec!["r3", "r1", "r2"]);
        let mut ids = IdGenerator::new();
        let (id, index) = field
            .insert_row_below("r3", &mut ids, BTreeMap::new())
            .expect("structure")
            .expect("row exists");
        assert_eq!(index, 1);
        assert_eq!(field.row_order[1], id);
        assert_eq!(field.move_row_down("r2").expect("structure"), Some(3));
    }

    #[test]
    fn update_merges_cells() {
        let mut field = table();
        let mut cells = BTreeMap::new();
        cells.insert("c2".to_string(), Value::Number(10.0));
        assert!(field.update_row_at(&RowPath::root(), "r1", &cells, None).expect("structure"));
        let row = field.row("r1").expect("row");
        assert_eq!(row.cell("c1"), Some(&Value::Text("a".into())));
        assert_eq!(row.cell("c2"), Some(&Value::Number(10.0)));
        assert_eq!(
            field
                .bulk_edit(&["r2".to_string(), "r3".to_string()], &cells)
                .expect("structure"),
            2
        );
    }

    #[test]
    fn column_order_stays_in_step() {
        let mut field = table();
        let position = field
            .add_column(TableColumn::new("c3", ColumnType::Text, "Notes"), Some(0))
            .expect("tabular");
        assert_eq!(position, 0);
        assert_eq!(field.table_column_order, vec!["c3", "c1", "c2"]);
        assert!(field.remove_column("c1").expect("tabular"));
        assert_eq!(field.table_column_order, vec!["c3", "c2"]);
        assert!(field.check_structure().is_ok());
    }

    #[test]
    fn row_order_mismatch_is_reported() {
        let mut field = table();
        field.row_order.push("ghost".into());
        assert_eq!(
            field.check_structure(),
            Err(SchemaError::RowOrderMismatch {
                field_id: "table1".into()
            })
        );
    }

    #[test]
    fn row_ops_on_text_field_are_schema_errors() {
        let mut field = Field::new("t", FieldType::Text).with_value("x");
        assert!(matches!(
            field.delete_row("r1"),
            Err(SchemaError::ValueTypeMismatch { .. })
        ));
    }

    #[test]
    fn nested_paths_parse_and_resolve() {
        assert_eq!(RowPath::parse(None, Some("s1")), Some(RowPath::root()));
        assert_eq!(RowPath::parse(Some("r1.s1"), Some("s2")), None);
        let path = RowPath::parse(Some("r1.s2.r5"), Some("s3")).expect("path");
        assert_eq!(
            path.levels,
            vec![
                ("r1".to_string(), "s2".to_string()),
                ("r5".to_string(), "s3".to_string())
            ]
        );

        let mut field: Field = serde_json::from_value(json!({
            "_id": "col1",
            "type": "collection",
            "value": [{ "_id": "r1", "cells": {} }]
        }))
        .expect("deserialize");
        field.normalize();
        let nested = RowPath::parse(Some("r1"), Some("child")).expect("path");
        let position = field
            .insert_row_at(&nested, Element::new("n1"), None)
            .expect("structure");
        assert_eq!(position, Some(0));
        let children = field.row("r1").and_then(|row| row.children.as_ref()).expect("children");
        assert_eq!(children["child"].value[0].id, "n1");
        assert!(field.delete_row_at(&nested, "n1").expect("structure"));
    }
}
