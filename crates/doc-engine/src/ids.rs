use std::collections::HashSet;

use chrono::Utc;

use crate::spec::Document;
use crate::value::Element;

/// Issues row and element ids: eight hex digits of unix seconds followed by
/// sixteen random hex digits. Ids never repeat within one generator.
#[derive(Debug, Default, Clone)]
pub struct IdGenerator {
    issued: HashSet<String>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator that will not reissue any id already present in the document.
    pub fn seeded(document: &Document) -> Self {
        let mut generator = Self::new();
        for field in &document.fields {
            generator.reserve(&field.id);
            generator.reserve_all(field.row_order.iter());
            generator.reserve_all(field.table_columns.iter().map(|column| &column.id));
            if let Some(rows) = field.value.as_elements() {
                generator.reserve_rows(rows);
            }
        }
        for page in document.all_pages() {
            generator.reserve(&page.id);
        }
        generator
    }

    pub fn reserve(&mut self, id: &str) {
        if !id.is_empty() {
            self.issued.insert(id.to_string());
        }
    }

    /// Rows, chart points and nested collection rows at any depth.
    pub fn reserve_rows(&mut self, rows: &[Element]) {
        let mut pending: Vec<&Element> = rows.iter().collect();
        while let Some(row) = pending.pop() {
            self.reserve(&row.id);
            if let Some(points) = &row.points {
                self.reserve_all(points.iter().map(|point| &point.id));
            }
            if let Some(children) = &row.children {
                pending.extend(children.values().flat_map(|nested| nested.value.iter()));
            }
        }
    }

    fn reserve_all<'a>(&mut self, ids: impl Iterator<Item = &'a String>) {
        for id in ids {
            self.reserve(id);
        }
    }

    pub fn next_id(&mut self) -> String {
        loop {
            let seconds = Utc::now().timestamp() as u32;
            let candidate = format!("{:08x}{:016x}", seconds, rand::random::<u64>());
            if self.issued.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_opaque() {
        let mut generator = IdGenerator::new();
        let ids: HashSet<String> = (0..500).map(|_| generator.next_id()).collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.len() == 24));
    }

    #[test]
    fn seeding_covers_nested_rows_and_points() {
        let document = Document::from_value(serde_json::json!({
            "_id": "doc",
            "files": [],
            "fields": [
                { "_id": "inspections", "type": "collection",
                  "value": [{ "_id": "parent", "cells": {},
                    "children": { "defects": { "value": [
                        { "_id": "child", "cells": {},
                          "children": { "photos": { "value": [{ "_id": "grandchild" }] } } }
                    ] } } }] },
                { "_id": "trend", "type": "chart",
                  "value": [{ "_id": "line", "points": [{ "_id": "point", "x": 1, "y": 2 }] }] }
            ]
        }))
        .expect("deserialize");
        let generator = IdGenerator::seeded(&document);
        for id in ["inspections", "parent", "child", "grandchild", "trend", "line", "point"] {
            assert!(generator.issued.contains(id), "{id} not reserved");
        }
    }
}
