use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::spec::field::Field;
use crate::spec::formula::Formula;
use crate::spec::logic::Logic;
use crate::value::is_false;
use crate::visibility::{ValueLookup, page_visible};

/// Root container of a form document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(rename = "createdOn", default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    pub files: Vec<File>,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formulas: Vec<Formula>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, JsonValue>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct File {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "pageOrder", default)]
    pub page_order: Vec<String>,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<ModelView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Map<String, JsonValue>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// Alternate page grouping of a file, selected by `type` (e.g. `mobile`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelView {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "pageOrder", default)]
    pub page_order: Vec<String>,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Page {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Logic>,
    #[serde(rename = "fieldPositions", default)]
    pub field_positions: Vec<FieldPosition>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// Placement of a field on a page, with per-instance display overrides kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldPosition {
    #[serde(rename = "_id")]
    pub id: String,
    pub field: String,
    #[serde(rename = "displayType", default, skip_serializing_if = "Option::is_none")]
    pub display_type: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// Where a field is placed in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLocation {
    pub file_id: String,
    pub page_id: String,
    pub position_id: String,
}

fn ordered_pages<'a>(order: &[String], pages: &'a [Page]) -> Vec<&'a Page> {
    if order.is_empty() {
        return pages.iter().collect();
    }
    order
        .iter()
        .filter_map(|id| pages.iter().find(|page| &page.id == id))
        .collect()
}

impl File {
    /// Pages in `pageOrder` order.
    pub fn ordered_pages(&self) -> Vec<&Page> {
        ordered_pages(&self.page_order, &self.pages)
    }

    pub fn view(&self, kind: &str) -> Option<&ModelView> {
        self.views.iter().find(|view| view.kind == kind)
    }
}

impl Document {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut document: Document = serde_json::from_str(text)?;
        document.normalize();
        Ok(document)
    }

    pub fn from_value(value: JsonValue) -> Result<Self, serde_json::Error> {
        let mut document: Document = serde_json::from_value(value)?;
        document.normalize();
        Ok(document)
    }

    pub fn normalize(&mut self) {
        for field in &mut self.fields {
            field.normalize();
        }
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn field_mut(&mut self, id: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|field| field.id == id)
    }

    pub fn field_by_identifier(&self, identifier: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| !field.identifier.is_empty() && field.identifier == identifier)
    }

    /// Looks a page up across every file and view.
    pub fn page(&self, id: &str) -> Option<&Page> {
        self.files.iter().find_map(|file| {
            file.pages
                .iter()
                .chain(file.views.iter().flat_map(|view| view.pages.iter()))
                .find(|page| page.id == id)
        })
    }

    pub fn first_page(&self) -> Option<&Page> {
        self.pages_for_view(None).into_iter().next()
    }

    /// Pages of the first file, from the named view when it has pages.
    pub fn pages_for_view(&self, view: Option<&str>) -> Vec<&Page> {
        let Some(file) = self.files.first() else {
            return Vec::new();
        };
        if let Some(kind) = view
            && let Some(model_view) = file.view(kind)
            && !model_view.pages.is_empty()
        {
            return ordered_pages(&model_view.page_order, &model_view.pages);
        }
        file.ordered_pages()
    }

    /// The current page when it is visible, else the first visible page in
    /// order, else the first page.
    pub fn first_valid_page(
        &self,
        current_page_id: Option<&str>,
        lookup: &dyn ValueLookup,
    ) -> Option<&Page> {
        self.first_valid_page_in_view(None, current_page_id, lookup)
    }

    /// [`Document::first_valid_page`] over the pages of a model view.
    pub fn first_valid_page_in_view(
        &self,
        view: Option<&str>,
        current_page_id: Option<&str>,
        lookup: &dyn ValueLookup,
    ) -> Option<&Page> {
        let pages = self.pages_for_view(view);
        if pages.len() == 1 {
            return pages.first().copied();
        }
        if let Some(current) = current_page_id
            && let Some(page) = pages.iter().find(|page| page.id == current)
            && page_visible(page, lookup)
        {
            return Some(*page);
        }
        pages
            .iter()
            .find(|page| page_visible(page, lookup))
            .or_else(|| pages.first())
            .copied()
    }

    /// First placement of a field, searching files in order.
    pub fn field_position(&self, field_id: &str) -> Option<FieldLocation> {
        self.files.iter().find_map(|file| {
            file.pages.iter().find_map(|page| {
                page.field_positions
                    .iter()
                    .find(|position| position.field == field_id)
                    .map(|position| FieldLocation {
                        file_id: file.id.clone(),
                        page_id: page.id.clone(),
                        position_id: position.id.clone(),
                    })
            })
        })
    }

    /// Every page id whose placements include the field.
    pub fn pages_hosting(&self, field_id: &str) -> Vec<&str> {
        self.files
            .iter()
            .flat_map(|file| file.pages.iter())
            .filter(|page| {
                page.field_positions
                    .iter()
                    .any(|position| position.field == field_id)
            })
            .map(|page| page.id.as_str())
            .collect()
    }

    pub fn all_pages(&self) -> impl Iterator<Item = &Page> {
        self.files.iter().flat_map(|file| file.pages.iter())
    }
}
