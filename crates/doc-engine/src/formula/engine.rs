use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::FormulaError;
use crate::formula::ast::Expr;
use crate::formula::eval::{Evaluator, ReferenceResolver};
use crate::formula::parser::parse;
use crate::formula::value::{FormulaValue, element_object};
use crate::spec::{Document, Field, FieldType, Formula, FormulaKey};
use crate::value::{Element, Value};
use crate::visibility::ValueLookup;

/// Nesting limit for formula resolution. A chain deeper than this resolves
/// its innermost target to the type default.
pub const MAX_DEPTH: usize = 256;

/// A field property written by a formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub field_id: String,
    pub key: FormulaKey,
}

impl Target {
    pub fn new(field_id: impl Into<String>, key: FormulaKey) -> Self {
        Self {
            field_id: field_id.into(),
            key,
        }
    }

    pub fn value(field_id: impl Into<String>) -> Self {
        Self::new(field_id, FormulaKey::Value)
    }

    pub fn hidden(field_id: impl Into<String>) -> Self {
        Self::new(field_id, FormulaKey::Hidden)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaState {
    Resolving,
    Resolved(Value),
    /// The target fell back to `value`, its type default.
    Errored { value: Value, reason: FormulaError },
}

impl FormulaState {
    fn settled(&self) -> Option<&Value> {
        match self {
            FormulaState::Resolving => None,
            FormulaState::Resolved(value) | FormulaState::Errored { value, .. } => Some(value),
        }
    }
}

#[derive(Debug)]
struct Plan {
    formula_id: String,
    expression: Result<Arc<Expr>, FormulaError>,
    /// Field ids the expression reads.
    dependencies: BTreeSet<String>,
}

impl Plan {
    fn compile(formula: &Formula, names: &HashMap<String, String>) -> Self {
        let expression = parse(&formula.expression).map(Arc::new);
        let dependencies = match &expression {
            Ok(expr) => expr
                .references()
                .iter()
                .filter_map(|name| names.get(name).cloned())
                .collect(),
            Err(err) => {
                debug!(formula = %formula.id, error = %err, "formula does not parse");
                BTreeSet::new()
            }
        };
        Self {
            formula_id: formula.id.clone(),
            expression,
            dependencies,
        }
    }
}

/// Resolves every formula-driven field of a document lazily and memoizes
/// the results until they are invalidated.
///
/// Reference cycles are found up front from the dependency graph; every
/// target on a cycle resolves to its type default with
/// [`FormulaError::CircularReference`]. Revisiting a target that is still
/// being resolved is caught as well, so evaluation terminates for any input.
#[derive(Debug)]
pub struct FormulaEngine {
    plans: HashMap<Target, Plan>,
    names: HashMap<String, String>,
    dependents: HashMap<String, BTreeSet<Target>>,
    cyclic: HashSet<Target>,
    states: HashMap<Target, FormulaState>,
    stack: Vec<Target>,
    dynamic_cycle: HashSet<Target>,
}

fn name_index(document: &Document) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for field in &document.fields {
        names.insert(field.id.clone(), field.id.clone());
    }
    for field in &document.fields {
        if !field.identifier.is_empty() {
            names.insert(field.identifier.clone(), field.id.clone());
        }
    }
    names
}

impl FormulaEngine {
    pub fn new(document: &Document) -> Self {
        let names = name_index(document);
        let formulas: HashMap<&str, &Formula> = document
            .formulas
            .iter()
            .map(|formula| (formula.id.as_str(), formula))
            .collect();

        let mut plans = HashMap::new();
        for field in &document.fields {
            for applied in &field.formulas {
                match formulas.get(applied.formula.as_str()) {
                    Some(formula) => {
                        plans.insert(Target::new(&field.id, applied.key), Plan::compile(formula, &names));
                    }
                    None => warn!(
                        field = %field.id,
                        formula = %applied.formula,
                        "field applies a formula the document does not declare"
                    ),
                }
            }
        }
        for formula in &document.formulas {
            let Some(target) = &formula.target else {
                continue;
            };
            match names.get(target) {
                Some(field_id) => {
                    plans
                        .entry(Target::value(field_id))
                        .or_insert_with(|| Plan::compile(formula, &names));
                }
                None => warn!(formula = %formula.id, target = %target, "formula targets an unknown field"),
            }
        }

        let mut dependents: HashMap<String, BTreeSet<Target>> = HashMap::new();
        let mut graph: BTreeMap<Target, Vec<Target>> = BTreeMap::new();
        for (target, plan) in &plans {
            for dependency in &plan.dependencies {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(target.clone());
            }
            if target.key == FormulaKey::Value {
                let edges = plan
                    .dependencies
                    .iter()
                    .map(Target::value)
                    .filter(|next| plans.contains_key(next))
                    .collect();
                graph.insert(target.clone(), edges);
            }
        }
        let cyclic = cyclic_targets(&graph);
        if !cyclic.is_empty() {
            debug!(count = cyclic.len(), "formula reference cycles detected");
        }

        Self {
            plans,
            names,
            dependents,
            cyclic,
            states: HashMap::new(),
            stack: Vec::new(),
            dynamic_cycle: HashSet::new(),
        }
    }

    pub fn has_formula(&self, target: &Target) -> bool {
        self.plans.contains_key(target)
    }

    /// Formula id driving a target.
    pub fn formula_id(&self, target: &Target) -> Option<&str> {
        self.plans.get(target).map(|plan| plan.formula_id.as_str())
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.plans.keys()
    }

    /// Whether the field's value formula sits on a reference cycle.
    pub fn is_cyclic(&self, field_id: &str) -> bool {
        self.cyclic.contains(&Target::value(field_id))
    }

    pub fn state(&self, target: &Target) -> Option<&FormulaState> {
        self.states.get(target)
    }

    /// Current value of a field: its formula result when it has one, the
    /// stored value otherwise. `None` for unknown fields.
    pub fn field_value(&mut self, document: &Document, field_id: &str) -> Option<Value> {
        document.field(field_id)?;
        Some(self.resolve_target(document, &Target::value(field_id)))
    }

    /// Result of the field's hidden formula, if it has one.
    pub fn hidden(&mut self, document: &Document, field_id: &str) -> Option<bool> {
        let target = Target::hidden(field_id);
        if !self.plans.contains_key(&target) {
            return None;
        }
        Some(self.resolve_target(document, &target).to_bool())
    }

    /// Why the field's value formula fell back to its default, once resolved.
    pub fn diagnostic(&self, field_id: &str) -> Option<&FormulaError> {
        match self.states.get(&Target::value(field_id)) {
            Some(FormulaState::Errored { reason, .. }) => Some(reason),
            _ => None,
        }
    }

    /// Cached result of a target without triggering resolution.
    pub fn cached(&self, target: &Target) -> Option<&Value> {
        self.states.get(target).and_then(FormulaState::settled)
    }

    pub fn resolve_all(&mut self, document: &Document) {
        let mut targets: Vec<Target> = self.plans.keys().cloned().collect();
        targets.sort();
        for target in targets {
            self.resolve_target(document, &target);
        }
    }

    /// Drops cached results of everything that transitively reads the
    /// field, and the field's own. Returns the ids of dependent fields.
    pub fn invalidate(&mut self, field_id: &str) -> Vec<String> {
        let mut affected = BTreeSet::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::from([field_id.to_string()]);
        self.states.remove(&Target::value(field_id));
        self.states.remove(&Target::hidden(field_id));
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(readers) = self.dependents.get(&current) else {
                continue;
            };
            for reader in readers {
                self.states.remove(reader);
                if reader.field_id != field_id {
                    affected.insert(reader.field_id.clone());
                }
                if reader.key == FormulaKey::Value {
                    queue.push_back(reader.field_id.clone());
                }
            }
        }
        debug!(field = field_id, dependents = affected.len(), "invalidated formula results");
        affected.into_iter().collect()
    }

    pub fn invalidate_all(&mut self) {
        self.states.clear();
    }

    /// Copy of the document with every formula result written back.
    pub fn resolved_document(&mut self, document: &Document) -> Document {
        self.resolve_all(document);
        let mut resolved = document.clone();
        for field in &mut resolved.fields {
            if let Some(value) = self.cached(&Target::value(&field.id)) {
                field.value = value.clone();
            }
            if let Some(hidden) = self.cached(&Target::hidden(&field.id)) {
                field.hidden = hidden.to_bool();
            }
        }
        resolved
    }

    fn resolve_target(&mut self, document: &Document, target: &Target) -> Value {
        let Some(field) = document.field(&target.field_id) else {
            return Value::Null;
        };
        let expression = match self.plans.get(target) {
            Some(plan) => plan.expression.clone(),
            None => {
                return match target.key {
                    FormulaKey::Value => field.value.clone(),
                    FormulaKey::Hidden => Value::Bool(field.hidden),
                };
            }
        };
        let default = default_for(field, target.key);

        match self.states.get(target) {
            Some(FormulaState::Resolving) => {
                if let Some(start) = self.stack.iter().position(|entry| entry == target) {
                    self.dynamic_cycle.extend(self.stack[start..].iter().cloned());
                }
                debug!(field = %target.field_id, "formula revisited while resolving");
                return default;
            }
            Some(state) => {
                if let Some(value) = state.settled() {
                    return value.clone();
                }
            }
            None => {}
        }

        if self.cyclic.contains(target) {
            debug!(field = %target.field_id, "formula is part of a reference cycle");
            self.fail(target, default.clone(), FormulaError::CircularReference(target.field_id.clone()));
            return default;
        }
        if self.stack.len() >= MAX_DEPTH {
            debug!(field = %target.field_id, depth = MAX_DEPTH, "formula resolution too deep");
            self.fail(target, default.clone(), FormulaError::ResolutionTooDeep(MAX_DEPTH));
            return default;
        }

        self.states.insert(target.clone(), FormulaState::Resolving);
        self.stack.push(target.clone());
        let outcome = expression.and_then(|expr| {
            let mut resolver = EngineResolver {
                engine: self,
                document,
            };
            Evaluator::new(&mut resolver).eval(&expr)
        });
        self.stack.pop();

        let result = if self.dynamic_cycle.remove(target) {
            Err(FormulaError::CircularReference(target.field_id.clone()))
        } else {
            outcome.and_then(|value| coerce(field, target.key, value))
        };
        match result {
            Ok(value) => {
                self.states
                    .insert(target.clone(), FormulaState::Resolved(value.clone()));
                value
            }
            Err(reason) => {
                debug!(field = %target.field_id, error = %reason, "formula fell back to default");
                self.fail(target, default.clone(), reason);
                default
            }
        }
    }

    fn fail(&mut self, target: &Target, value: Value, reason: FormulaError) {
        self.states
            .insert(target.clone(), FormulaState::Errored { value, reason });
    }
}

fn default_for(field: &Field, key: FormulaKey) -> Value {
    match key {
        FormulaKey::Value => field.kind.default_value(),
        FormulaKey::Hidden => Value::Bool(field.hidden),
    }
}

/// Converts a formula result to the variant the target field holds.
fn coerce(field: &Field, key: FormulaKey, value: FormulaValue) -> Result<Value, FormulaError> {
    if key == FormulaKey::Hidden {
        return Ok(Value::Bool(value.truthy()));
    }
    if value.is_null() {
        return Ok(field.kind.default_value());
    }
    match field.kind {
        FieldType::Number | FieldType::Date => value.to_number().map(Value::Number),
        FieldType::Text
        | FieldType::Textarea
        | FieldType::Dropdown
        | FieldType::Signature
        | FieldType::Block
        | FieldType::RichText => match value {
            FormulaValue::Array(_) | FormulaValue::Object(_) => {
                Err(FormulaError::mismatch("text", value.type_name()))
            }
            other => Ok(Value::Text(other.to_text())),
        },
        FieldType::MultiSelect => match value {
            FormulaValue::Array(items) => Ok(Value::StringArray(
                items.iter().map(FormulaValue::to_text).collect(),
            )),
            FormulaValue::Text(text) => Ok(Value::StringArray(vec![text])),
            other => Err(FormulaError::mismatch("array", other.type_name())),
        },
        FieldType::Table | FieldType::Collection | FieldType::Chart | FieldType::Image => {
            match value.to_value() {
                Value::ElementArray(rows) => Ok(Value::ElementArray(rows)),
                Value::StringArray(items) if items.is_empty() => Ok(Value::ElementArray(Vec::new())),
                _ => Err(FormulaError::mismatch("rows", value.type_name())),
            }
        }
        FieldType::Unknown => Ok(value.to_value()),
    }
}

/// Rows a formula sees for a tabular field: not deleted, in row order.
fn visible_rows<'a>(field: &Field, rows: &'a [Element]) -> Vec<&'a Element> {
    let mut ordered: Vec<&Element> = Vec::with_capacity(rows.len());
    if field.uses_row_order() && !field.row_order.is_empty() {
        for id in &field.row_order {
            if let Some(row) = rows.iter().find(|row| &row.id == id) {
                ordered.push(row);
            }
        }
        for row in rows {
            if !field.row_order.contains(&row.id) {
                ordered.push(row);
            }
        }
    } else {
        ordered.extend(rows.iter());
    }
    ordered.retain(|row| !row.deleted);
    ordered
}

/// Maps column titles and identifiers in a path to column ids.
fn column_path(field: &Field, rest: &[String]) -> Vec<String> {
    rest.iter()
        .map(|segment| {
            field
                .table_columns
                .iter()
                .find(|column| {
                    column.id == *segment
                        || column.identifier.as_deref() == Some(segment.as_str())
                        || column.title.eq_ignore_ascii_case(segment)
                })
                .map(|column| column.id.clone())
                .unwrap_or_else(|| segment.clone())
        })
        .collect()
}

fn reference_value(field: &Field, value: &Value, rest: &[String]) -> FormulaValue {
    if field.kind.is_tabular()
        && let Some(rows) = value.as_elements()
    {
        let rows = FormulaValue::Array(
            visible_rows(field, rows)
                .into_iter()
                .map(element_object)
                .collect(),
        );
        return rows.path(&column_path(field, rest));
    }
    FormulaValue::from(value).path(rest)
}

struct EngineResolver<'e, 'd> {
    engine: &'e mut FormulaEngine,
    document: &'d Document,
}

impl ReferenceResolver for EngineResolver<'_, '_> {
    fn resolve(&mut self, path: &[String]) -> Result<FormulaValue, FormulaError> {
        let Some((head, rest)) = path.split_first() else {
            return Ok(FormulaValue::Null);
        };
        let Some(field_id) = self.engine.names.get(head).cloned() else {
            return Ok(FormulaValue::Null);
        };
        let Some(field) = self.document.field(&field_id) else {
            return Ok(FormulaValue::Null);
        };
        let value = self
            .engine
            .resolve_target(self.document, &Target::value(&field_id));
        Ok(reference_value(field, &value, rest))
    }
}

/// Field values with cached formula results taking precedence over the
/// stored ones. Resolve the engine first to see every result.
pub struct ResolvedValues<'a> {
    pub document: &'a Document,
    pub engine: &'a FormulaEngine,
}

impl ValueLookup for ResolvedValues<'_> {
    fn field_value(&self, field_id: &str) -> Option<Value> {
        let field = self.document.field(field_id)?;
        Some(
            self.engine
                .cached(&Target::value(field_id))
                .cloned()
                .unwrap_or_else(|| field.value.clone()),
        )
    }
}

/// Value targets that sit on a reference cycle, self references included.
/// Tarjan's algorithm, iterative so long chains do not exhaust the stack.
fn cyclic_targets(graph: &BTreeMap<Target, Vec<Target>>) -> HashSet<Target> {
    let mut index: HashMap<&Target, usize> = HashMap::new();
    let mut low: HashMap<&Target, usize> = HashMap::new();
    let mut on_stack: HashSet<&Target> = HashSet::new();
    let mut stack: Vec<&Target> = Vec::new();
    let mut cyclic = HashSet::new();
    let mut counter = 0usize;

    for root in graph.keys() {
        if index.contains_key(root) {
            continue;
        }
        index.insert(root, counter);
        low.insert(root, counter);
        counter += 1;
        stack.push(root);
        on_stack.insert(root);
        let mut work: Vec<(&Target, usize)> = vec![(root, 0)];

        while let Some(frame) = work.last_mut() {
            let node = frame.0;
            let edges: &[Target] = graph.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(next) = edges.get(frame.1) {
                frame.1 += 1;
                if !index.contains_key(next) {
                    index.insert(next, counter);
                    low.insert(next, counter);
                    counter += 1;
                    stack.push(next);
                    on_stack.insert(next);
                    work.push((next, 0));
                } else if on_stack.contains(next) {
                    let reached = index[next];
                    if let Some(entry) = low.get_mut(node) {
                        *entry = (*entry).min(reached);
                    }
                }
                continue;
            }

            work.pop();
            let node_low = low[node];
            if let Some(&(parent, _)) = work.last()
                && let Some(entry) = low.get_mut(parent)
            {
                *entry = (*entry).min(node_low);
            }
            if node_low == index[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack.remove(member);
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                if component.len() > 1 || edges.contains(node) {
                    cyclic.extend(component.into_iter().cloned());
                }
            }
        }
    }
    cyclic
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(fields: serde_json::Value, formulas: serde_json::Value) -> Document {
        Document::from_value(json!({
            "_id": "doc",
            "files": [],
            "fields": fields,
            "formulas": formulas,
        }))
        .expect("deserialize")
    }

    fn number_field(id: &str, formula: Option<&str>, value: f64) -> serde_json::Value {
        match formula {
            Some(formula) => json!({
                "_id": id, "identifier": id, "type": "number", "value": value,
                "formulas": [{ "formula": formula, "key": "value" }]
            }),
            None => json!({ "_id": id, "identifier": id, "type": "number", "value": value }),
        }
    }

    #[test]
    fn resolves_dependency_chains() {
        let doc = document(
            json!([
                number_field("a", Some("fa"), 0.0),
                number_field("b", Some("fb"), 0.0),
                number_field("c", None, 4.0),
            ]),
            json!([
                { "_id": "fa", "expression": "b + 1" },
                { "_id": "fb", "expression": "c * 2" },
            ]),
        );
        let mut engine = FormulaEngine::new(&doc);
        assert_eq!(engine.field_value(&doc, "a"), Some(Value::Number(9.0)));
        assert_eq!(engine.field_value(&doc, "c"), Some(Value::Number(4.0)));
        assert!(engine.diagnostic("a").is_none());
    }

    #[test]
    fn cycles_fall_back_to_defaults() {
        let doc = document(
            json!([
                number_field("a", Some("fa"), 7.0),
                number_field("b", Some("fb"), 7.0),
                number_field("c", Some("fc"), 7.0),
                number_field("d", Some("fd"), 0.0),
            ]),
            json!([
                { "_id": "fa", "expression": "b + 1" },
                { "_id": "fb", "expression": "a + 1" },
                { "_id": "fc", "expression": "c + 2" },
                { "_id": "fd", "expression": "a + 5" },
            ]),
        );
        let mut engine = FormulaEngine::new(&doc);
        assert!(engine.is_cyclic("a") && engine.is_cyclic("b") && engine.is_cyclic("c"));
        assert!(!engine.is_cyclic("d"));
        assert_eq!(engine.field_value(&doc, "a"), Some(Value::Number(0.0)));
        assert_eq!(engine.field_value(&doc, "c"), Some(Value::Number(0.0)));
        assert_eq!(engine.field_value(&doc, "d"), Some(Value::Number(5.0)));
        assert_eq!(
            engine.diagnostic("b"),
            Some(&FormulaError::CircularReference("b".into()))
        );
    }

    #[test]
    fn invalidation_reaches_transitive_readers() {
        let mut doc = document(
            json!([
                number_field("total", Some("ft"), 0.0),
                number_field("double", Some("fd"), 0.0),
                number_field("base", None, 1.0),
            ]),
            json!([
                { "_id": "ft", "expression": "double + base" },
                { "_id": "fd", "expression": "base * 2" },
            ]),
        );
        let mut engine = FormulaEngine::new(&doc);
        assert_eq!(engine.field_value(&doc, "total"), Some(Value::Number(3.0)));

        doc.field_mut("base").expect("field").value = Value::Number(10.0);
        assert_eq!(engine.field_value(&doc, "total"), Some(Value::Number(3.0)));
        let affected = engine.invalidate("base");
        assert_eq!(affected, vec!["double".to_string(), "total".to_string()]);
        assert_eq!(engine.field_value(&doc, "total"), Some(Value::Number(30.0)));
    }

    #[test]
    fn errors_and_type_mismatches_use_defaults() {
        let doc = document(
            json!([
                number_field("a", Some("fa"), 5.0),
                number_field("b", Some("fb"), 5.0),
                { "_id": "t", "type": "text", "value": "x",
                  "formulas": [{ "formula": "ft" }] },
            ]),
            json!([
                { "_id": "fa", "expression": "1 / 0" },
                { "_id": "fb", "expression": "'abc'" },
                { "_id": "ft", "expression": "concat('n=', a)" },
            ]),
        );
        let mut engine = FormulaEngine::new(&doc);
        assert_eq!(engine.field_value(&doc, "a"), Some(Value::Number(0.0)));
        assert_eq!(engine.diagnostic("a"), Some(&FormulaError::DivisionByZero));
        assert_eq!(engine.field_value(&doc, "b"), Some(Value::Number(0.0)));
        assert!(matches!(
            engine.diagnostic("b"),
            Some(FormulaError::TypeMismatch { .. })
        ));
        assert_eq!(engine.field_value(&doc, "t"), Some(Value::Text("n=0".into())));
    }

    #[test]
    fn deeply_nested_formulas_use_defaults() {
        let nested = format!("{}1{}", "(".repeat(4000), ")".repeat(4000));
        let doc = document(
            json!([number_field("a", Some("fa"), 5.0), number_field("b", Some("fb"), 0.0)]),
            json!([
                { "_id": "fa", "expression": nested },
                { "_id": "fb", "expression": "a + 2" },
            ]),
        );
        let mut engine = FormulaEngine::new(&doc);
        assert_eq!(engine.field_value(&doc, "a"), Some(Value::Number(0.0)));
        assert!(matches!(
            engine.diagnostic("a"),
            Some(FormulaError::Syntax { .. })
        ));
        assert_eq!(engine.field_value(&doc, "b"), Some(Value::Number(2.0)));
    }

    #[test]
    fn hidden_formulas_and_targets() {
        let doc = document(
            json!([
                number_field("qty", None, 3.0),
                { "_id": "note", "type": "text",
                  "formulas": [{ "formula": "fh", "key": "hidden" }] },
                number_field("out", None, 0.0),
            ]),
            json!([
                { "_id": "fh", "expression": "qty > 2" },
                { "_id": "fo", "expression": "qty * 10", "target": "out" },
            ]),
        );
        let mut engine = FormulaEngine::new(&doc);
        assert_eq!(engine.hidden(&doc, "note"), Some(true));
        assert_eq!(engine.hidden(&doc, "qty"), None);
        let resolved = engine.resolved_document(&doc);
        assert_eq!(resolved.field("out").expect("out").value, Value::Number(30.0));
        assert!(resolved.field("note").expect("note").hidden);
    }

    #[test]
    fn table_columns_resolve_by_title() {
        let doc = document(
            json!([
                {
                    "_id": "items", "identifier": "products", "type": "table",
                    "tableColumns": [{ "_id": "c1", "type": "number", "title": "Price" }],
                    "rowOrder": ["r2", "r1"],
                    "value": [
                        { "_id": "r1", "cells": { "c1": 2 } },
                        { "_id": "r2", "cells": { "c1": 5 } },
                        { "_id": "r3", "deleted": true, "cells": { "c1": 100 } },
                    ]
                },
                number_field("sum", Some("fs"), 0.0),
                number_field("first", Some("ff"), 0.0),
            ]),
            json!([
                { "_id": "fs", "expression": "sum(products.price)" },
                { "_id": "ff", "expression": "products.0.c1" },
            ]),
        );
        let mut engine = FormulaEngine::new(&doc);
        assert_eq!(engine.field_value(&doc, "sum"), Some(Value::Number(7.0)));
        assert_eq!(engine.field_value(&doc, "first"), Some(Value::Number(5.0)));
    }

    #[test]
    fn tarjan_marks_self_loops_only_when_present() {
        let mut graph = BTreeMap::new();
        graph.insert(Target::value("x"), vec![Target::value("x")]);
        graph.insert(Target::value("y"), vec![Target::value("z")]);
        graph.insert(Target::value("z"), vec![]);
        let cyclic = cyclic_targets(&graph);
        assert!(cyclic.contains(&Target::value("x")));
        assert_eq!(cyclic.len(), 1);
    }
}
