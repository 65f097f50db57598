use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::FormulaError;
use crate::value::{Element, Point, Value, format_number};

/// Runtime value of formula evaluation.
#[derive(Debug, Clone, Default)]
pub enum FormulaValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Array(Vec<FormulaValue>),
    Object(BTreeMap<String, FormulaValue>),
    #[default]
    Null,
}

impl FormulaValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FormulaValue::Number(_) => "number",
            FormulaValue::Text(_) => "text",
            FormulaValue::Bool(_) => "boolean",
            FormulaValue::Array(_) => "array",
            FormulaValue::Object(_) => "object",
            FormulaValue::Null => "null",
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        FormulaValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FormulaValue::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            FormulaValue::Number(number) => *number != 0.0 && !number.is_nan(),
            FormulaValue::Text(text) => !text.is_empty(),
            FormulaValue::Bool(flag) => *flag,
            FormulaValue::Array(items) => !items.is_empty(),
            FormulaValue::Object(map) => !map.is_empty(),
            FormulaValue::Null => false,
        }
    }

    /// Numeric reading used by comparisons: null and blank text read as 0,
    /// booleans as 0/1, other text only when it parses.
    pub fn comparable_number(&self) -> Option<f64> {
        match self {
            FormulaValue::Number(number) => Some(*number),
            FormulaValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            FormulaValue::Null => Some(0.0),
            FormulaValue::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Some(0.0)
                } else {
                    trimmed.parse::<f64>().ok()
                }
            }
            FormulaValue::Array(_) | FormulaValue::Object(_) => None,
        }
    }

    /// Operand of `- * / %` and math functions.
    pub fn to_number(&self) -> Result<f64, FormulaError> {
        match self {
            FormulaValue::Array(_) | FormulaValue::Object(_) => {
                Err(FormulaError::mismatch("number", self.type_name()))
            }
            other => other
                .comparable_number()
                .ok_or_else(|| FormulaError::mismatch("number", other.type_name())),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            FormulaValue::Number(number) => format_number(*number),
            FormulaValue::Text(text) => text.clone(),
            FormulaValue::Bool(flag) => flag.to_string(),
            FormulaValue::Array(items) => items
                .iter()
                .map(FormulaValue::to_text)
                .collect::<Vec<_>>()
                .join(","),
            FormulaValue::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, value.to_text()))
                    .collect::<Vec<_>>();
                format!("{{{}}}", entries.join(", "))
            }
            FormulaValue::Null => String::new(),
        }
    }

    /// Property access: object keys (exact, then case-insensitive), array
    /// indexes for numeric keys, and column plucking across arrays of objects.
    pub fn member(&self, key: &str) -> FormulaValue {
        match self {
            FormulaValue::Object(map) => map
                .get(key)
                .or_else(|| {
                    map.iter()
                        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
                        .map(|(_, value)| value)
                })
                .cloned()
                .unwrap_or_default(),
            FormulaValue::Array(items) => match key.parse::<usize>() {
                Ok(index) => items.get(index).cloned().unwrap_or_default(),
                Err(_) => FormulaValue::Array(items.iter().map(|item| item.member(key)).collect()),
            },
            _ => FormulaValue::Null,
        }
    }

    pub fn index(&self, index: &FormulaValue) -> FormulaValue {
        match (self, index) {
            (FormulaValue::Text(text), FormulaValue::Number(position)) if *position >= 0.0 => text
                .chars()
                .nth(*position as usize)
                .map(|ch| FormulaValue::Text(ch.to_string()))
                .unwrap_or_default(),
            (_, FormulaValue::Number(position)) if *position >= 0.0 => {
                self.member(&format_number(position.trunc()))
            }
            (_, key) => self.member(&key.to_text()),
        }
    }

    /// Walks a dotted path from this value.
    pub fn path<S: AsRef<str>>(&self, segments: &[S]) -> FormulaValue {
        segments
            .iter()
            .fold(self.clone(), |current, segment| current.member(segment.as_ref()))
    }

    /// Converts back into a document value: arrays of objects become
    /// element arrays, other arrays become string arrays.
    pub fn to_value(&self) -> Value {
        match self {
            FormulaValue::Number(number) => Value::Number(*number),
            FormulaValue::Text(text) => Value::Text(text.clone()),
            FormulaValue::Bool(flag) => Value::Bool(*flag),
            FormulaValue::Null => Value::Null,
            FormulaValue::Array(items) => {
                if !items.is_empty()
                    && items
                        .iter()
                        .all(|item| matches!(item, FormulaValue::Object(_)))
                {
                    Value::ElementArray(items.iter().filter_map(element_from_object).collect())
                } else {
                    Value::StringArray(items.iter().map(FormulaValue::to_text).collect())
                }
            }
            FormulaValue::Object(map) => Value::Dict(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_value()))
                    .collect(),
            ),
        }
    }
}

fn element_from_object(item: &FormulaValue) -> Option<Element> {
    let FormulaValue::Object(map) = item else {
        return None;
    };
    let id = map.get("_id").map(FormulaValue::to_text).unwrap_or_default();
    let cells = map
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .map(|(key, value)| (key.clone(), value.to_value()))
        .collect();
    Some(Element::with_cells(id, cells))
}

fn point_object(point: &Point) -> FormulaValue {
    let mut map = BTreeMap::new();
    map.insert("_id".to_string(), FormulaValue::text(point.id.clone()));
    map.insert("x".to_string(), point.x.map_or(FormulaValue::Null, FormulaValue::Number));
    map.insert("y".to_string(), point.y.map_or(FormulaValue::Null, FormulaValue::Number));
    map.insert(
        "label".to_string(),
        point.label.clone().map_or(FormulaValue::Null, FormulaValue::Text),
    );
    FormulaValue::Object(map)
}

/// Row or line as an object: `_id`, its cells keyed by column id, and
/// `points`/`title` for chart lines.
pub fn element_object(element: &Element) -> FormulaValue {
    let mut map = BTreeMap::new();
    map.insert("_id".to_string(), FormulaValue::text(element.id.clone()));
    if let Some(cells) = &element.cells {
        for (column, value) in cells {
            map.insert(column.clone(), FormulaValue::from(value));
        }
    }
    if let Some(points) = &element.points {
        map.insert(
            "points".to_string(),
            FormulaValue::Array(points.iter().map(point_object).collect()),
        );
    }
    if let Some(title) = &element.title {
        map.insert("title".to_string(), FormulaValue::text(title.clone()));
    }
    FormulaValue::Object(map)
}

impl From<&Value> for FormulaValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Number(number) => FormulaValue::Number(*number),
            Value::Text(text) => FormulaValue::Text(text.clone()),
            Value::Bool(flag) => FormulaValue::Bool(*flag),
            Value::Null => FormulaValue::Null,
            Value::StringArray(items) => {
                FormulaValue::Array(items.iter().cloned().map(FormulaValue::Text).collect())
            }
            Value::ElementArray(items) => {
                FormulaValue::Array(items.iter().map(element_object).collect())
            }
            Value::Dict(map) => FormulaValue::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), FormulaValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<f64> for FormulaValue {
    fn from(value: f64) -> Self {
        FormulaValue::Number(value)
    }
}

impl From<bool> for FormulaValue {
    fn from(value: bool) -> Self {
        FormulaValue::Bool(value)
    }
}

impl From<&str> for FormulaValue {
    fn from(value: &str) -> Self {
        FormulaValue::Text(value.to_string())
    }
}

fn rank(value: &FormulaValue) -> u8 {
    match value {
        FormulaValue::Array(_) => 1,
        FormulaValue::Object(_) => 2,
        _ => 0,
    }
}

/// Total order shared by comparison operators, `sort`, and condition operators.
///
/// Scalars come first. A scalar with a numeric reading (numbers, booleans,
/// null, blank or numeric text) compares numerically and sorts before text
/// without one, which compares lexically. Arrays follow, ordered by length
/// and then item by item. Objects come last, ordered by size and then by
/// their sorted key/value pairs.
pub fn compare(left: &FormulaValue, right: &FormulaValue) -> Ordering {
    let by_rank = rank(left).cmp(&rank(right));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (left, right) {
        (FormulaValue::Array(a), FormulaValue::Array(b)) => a.len().cmp(&b.len()).then_with(|| {
            a.iter()
                .zip(b)
                .map(|(x, y)| compare(x, y))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        (FormulaValue::Object(a), FormulaValue::Object(b)) => a.len().cmp(&b.len()).then_with(|| {
            a.iter()
                .zip(b)
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare(va, vb)))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        _ => match (left.comparable_number(), right.comparable_number()) {
            (Some(a), Some(b)) => (a + 0.0).total_cmp(&(b + 0.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => left.to_text().cmp(&right.to_text()),
        },
    }
}

pub fn values_equal(left: &FormulaValue, right: &FormulaValue) -> bool {
    compare(left, right) == Ordering::Equal
}

impl PartialEq for FormulaValue {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> FormulaValue {
        FormulaValue::text(value)
    }

    #[test]
    fn scalars_follow_numeric_then_text_order() {
        assert_eq!(compare(&FormulaValue::Number(2.0), &text("10")), Ordering::Less);
        assert_eq!(compare(&FormulaValue::Bool(true), &FormulaValue::Number(1.0)), Ordering::Equal);
        assert_eq!(compare(&FormulaValue::Null, &FormulaValue::Number(0.0)), Ordering::Equal);
        assert_eq!(compare(&FormulaValue::Null, &text("")), Ordering::Equal);
        assert_eq!(compare(&FormulaValue::Number(1e9), &text("abc")), Ordering::Less);
        assert_eq!(compare(&text("apple"), &text("banana")), Ordering::Less);
    }

    #[test]
    fn containers_rank_after_scalars() {
        let short = FormulaValue::Array(vec![FormulaValue::Number(9.0)]);
        let long = FormulaValue::Array(vec![FormulaValue::Number(1.0), FormulaValue::Number(1.0)]);
        let object = FormulaValue::Object(BTreeMap::new());
        assert_eq!(compare(&text("zzz"), &short), Ordering::Less);
        assert_eq!(compare(&short, &long), Ordering::Less);
        assert_eq!(compare(&long, &object), Ordering::Less);
    }

    #[test]
    fn member_plucks_columns() {
        let mut row = BTreeMap::new();
        row.insert("Price".to_string(), FormulaValue::Number(3.0));
        let rows = FormulaValue::Array(vec![FormulaValue::Object(row.clone()), FormulaValue::Object(row)]);
        assert_eq!(
            rows.member("price"),
            FormulaValue::Array(vec![FormulaValue::Number(3.0), FormulaValue::Number(3.0)])
        );
        assert_eq!(rows.path(&["0", "Price"]), FormulaValue::Number(3.0));
    }

    #[test]
    fn converts_back_to_document_values() {
        let list = FormulaValue::Array(vec![text("a"), FormulaValue::Number(2.0)]);
        assert_eq!(list.to_value(), Value::StringArray(vec!["a".into(), "2".into()]));
        assert_eq!(FormulaValue::Number(4.0).to_value(), Value::Number(4.0));
    }
}
