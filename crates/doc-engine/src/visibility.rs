use std::cmp::Ordering;
use std::str::FromStr;

use serde::Serialize;
use tracing::warn;

use crate::error::ConditionError;
use crate::formula::value::{FormulaValue, compare};
use crate::spec::{Condition, Document, Field, Logic, LogicAction, LogicEval, Page};
use crate::value::Value;

pub type VisibilityMap = std::collections::BTreeMap<String, bool>;

/// Current value of a field by id. `None` when the field does not exist.
pub trait ValueLookup {
    fn field_value(&self, field_id: &str) -> Option<Value>;
}

impl<F> ValueLookup for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn field_value(&self, field_id: &str) -> Option<Value> {
        self(field_id)
    }
}

impl ValueLookup for Document {
    fn field_value(&self, field_id: &str) -> Option<Value> {
        self.field(field_id).map(|field| field.value.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    IsEmpty,
    IsFilled,
}

impl FromStr for ConditionOperator {
    type Err = ConditionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "=" | "==" => Ok(ConditionOperator::Equals),
            "!=" => Ok(ConditionOperator::NotEquals),
            "?=" => Ok(ConditionOperator::Contains),
            ">" => Ok(ConditionOperator::GreaterThan),
            "<" => Ok(ConditionOperator::LessThan),
            ">=" => Ok(ConditionOperator::GreaterOrEqual),
            "<=" => Ok(ConditionOperator::LessOrEqual),
            "null=" => Ok(ConditionOperator::IsEmpty),
            "*=" => Ok(ConditionOperator::IsFilled),
            other => Err(ConditionError::UnknownOperator(other.to_string())),
        }
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    if let Value::StringArray(selected) = left {
        if let Value::StringArray(expected) = right {
            return selected == expected;
        }
        let wanted = right.to_text();
        return selected.iter().any(|item| *item == wanted);
    }
    compare(&FormulaValue::from(left), &FormulaValue::from(right)) == Ordering::Equal
}

fn contains(left: &Value, right: &Value) -> bool {
    let needle = right.to_text().to_lowercase();
    match left {
        Value::Null => false,
        Value::StringArray(items) => items.iter().any(|item| item.to_lowercase() == needle),
        other => other.to_text().to_lowercase().contains(&needle),
    }
}

fn ordered(left: &Value, right: &Value, accept: fn(Ordering) -> bool) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    accept(compare(&FormulaValue::from(left), &FormulaValue::from(right)))
}

/// Evaluates one condition against the current value of its field.
/// A missing field reads as `Null`.
pub fn evaluate_condition(
    condition: &Condition,
    lookup: &dyn ValueLookup,
) -> Result<bool, ConditionError> {
    let operator: ConditionOperator = condition.condition.parse()?;
    let left = lookup.field_value(&condition.field).unwrap_or_default();
    let right = &condition.value;
    Ok(match operator {
        ConditionOperator::Equals => equals(&left, right),
        ConditionOperator::NotEquals => !equals(&left, right),
        ConditionOperator::Contains => contains(&left, right),
        ConditionOperator::GreaterThan => ordered(&left, right, Ordering::is_gt),
        ConditionOperator::LessThan => ordered(&left, right, Ordering::is_lt),
        ConditionOperator::GreaterOrEqual => ordered(&left, right, Ordering::is_ge),
        ConditionOperator::LessOrEqual => ordered(&left, right, Ordering::is_le),
        ConditionOperator::IsEmpty => left.is_empty(),
        ConditionOperator::IsFilled => !left.is_empty(),
    })
}

/// `and` needs every condition, `or` any. With no conditions `and` holds and
/// `or` does not. A condition with an unknown operator counts as false.
pub fn logic_satisfied(logic: &Logic, lookup: &dyn ValueLookup) -> bool {
    let mut results = logic.conditions.iter().map(|condition| {
        evaluate_condition(condition, lookup).unwrap_or_else(|error| {
            warn!(field = %condition.field, %error, "condition evaluated as false");
            false
        })
    });
    match logic.eval {
        LogicEval::And => results.all(|result| result),
        LogicEval::Or => results.any(|result| result),
    }
}

/// `hidden` wins over any logic. Otherwise a `show` rule shows the item when
/// satisfied and a `hide` rule hides it when satisfied.
pub fn is_visible(hidden: bool, logic: Option<&Logic>, lookup: &dyn ValueLookup) -> bool {
    if hidden {
        return false;
    }
    match logic {
        None => true,
        Some(logic) => {
            let satisfied = logic_satisfied(logic, lookup);
            match logic.action {
                LogicAction::Show => satisfied,
                LogicAction::Hide => !satisfied,
            }
        }
    }
}

pub fn field_visible(field: &Field, lookup: &dyn ValueLookup) -> bool {
    is_visible(field.hidden, field.logic.as_ref(), lookup)
}

pub fn page_visible(page: &Page, lookup: &dyn ValueLookup) -> bool {
    is_visible(page.hidden, page.logic.as_ref(), lookup)
}

/// Visibility of every field and page in a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Visibility {
    pub fields: VisibilityMap,
    pub pages: VisibilityMap,
}

impl Visibility {
    pub fn field(&self, field_id: &str) -> bool {
        self.fields.get(field_id).copied().unwrap_or(true)
    }

    pub fn page(&self, page_id: &str) -> bool {
        self.pages.get(page_id).copied().unwrap_or(true)
    }
}

/// Computes visibility from the fields' own `hidden` flags. A document with a
/// single page always shows it.
pub fn resolve_visibility(document: &Document, lookup: &dyn ValueLookup) -> Visibility {
    resolve_visibility_with(document, lookup, &|field: &Field| field.hidden)
}

/// Like [`resolve_visibility`] with a caller-supplied hidden flag per field.
pub fn resolve_visibility_with(
    document: &Document,
    lookup: &dyn ValueLookup,
    hidden: &dyn Fn(&Field) -> bool,
) -> Visibility {
    let mut visibility = Visibility::default();
    for field in &document.fields {
        let visible = is_visible(hidden(field), field.logic.as_ref(), lookup);
        visibility.fields.insert(field.id.clone(), visible);
    }
    let pages: Vec<&Page> = document.all_pages().collect();
    let single = pages.len() == 1;
    for page in pages {
        let visible = (single && !page.hidden) || page_visible(page, lookup);
        visibility.pages.insert(page.id.clone(), visible);
    }
    visibility
}
