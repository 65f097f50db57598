//! Built-in function library. Names are matched case-insensitively.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use tracing::debug;

use crate::error::FormulaError;
use crate::formula::ast::Expr;
use crate::formula::eval::Evaluator;
use crate::formula::value::{FormulaValue, compare, values_equal};

type Builtin = fn(&mut Evaluator<'_>, &[Expr]) -> Result<FormulaValue, FormulaError>;

fn lookup(name: &str) -> Option<Builtin> {
    let builtin: Builtin = match name.to_ascii_lowercase().as_str() {
        "if" => if_,
        "and" => and,
        "or" => or,
        "not" => not,
        "empty" => empty,
        "concat" => concat,
        "contains" => contains,
        "upper" => upper,
        "lower" => lower,
        "length" => length,
        "tonumber" => to_number,
        "tostring" => to_string,
        "join" => join,
        "equals" => equals,
        "trim" => trim,
        "sum" => sum,
        "pow" => pow,
        "round" => round,
        "ceil" => ceil,
        "floor" => floor,
        "mod" => modulo,
        "max" => max,
        "min" => min,
        "count" => count,
        "avg" | "average" => average,
        "sqrt" => sqrt,
        "now" => now,
        "year" => year,
        "month" => month,
        "day" => day,
        "date" => date,
        "dateadd" => date_add,
        "datesubtract" => date_subtract,
        "timestamp" => timestamp,
        "flat" => flat,
        "map" => map,
        "flatmap" => flat_map,
        "filter" => filter,
        "reduce" => reduce,
        "find" => find,
        "every" => every,
        "some" => some,
        "countif" => count_if,
        "unique" => unique,
        "sort" => sort,
        _ => return None,
    };
    Some(builtin)
}

pub fn call(eval: &mut Evaluator<'_>, name: &str, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    match lookup(name) {
        Some(builtin) => builtin(eval, args),
        None => {
            debug!(function = name, "unknown formula function");
            Err(FormulaError::UnknownFunction(name.to_string()))
        }
    }
}

fn arity(name: &str, args: &[Expr], min: usize, max: usize) -> Result<(), FormulaError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{} argument(s)", min)
        } else if max == usize::MAX {
            format!("at least {} argument(s)", min)
        } else {
            format!("{} to {} arguments", min, max)
        };
        return Err(FormulaError::arguments(
            name,
            format!("expected {}, got {}", expected, args.len()),
        ));
    }
    Ok(())
}

fn eval_all(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<Vec<FormulaValue>, FormulaError> {
    args.iter().map(|arg| eval.eval(arg)).collect()
}

fn flatten_into(value: FormulaValue, out: &mut Vec<FormulaValue>) {
    match value {
        FormulaValue::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}

fn flatten(values: Vec<FormulaValue>) -> Vec<FormulaValue> {
    let mut out = Vec::new();
    for value in values {
        flatten_into(value, &mut out);
    }
    out
}

/// Numeric items of a flattened argument list; nulls and non-numeric text are skipped.
fn numbers(values: Vec<FormulaValue>) -> Vec<f64> {
    flatten(values)
        .into_iter()
        .filter_map(|value| match value {
            FormulaValue::Number(number) => Some(number),
            FormulaValue::Text(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        })
        .collect()
}

fn array_arg(eval: &mut Evaluator<'_>, name: &str, arg: &Expr) -> Result<Vec<FormulaValue>, FormulaError> {
    match eval.eval(arg)? {
        FormulaValue::Array(items) => Ok(items),
        FormulaValue::Null => Ok(Vec::new()),
        other => Err(FormulaError::arguments(
            name,
            format!("expected an array, got {}", other.type_name()),
        )),
    }
}

fn number_arg(eval: &mut Evaluator<'_>, arg: &Expr) -> Result<f64, FormulaError> {
    eval.eval(arg)?.to_number()
}

fn text_arg(eval: &mut Evaluator<'_>, arg: &Expr) -> Result<String, FormulaError> {
    Ok(eval.eval(arg)?.to_text())
}

// logical

fn if_(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("if", args, 2, 3)?;
    if eval.eval(&args[0])?.truthy() {
        eval.eval(&args[1])
    } else {
        match args.get(2) {
            Some(otherwise) => eval.eval(otherwise),
            None => Ok(FormulaValue::Null),
        }
    }
}

fn and(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("and", args, 1, usize::MAX)?;
    for arg in args {
        if !eval.eval(arg)?.truthy() {
            return Ok(FormulaValue::Bool(false));
        }
    }
    Ok(FormulaValue::Bool(true))
}

fn or(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("or", args, 1, usize::MAX)?;
    for arg in args {
        if eval.eval(arg)?.truthy() {
            return Ok(FormulaValue::Bool(true));
        }
    }
    Ok(FormulaValue::Bool(false))
}

fn not(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("not", args, 1, 1)?;
    Ok(FormulaValue::Bool(!eval.eval(&args[0])?.truthy()))
}

/// Blank text, zero, false, empty containers and null are empty.
fn empty(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("empty", args, 1, 1)?;
    Ok(FormulaValue::Bool(!eval.eval(&args[0])?.truthy()))
}

// text

fn concat(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    let values = flatten(eval_all(eval, args)?);
    Ok(FormulaValue::Text(values.iter().map(FormulaValue::to_text).collect()))
}

fn contains(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("contains", args, 2, 2)?;
    let haystack = eval.eval(&args[0])?;
    let needle = eval.eval(&args[1])?;
    let found = match &haystack {
        FormulaValue::Array(items) => items.iter().any(|item| values_equal(item, &needle)),
        other => other
            .to_text()
            .to_lowercase()
            .contains(&needle.to_text().to_lowercase()),
    };
    Ok(FormulaValue::Bool(found))
}

fn upper(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("upper", args, 1, 1)?;
    Ok(FormulaValue::Text(text_arg(eval, &args[0])?.to_uppercase()))
}

fn lower(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("lower", args, 1, 1)?;
    Ok(FormulaValue::Text(text_arg(eval, &args[0])?.to_lowercase()))
}

fn trim(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("trim", args, 1, 1)?;
    Ok(FormulaValue::Text(text_arg(eval, &args[0])?.trim().to_string()))
}

fn length(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("length", args, 1, 1)?;
    let len = match eval.eval(&args[0])? {
        FormulaValue::Array(items) => items.len(),
        FormulaValue::Object(map) => map.len(),
        other => other.to_text().chars().count(),
    };
    Ok(FormulaValue::Number(len as f64))
}

fn to_number(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("toNumber", args, 1, 1)?;
    let value = eval.eval(&args[0])?;
    match &value {
        FormulaValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map(FormulaValue::Number)
            .map_err(|_| FormulaError::mismatch("numeric text", text)),
        other => other.to_number().map(FormulaValue::Number),
    }
}

fn to_string(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("toString", args, 1, 1)?;
    Ok(FormulaValue::Text(text_arg(eval, &args[0])?))
}

fn join(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("join", args, 1, 2)?;
    let items = array_arg(eval, "join", &args[0])?;
    let separator = match args.get(1) {
        Some(arg) => text_arg(eval, arg)?,
        None => ",".to_string(),
    };
    let parts: Vec<String> = items.iter().map(FormulaValue::to_text).collect();
    Ok(FormulaValue::Text(parts.join(&separator)))
}

fn equals(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("equals", args, 2, 2)?;
    let left = eval.eval(&args[0])?;
    let right = eval.eval(&args[1])?;
    Ok(FormulaValue::Bool(values_equal(&left, &right)))
}

// math

fn sum(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    let values = eval_all(eval, args)?;
    Ok(FormulaValue::Number(numbers(values).into_iter().sum()))
}

fn pow(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("pow", args, 2, 2)?;
    let base = number_arg(eval, &args[0])?;
    let exponent = number_arg(eval, &args[1])?;
    Ok(FormulaValue::Number(base.powf(exponent)))
}

fn round(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("round", args, 1, 2)?;
    let value = number_arg(eval, &args[0])?;
    let digits = match args.get(1) {
        Some(arg) => number_arg(eval, arg)?.trunc() as i32,
        None => 0,
    };
    let factor = 10f64.powi(digits);
    Ok(FormulaValue::Number((value * factor).round() / factor))
}

fn ceil(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("ceil", args, 1, 1)?;
    Ok(FormulaValue::Number(number_arg(eval, &args[0])?.ceil()))
}

fn floor(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("floor", args, 1, 1)?;
    Ok(FormulaValue::Number(number_arg(eval, &args[0])?.floor()))
}

fn modulo(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("mod", args, 2, 2)?;
    let dividend = number_arg(eval, &args[0])?;
    let divisor = number_arg(eval, &args[1])?;
    if divisor == 0.0 {
        return Err(FormulaError::DivisionByZero);
    }
    Ok(FormulaValue::Number(dividend % divisor))
}

fn extreme(
    eval: &mut Evaluator<'_>,
    name: &str,
    args: &[Expr],
    pick: fn(f64, f64) -> f64,
) -> Result<FormulaValue, FormulaError> {
    let values = numbers(eval_all(eval, args)?);
    values
        .into_iter()
        .reduce(pick)
        .map(FormulaValue::Number)
        .ok_or_else(|| FormulaError::arguments(name, "no numeric values"))
}

fn max(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    extreme(eval, "max", args, f64::max)
}

fn min(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    extreme(eval, "min", args, f64::min)
}

fn count(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    let values = flatten(eval_all(eval, args)?);
    let count = values.iter().filter(|value| !value.is_null()).count();
    Ok(FormulaValue::Number(count as f64))
}

fn average(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    let values = numbers(eval_all(eval, args)?);
    if values.is_empty() {
        return Err(FormulaError::arguments("average", "no numeric values"));
    }
    let total: f64 = values.iter().sum();
    Ok(FormulaValue::Number(total / values.len() as f64))
}

fn sqrt(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("sqrt", args, 1, 1)?;
    let value = number_arg(eval, &args[0])?;
    if value < 0.0 {
        return Err(FormulaError::arguments("sqrt", "negative input"));
    }
    Ok(FormulaValue::Number(value.sqrt()))
}

// dates, as epoch milliseconds

fn to_datetime(value: &FormulaValue) -> Result<DateTime<Utc>, FormulaError> {
    match value {
        FormulaValue::Number(millis) => Utc
            .timestamp_millis_opt(*millis as i64)
            .single()
            .ok_or_else(|| FormulaError::mismatch("date", "out of range number")),
        FormulaValue::Text(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text.trim()) {
                return Ok(parsed.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .ok()
                .and_then(|day| day.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
                .ok_or_else(|| FormulaError::mismatch("date", text))
        }
        other => Err(FormulaError::mismatch("date", other.type_name())),
    }
}

fn date_arg(eval: &mut Evaluator<'_>, arg: &Expr) -> Result<DateTime<Utc>, FormulaError> {
    to_datetime(&eval.eval(arg)?)
}

fn millis(moment: DateTime<Utc>) -> FormulaValue {
    FormulaValue::Number(moment.timestamp_millis() as f64)
}

fn now(_eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("now", args, 0, 0)?;
    Ok(millis(Utc::now()))
}

fn year(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("year", args, 1, 1)?;
    Ok(FormulaValue::Number(date_arg(eval, &args[0])?.year() as f64))
}

fn month(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("month", args, 1, 1)?;
    Ok(FormulaValue::Number(date_arg(eval, &args[0])?.month() as f64))
}

fn day(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("day", args, 1, 1)?;
    Ok(FormulaValue::Number(date_arg(eval, &args[0])?.day() as f64))
}

fn date(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("date", args, 3, 3)?;
    let year = number_arg(eval, &args[0])? as i32;
    let month = number_arg(eval, &args[1])? as u32;
    let day = number_arg(eval, &args[2])? as u32;
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .map(millis)
        .ok_or_else(|| FormulaError::arguments("date", format!("invalid date {}-{}-{}", year, month, day)))
}

fn shift(moment: DateTime<Utc>, amount: f64, unit: &str) -> Result<DateTime<Utc>, FormulaError> {
    let unit = unit.trim().to_ascii_lowercase();
    let calendar_months = match unit.as_str() {
        "year" | "years" | "y" => Some(amount.trunc() as i64 * 12),
        "month" | "months" => Some(amount.trunc() as i64),
        _ => None,
    };
    if let Some(months) = calendar_months {
        let shifted = if months >= 0 {
            moment.checked_add_months(Months::new(months as u32))
        } else {
            moment.checked_sub_months(Months::new(months.unsigned_abs() as u32))
        };
        return shifted.ok_or_else(|| FormulaError::arguments("dateAdd", "date out of range"));
    }
    let unit_millis = match unit.as_str() {
        "week" | "weeks" | "w" => 7.0 * 86_400_000.0,
        "day" | "days" | "d" => 86_400_000.0,
        "hour" | "hours" | "h" => 3_600_000.0,
        "minute" | "minutes" | "m" => 60_000.0,
        "second" | "seconds" | "s" => 1_000.0,
        other => {
            return Err(FormulaError::arguments(
                "dateAdd",
                format!("unknown unit '{}'", other),
            ));
        }
    };
    let target = moment.timestamp_millis() as f64 + amount * unit_millis;
    Utc.timestamp_millis_opt(target as i64)
        .single()
        .ok_or_else(|| FormulaError::arguments("dateAdd", "date out of range"))
}

fn date_add(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("dateAdd", args, 3, 3)?;
    let moment = date_arg(eval, &args[0])?;
    let amount = number_arg(eval, &args[1])?;
    let unit = text_arg(eval, &args[2])?;
    shift(moment, amount, &unit).map(millis)
}

fn date_subtract(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("dateSubtract", args, 3, 3)?;
    let moment = date_arg(eval, &args[0])?;
    let amount = number_arg(eval, &args[1])?;
    let unit = text_arg(eval, &args[2])?;
    shift(moment, -amount, &unit).map(millis)
}

fn timestamp(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("timestamp", args, 1, 1)?;
    date_arg(eval, &args[0]).map(millis)
}

// arrays

fn flat(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("flat", args, 1, 2)?;
    let mut items = array_arg(eval, "flat", &args[0])?;
    let depth = match args.get(1) {
        Some(arg) => number_arg(eval, arg)?.max(0.0) as usize,
        None => 1,
    };
    for _ in 0..depth {
        if !items.iter().any(|item| matches!(item, FormulaValue::Array(_))) {
            break;
        }
        items = items
            .into_iter()
            .flat_map(|item| match item {
                FormulaValue::Array(inner) => inner,
                other => vec![other],
            })
            .collect();
    }
    Ok(FormulaValue::Array(items))
}

fn map_items(eval: &mut Evaluator<'_>, name: &str, args: &[Expr]) -> Result<Vec<FormulaValue>, FormulaError> {
    arity(name, args, 2, 2)?;
    let items = array_arg(eval, name, &args[0])?;
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| eval.apply(&args[1], vec![item, FormulaValue::Number(index as f64)]))
        .collect()
}

fn map(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    map_items(eval, "map", args).map(FormulaValue::Array)
}

fn flat_map(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    let mapped = map_items(eval, "flatMap", args)?;
    let items = mapped
        .into_iter()
        .flat_map(|item| match item {
            FormulaValue::Array(inner) => inner,
            other => vec![other],
        })
        .collect();
    Ok(FormulaValue::Array(items))
}

/// Items paired with whether the predicate lambda accepts them.
fn judged(
    eval: &mut Evaluator<'_>,
    name: &str,
    args: &[Expr],
) -> Result<Vec<(FormulaValue, bool)>, FormulaError> {
    arity(name, args, 2, 2)?;
    let items = array_arg(eval, name, &args[0])?;
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let verdict = eval
            .apply(&args[1], vec![item.clone(), FormulaValue::Number(index as f64)])?
            .truthy();
        out.push((item, verdict));
    }
    Ok(out)
}

fn filter(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    let items = judged(eval, "filter", args)?
        .into_iter()
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect();
    Ok(FormulaValue::Array(items))
}

fn find(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("find", args, 2, 2)?;
    let items = array_arg(eval, "find", &args[0])?;
    for (index, item) in items.into_iter().enumerate() {
        if eval
            .apply(&args[1], vec![item.clone(), FormulaValue::Number(index as f64)])?
            .truthy()
        {
            return Ok(item);
        }
    }
    Ok(FormulaValue::Null)
}

fn every(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    let verdicts = judged(eval, "every", args)?;
    Ok(FormulaValue::Bool(verdicts.iter().all(|(_, verdict)| *verdict)))
}

fn some(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    let verdicts = judged(eval, "some", args)?;
    Ok(FormulaValue::Bool(verdicts.iter().any(|(_, verdict)| *verdict)))
}

fn reduce(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("reduce", args, 3, 3)?;
    let items = array_arg(eval, "reduce", &args[0])?;
    let mut accumulator = eval.eval(&args[2])?;
    for (index, item) in items.into_iter().enumerate() {
        accumulator = eval.apply(
            &args[1],
            vec![accumulator, item, FormulaValue::Number(index as f64)],
        )?;
    }
    Ok(accumulator)
}

/// Text criteria match case-insensitively by substring, a lambda criterion
/// is a predicate, anything else matches by equality.
fn count_if(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    if matches!(args.get(1), Some(Expr::Lambda { .. })) {
        let verdicts = judged(eval, "countIf", args)?;
        let count = verdicts.iter().filter(|(_, verdict)| *verdict).count();
        return Ok(FormulaValue::Number(count as f64));
    }
    arity("countIf", args, 2, 2)?;
    let items = array_arg(eval, "countIf", &args[0])?;
    let criterion = eval.eval(&args[1])?;
    let count = items
        .iter()
        .filter(|item| match (item, &criterion) {
            (FormulaValue::Text(text), FormulaValue::Text(wanted)) => {
                text.to_lowercase().contains(&wanted.to_lowercase())
            }
            (item, wanted) => values_equal(item, wanted),
        })
        .count();
    Ok(FormulaValue::Number(count as f64))
}

fn unique(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("unique", args, 1, 1)?;
    let items = array_arg(eval, "unique", &args[0])?;
    let mut kept: Vec<FormulaValue> = Vec::with_capacity(items.len());
    for item in items {
        if !kept.iter().any(|existing| values_equal(existing, &item)) {
            kept.push(item);
        }
    }
    Ok(FormulaValue::Array(kept))
}

fn sort(eval: &mut Evaluator<'_>, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    arity("sort", args, 1, 2)?;
    let mut items = array_arg(eval, "sort", &args[0])?;
    let ascending = match args.get(1) {
        Some(arg) => match eval.eval(arg)? {
            FormulaValue::Bool(flag) => flag,
            other => {
                return Err(FormulaError::arguments(
                    "sort",
                    format!("ascending flag must be a boolean, got {}", other.type_name()),
                ));
            }
        },
        None => true,
    };
    items.sort_by(compare);
    if !ascending {
        items.reverse();
    }
    Ok(FormulaValue::Array(items))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::formula::eval::evaluate;

    fn object(entries: &[(&str, FormulaValue)]) -> FormulaValue {
        FormulaValue::Object(
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        )
    }

    fn run(source: &str) -> Result<FormulaValue, FormulaError> {
        let mut names = BTreeMap::new();
        names.insert(
            "nums".to_string(),
            FormulaValue::Array(vec![
                FormulaValue::Number(3.0),
                FormulaValue::Number(1.0),
                FormulaValue::Number(2.0),
            ]),
        );
        names.insert(
            "items".to_string(),
            FormulaValue::Array(vec![
                object(&[("name", FormulaValue::text("apple")), ("qty", FormulaValue::Number(2.0))]),
                object(&[("name", FormulaValue::text("pear")), ("qty", FormulaValue::Number(5.0))]),
            ]),
        );
        evaluate(source, &mut names)
    }

    fn number(value: f64) -> Result<FormulaValue, FormulaError> {
        Ok(FormulaValue::Number(value))
    }

    #[test]
    fn logical_functions() {
        assert_eq!(run("if(1 > 2, 'a', 'b')"), Ok(FormulaValue::text("b")));
        assert_eq!(run("IF(true, 1)"), number(1.0));
        assert_eq!(run("and(true, 1, 'x')"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("or(false, 0)"), Ok(FormulaValue::Bool(false)));
        assert_eq!(run("empty('')"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("empty(nums)"), Ok(FormulaValue::Bool(false)));
        assert_eq!(run("if(not(empty(sum([missing, 5]))), 1, 0)"), number(1.0));
    }

    #[test]
    fn text_functions() {
        assert_eq!(run("concat('a', 1, nums)"), Ok(FormulaValue::text("a1312")));
        assert_eq!(run("contains('Hello', 'ELL')"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("contains(nums, 2)"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("upper('ab') + lower('CD')"), Ok(FormulaValue::text("ABcd")));
        assert_eq!(run("length('héllo')"), number(5.0));
        assert_eq!(run("toNumber(' 4.5 ')"), number(4.5));
        assert!(run("toNumber('x')").is_err());
        assert_eq!(run("join(nums, '-')"), Ok(FormulaValue::text("3-1-2")));
        assert_eq!(run("trim('  x ')"), Ok(FormulaValue::text("x")));
    }

    #[test]
    fn math_functions() {
        assert_eq!(run("sum(nums, '4', null, 'x')"), number(10.0));
        assert_eq!(run("pow(2, 10)"), number(1024.0));
        assert_eq!(run("round(2.346, 2)"), number(2.35));
        assert_eq!(run("ceil(1.2) + floor(1.8)"), number(3.0));
        assert_eq!(run("mod(10, 4)"), number(2.0));
        assert_eq!(run("mod(1, 0)"), Err(FormulaError::DivisionByZero));
        assert_eq!(run("max(nums) - min(nums)"), number(2.0));
        assert_eq!(run("count(nums)"), number(3.0));
        assert_eq!(run("avg(nums)"), number(2.0));
        assert_eq!(run("sqrt(16)"), number(4.0));
    }

    #[test]
    fn date_functions() {
        assert_eq!(run("year(date(2024, 2, 29))"), number(2024.0));
        assert_eq!(run("month(dateAdd(date(2024, 1, 31), 1, 'months'))"), number(2.0));
        assert_eq!(run("day(dateSubtract(date(2024, 3, 1), 1, 'days'))"), number(29.0));
        assert_eq!(run("timestamp('1970-01-02')"), number(86_400_000.0));
        assert!(run("date(2024, 13, 1)").is_err());
    }

    #[test]
    fn array_functions() {
        assert_eq!(run("sum(map(nums, (n) -> n * 2))"), number(12.0));
        assert_eq!(run("map(nums, (n, i) -> i)"), run("[0, 1, 2]"));
        assert_eq!(run("filter(nums, (n) -> n > 1)"), run("[3, 2]"));
        assert_eq!(run("reduce(nums, (acc, n) -> acc + n, 10)"), number(16.0));
        assert_eq!(run("find(items, (item) -> item.qty > 3).name"), Ok(FormulaValue::text("pear")));
        assert_eq!(run("every(nums, (n) -> n > 0)"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("some(nums, (n) -> n > 2)"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("countIf(['Apple', 'grape', 'kiwi'], 'ap')"), number(2.0));
        assert_eq!(run("countIf(nums, (n) -> n >= 2)"), number(2.0));
        assert_eq!(run("unique([1, '1', 2, 2])"), run("[1, 2]"));
        assert_eq!(run("sort(nums)"), run("[1, 2, 3]"));
        assert_eq!(run("sort(nums, false)"), run("[3, 2, 1]"));
        assert_eq!(run("flat([[1, [2]], 3])"), run("[1, [2], 3]"));
        assert_eq!(run("flatMap(nums, (n) -> [n, n])"), run("[3, 3, 1, 1, 2, 2]"));
        assert_eq!(run("sum(items.qty)"), number(7.0));
    }

    #[test]
    fn unknown_function() {
        assert_eq!(run("frobnicate(1)"), Err(FormulaError::UnknownFunction("frobnicate".into())));
        assert_eq!(run("SUM(1, 2)"), number(3.0));
    }
}
