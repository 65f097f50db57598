use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::FormulaError;
use crate::formula::ast::{BinaryOp, Expr, UnaryOp};
use crate::formula::engine::MAX_DEPTH;
use crate::formula::functions;
use crate::formula::value::{FormulaValue, compare};

/// Supplies values for names that are not lambda parameters.
pub trait ReferenceResolver {
    /// Resolves `path[0]` and walks the remaining property segments.
    /// Unknown names resolve to `Null`.
    fn resolve(&mut self, path: &[String]) -> Result<FormulaValue, FormulaError>;
}

/// Resolver over a fixed set of named values, useful for evaluating
/// standalone expressions.
impl ReferenceResolver for BTreeMap<String, FormulaValue> {
    fn resolve(&mut self, path: &[String]) -> Result<FormulaValue, FormulaError> {
        let Some((head, rest)) = path.split_first() else {
            return Ok(FormulaValue::Null);
        };
        Ok(self
            .get(head)
            .map(|value| value.path(rest))
            .unwrap_or_default())
    }
}

pub struct Evaluator<'r> {
    resolver: &'r mut dyn ReferenceResolver,
    scopes: Vec<BTreeMap<String, FormulaValue>>,
    depth: usize,
}

impl<'r> Evaluator<'r> {
    pub fn new(resolver: &'r mut dyn ReferenceResolver) -> Self {
        Self {
            resolver,
            scopes: Vec::new(),
            depth: 0,
        }
    }

    fn local(&self, name: &str) -> Option<&FormulaValue> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<FormulaValue, FormulaError> {
        if self.depth >= MAX_DEPTH {
            return Err(FormulaError::ResolutionTooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = self.eval_node(expr);
        self.depth -= 1;
        result
    }

    fn eval_node(&mut self, expr: &Expr) -> Result<FormulaValue, FormulaError> {
        match expr {
            Expr::Number(number) => Ok(FormulaValue::Number(*number)),
            Expr::Text(text) => Ok(FormulaValue::Text(text.clone())),
            Expr::Bool(flag) => Ok(FormulaValue::Bool(*flag)),
            Expr::Null => Ok(FormulaValue::Null),
            Expr::Reference(path) => {
                let Some((head, rest)) = path.split_first() else {
                    return Ok(FormulaValue::Null);
                };
                match self.local(head) {
                    Some(value) => Ok(value.path(rest)),
                    None => self.resolver.resolve(path),
                }
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(FormulaValue::Array),
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(FormulaValue::Object(map))
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Neg => Ok(FormulaValue::Number(-value.to_number()?)),
                    UnaryOp::Not => Ok(FormulaValue::Bool(!value.truthy())),
                }
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Call { name, args } => functions::call(self, name, args),
            Expr::Lambda { .. } => Err(FormulaError::arguments(
                "lambda",
                "a lambda can only be passed to a function",
            )),
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                Ok(target.index(&index))
            }
            Expr::Member { target, name } => Ok(self.eval(target)?.member(name)),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<FormulaValue, FormulaError> {
        match op {
            BinaryOp::And => {
                let result = self.eval(left)?.truthy() && self.eval(right)?.truthy();
                return Ok(FormulaValue::Bool(result));
            }
            BinaryOp::Or => {
                let result = self.eval(left)?.truthy() || self.eval(right)?.truthy();
                return Ok(FormulaValue::Bool(result));
            }
            _ => {}
        }
        let left = self.eval(left)?;
        let right = self.eval(right)?;
        let ordering = || compare(&left, &right);
        Ok(match op {
            BinaryOp::Add => match (&left, &right) {
                (FormulaValue::Text(_), _) | (_, FormulaValue::Text(_)) => {
                    FormulaValue::Text(format!("{}{}", left.to_text(), right.to_text()))
                }
                _ => FormulaValue::Number(left.to_number()? + right.to_number()?),
            },
            BinaryOp::Sub => FormulaValue::Number(left.to_number()? - right.to_number()?),
            BinaryOp::Mul => FormulaValue::Number(left.to_number()? * right.to_number()?),
            BinaryOp::Div => {
                let divisor = right.to_number()?;
                if divisor == 0.0 {
                    return Err(FormulaError::DivisionByZero);
                }
                FormulaValue::Number(left.to_number()? / divisor)
            }
            BinaryOp::Mod => {
                let divisor = right.to_number()?;
                if divisor == 0.0 {
                    return Err(FormulaError::DivisionByZero);
                }
                FormulaValue::Number(left.to_number()? % divisor)
            }
            BinaryOp::Eq => FormulaValue::Bool(ordering() == Ordering::Equal),
            BinaryOp::Ne => FormulaValue::Bool(ordering() != Ordering::Equal),
            BinaryOp::Lt => FormulaValue::Bool(ordering().is_lt()),
            BinaryOp::Le => FormulaValue::Bool(ordering().is_le()),
            BinaryOp::Gt => FormulaValue::Bool(ordering().is_gt()),
            BinaryOp::Ge => FormulaValue::Bool(ordering().is_ge()),
            BinaryOp::And => FormulaValue::Bool(left.truthy() && right.truthy()),
            BinaryOp::Or => FormulaValue::Bool(left.truthy() || right.truthy()),
        })
    }

    /// Calls a lambda literal with positional arguments. Missing arguments
    /// bind to `Null`, extra ones are ignored.
    pub fn apply(&mut self, lambda: &Expr, args: Vec<FormulaValue>) -> Result<FormulaValue, FormulaError> {
        let Expr::Lambda { params, body } = lambda else {
            return Err(FormulaError::mismatch("lambda", "expression"));
        };
        let mut scope = BTreeMap::new();
        let mut args = args.into_iter();
        for param in params {
            scope.insert(param.clone(), args.next().unwrap_or_default());
        }
        self.scopes.push(scope);
        let result = self.eval(body);
        self.scopes.pop();
        result
    }
}

/// Parses and evaluates an expression against a resolver.
pub fn evaluate(source: &str, resolver: &mut dyn ReferenceResolver) -> Result<FormulaValue, FormulaError> {
    let expr = crate::formula::parser::parse(source)?;
    Evaluator::new(resolver).eval(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<FormulaValue, FormulaError> {
        let mut names = BTreeMap::new();
        names.insert("price".to_string(), FormulaValue::Number(4.0));
        names.insert("label".to_string(), FormulaValue::text("Total: "));
        evaluate(source, &mut names)
    }

    #[test]
    fn arithmetic_and_concatenation() {
        assert_eq!(run("price * 2 + 1"), Ok(FormulaValue::Number(9.0)));
        assert_eq!(run("label + price"), Ok(FormulaValue::text("Total: 4")));
        assert_eq!(run("'3' - 1"), Ok(FormulaValue::Number(2.0)));
        assert_eq!(run("true + 1"), Ok(FormulaValue::Number(2.0)));
        assert_eq!(run("-price"), Ok(FormulaValue::Number(-4.0)));
        assert_eq!(run("7 % 4"), Ok(FormulaValue::Number(3.0)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(run("1 / 0"), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(run("price >= 4 && price < 5"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("'10' > 9"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("missing == 0"), Ok(FormulaValue::Bool(true)));
        assert_eq!(run("!price || false"), Ok(FormulaValue::Bool(false)));
    }

    #[test]
    fn missing_names_are_null() {
        assert_eq!(run("missing"), Ok(FormulaValue::Null));
        assert_eq!(run("missing + 1"), Ok(FormulaValue::Number(1.0)));
    }

    #[test]
    fn type_mismatch_surfaces() {
        assert!(matches!(
            run("'abc' * 2"),
            Err(FormulaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn evaluation_depth_is_bounded() {
        let mut expr = Expr::Number(1.0);
        for _ in 0..MAX_DEPTH + 10 {
            expr = Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            };
        }
        let mut names: BTreeMap<String, FormulaValue> = BTreeMap::new();
        assert_eq!(
            Evaluator::new(&mut names).eval(&expr),
            Err(FormulaError::ResolutionTooDeep(MAX_DEPTH))
        );
    }
}

