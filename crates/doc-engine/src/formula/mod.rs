//! Formula language: lexer, parser, evaluator, built-in functions and the
//! document-level resolution engine.

pub mod ast;
pub mod engine;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use engine::{FormulaEngine, FormulaState, MAX_DEPTH, ResolvedValues, Target};
pub use eval::{Evaluator, ReferenceResolver, evaluate};
pub use parser::parse;
pub use value::{FormulaValue, compare, values_equal};
