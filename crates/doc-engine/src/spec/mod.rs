pub mod document;
pub mod field;
pub mod formula;
pub mod logic;

pub use document::{Document, FieldLocation, FieldPosition, File, ModelView, Page};
pub use field::{
    AppliedFormula, CollectionSchema, ColumnType, Field, FieldOption, FieldType, FormulaKey,
    TableColumn,
};
pub use formula::Formula;
pub use logic::{Condition, Logic, LogicAction, LogicEval};
