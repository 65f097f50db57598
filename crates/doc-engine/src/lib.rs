#![allow(missing_docs)]

pub mod change;
pub mod error;
pub mod formula;
pub mod ids;
pub mod options;
pub mod render;
pub mod rows;
pub mod session;
pub mod spec;
pub mod validate;
pub mod value;
pub mod visibility;

pub use change::{Change, ChangeOp, ChangeTarget};
pub use error::{ConditionError, EngineError, FormulaError, SchemaError};
pub use formula::{FormulaEngine, FormulaState, FormulaValue, Target, evaluate, parse};
pub use ids::IdGenerator;
pub use options::EngineOptions;
pub use render::{
    RenderField, RenderPage, RenderPayload, RenderStatus, build_render_payload, render_json_ui,
    render_text,
};
pub use rows::RowPath;
pub use session::{ChangeOutcome, DocumentSession, FieldState, UploadResolver};
pub use spec::{
    AppliedFormula, CollectionSchema, ColumnType, Condition, Document, Field, FieldOption,
    FieldPosition, FieldType, File, Formula, FormulaKey, Logic, LogicAction, LogicEval, ModelView,
    Page, TableColumn,
};
pub use validate::{ValidationError, ValidationResult, validate, validate_schema};
pub use value::{Element, NestedRows, Point, Value, ValueKind};
pub use visibility::{
    ConditionOperator, ValueLookup, Visibility, VisibilityMap, evaluate_condition, logic_satisfied,
    resolve_visibility,
};
