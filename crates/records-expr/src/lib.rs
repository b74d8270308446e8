//! `records-expr` parses, checks and evaluates Records expressions.
//!
//! An expression goes through [`parse_expression`], then [`check_expression`] against a
//! [`CheckContext`], then [`evaluate`] once per row. [`save_expression`] turns a tree back into
//! the text it was parsed from.

mod ast;
mod check;
mod column;
mod document;
mod evaluate;
mod parser;
mod resolve;
mod save;
mod scope;
mod type_expr;

pub mod functions;
pub mod types;

pub use crate::ast::{
    AddSubtractOp, ComparisonOp, Definition, ExprKind, Expression, MatchClause, NodeId, Pattern,
};
pub use crate::check::{
    check_expression, CheckContext, CheckInfo, CollectingRecorder, ErrorRecorder, QuickFix,
    TypeProblem, TypedExpression,
};
pub use crate::column::{
    ColumnData, ColumnList, ColumnLookup, ColumnRef, ColumnReference, InMemoryTables, Table,
};
pub use crate::evaluate::{
    evaluate, evaluate_column, evaluate_with_options, CellError, ColumnValues, EvaluateOptions,
    Evaluated, EvaluationContext, Explanation, NoProgress, ProgressListener,
};
pub use crate::parser::{
    parse_expression, parse_type_expression, parse_unit_expression, ParseError, ParseResult,
};
pub use crate::resolve::{resolve_global, Resolution, ResolveError};
pub use crate::save::{
    save_data_type, save_expression, save_expression_with_renames, save_type_expression,
    save_unit_expression, ColumnRenames, NoRenames,
};
pub use crate::scope::Scope;
pub use crate::type_expr::{TypeExpression, TypeExpressionArg, UnitExpression};

pub use crate::document::{
    load_declarations, save_declarations, save_type_line, save_unit_line, Block, Document,
    DocumentError, Item, TYPES_BLOCK, UNITS_BLOCK,
};
pub use crate::functions::{FunctionDefinition, FunctionLookup};
