#![allow(dead_code)]

use std::sync::Arc;

use records_expr::{
    check_expression, evaluate, parse_expression, CheckContext, CollectingRecorder,
    FunctionLookup, InMemoryTables, Table, TypeProblem, TypedExpression,
};
use records_model::{
    ColumnId, DataType, DateTimeKind, RecordsResult, TableId, TagType, TypeId, TypeManager, Unit,
    Value,
};

pub fn cid(name: &str) -> ColumnId {
    ColumnId::new(name).unwrap()
}

pub fn tid(name: &str) -> TableId {
    TableId::new(name).unwrap()
}

/// `Colour` and `Light` both have a `Red` tag.
pub fn types() -> TypeManager {
    let mut types = TypeManager::new();
    types
        .register_tagged_type(
            TypeId::new("Colour").unwrap(),
            Vec::new(),
            vec![TagType::new("Red", None), TagType::new("Green", None)],
        )
        .unwrap();
    types
        .register_tagged_type(
            TypeId::new("Light").unwrap(),
            Vec::new(),
            vec![TagType::new("Red", None), TagType::new("Amber", None)],
        )
        .unwrap();
    types
}

/// A `Sales` table with four rows, loaded from cell text. The second row's `Paid` cell is
/// unreadable.
pub fn tables(types: &TypeManager) -> InMemoryTables {
    let paid = types.optional_type(DataType::Boolean).unwrap();
    let mut sales = Table::new(
        tid("Sales"),
        vec![
            (cid("Item"), DataType::Text),
            (cid("Price"), DataType::Number(Unit::single("USD"))),
            (cid("Quantity"), DataType::number()),
            (cid("Date"), DataType::Date(DateTimeKind::YearMonthDay)),
            (cid("Paid"), paid),
        ],
    )
    .unwrap();
    for row in [
        ["\"pen\"", "1.5", "4", "2024-01-31", "Is(true)"],
        ["\"lamp\"", "20", "1", "2024-02-29", "maybe"],
        ["\"desk\"", "120", "0", "2024-03-01", "None"],
        ["\"ink\"", "3.25", "12", "2023-12-25", "Is(false)"],
    ] {
        sales.load_row(&row).unwrap();
    }
    let mut tables = InMemoryTables::new();
    tables.add_table(sales).unwrap();
    tables
}

pub fn context() -> CheckContext {
    let types = types();
    let tables = tables(&types);
    CheckContext::new(
        Arc::new(types),
        Arc::new(tables),
        Arc::new(FunctionLookup::standard()),
    )
}

pub fn check(src: &str, ctx: &CheckContext) -> Result<TypedExpression, Vec<TypeProblem>> {
    let expression = parse_expression(src).unwrap();
    let mut recorder = CollectingRecorder::default();
    match check_expression(&expression, ctx, &mut recorder) {
        Some(typed) => {
            assert_eq!(recorder.problems, Vec::new());
            Ok(typed)
        }
        None => {
            assert!(!recorder.problems.is_empty(), "no problem recorded for {src}");
            Err(recorder.problems)
        }
    }
}

/// The concrete type of `src`, in saved form.
pub fn type_of(src: &str) -> String {
    match check(src, &context()) {
        Ok(typed) => typed.data_type.to_string(),
        Err(problems) => panic!("{src} did not check: {problems:?}"),
    }
}

pub fn problems(src: &str) -> Vec<TypeProblem> {
    match check(src, &context()) {
        Ok(typed) => panic!("{src} checked as {}", typed.data_type),
        Err(problems) => problems,
    }
}

pub fn eval(src: &str, row: Option<usize>) -> RecordsResult<Value> {
    let ctx = context();
    let typed = check(src, &ctx).unwrap_or_else(|p| panic!("{src} did not check: {p:?}"));
    evaluate(&typed, &ctx, row)
}
