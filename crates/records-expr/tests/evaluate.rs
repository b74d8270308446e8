mod common;

use common::{check, context, eval};
use pretty_assertions::assert_eq;
use records_expr::{evaluate_column, evaluate_with_options, EvaluateOptions, NoProgress};
use records_model::{Number, TaggedValue, Value};

fn number(text: &str) -> Value {
    Value::Number(text.parse::<Number>().unwrap())
}

fn numbers(items: &[i64]) -> Value {
    Value::list(items.iter().copied().map(Value::from).collect())
}

#[test]
fn rows_give_column_values() {
    assert_eq!(eval("@column Price * @column Quantity", Some(0)).unwrap(), 6.into());
    assert_eq!(eval("@column Price * @column Quantity", Some(3)).unwrap(), 39.into());
    assert_eq!(eval("@column Item ; \"!\"", Some(2)).unwrap(), "desk!".into());
    assert_eq!(eval("sum(@entire Price)", None).unwrap(), number("144.75"));
    assert_eq!(eval("days_between(@column Date, date{2024-03-01})", Some(1)).unwrap(), 1.into());
}

#[test]
fn division_is_exact_where_it_can_be() {
    assert_eq!(eval("10 / 4", None).unwrap(), number("2.5"));
    assert_eq!(eval("10 / 5", None).unwrap(), 2.into());
    let err = eval("1 / (2 - 2)", None).unwrap_err();
    assert!(!err.is_internal());
}

#[test]
fn unreadable_cells_fail_only_their_row() {
    let paid = "@match @column Paid @case Is(_b) @then b @case None @then false @endmatch";
    assert_eq!(eval(paid, Some(0)).unwrap(), true.into());
    let err = eval(paid, Some(1)).unwrap_err();
    assert!(!err.is_internal());
    assert!(err.message().contains("maybe"), "{}", err.message());
    assert_eq!(eval(paid, Some(2)).unwrap(), false.into());

    let ctx = context();
    let typed = check(paid, &ctx).unwrap();
    let values = evaluate_column(&typed, &ctx, 4, &mut NoProgress);
    let ok: Vec<bool> = values.rows.iter().map(Result::is_ok).collect();
    assert_eq!(ok, vec![true, false, true, true]);
}

#[test]
fn logic_short_circuits() {
    // The right-hand side would fail if evaluated.
    assert_eq!(eval("true | 1 / 0 = 1", None).unwrap(), true.into());
    assert_eq!(eval("false & 1 / 0 = 1", None).unwrap(), false.into());
    assert_eq!(
        eval("@if 1 > 2 @then 1 / 0 @else 7 @endif", None).unwrap(),
        7.into()
    );
    assert_eq!(eval("1 < 0 < 1 / 0", None).unwrap(), false.into());
    assert!(eval("true & 1 / 0 = 1", None).is_err());
}

#[test]
fn tags_construct_and_match() {
    assert_eq!(
        eval("Is(3)", None).unwrap(),
        Value::Tagged(TaggedValue::with_inner(1, 3.into()))
    );
    assert_eq!(eval("Light\\Red = Light\\Red", None).unwrap(), true.into());
    assert_eq!(eval("Green = Colour\\Red", None).unwrap(), false.into());
    assert_eq!(eval("apply_each([1, 2], Is)", None).unwrap().list_items().unwrap().len(), 2);
    assert_eq!(eval("get_optional(Is(\"a\"), \"b\")", None).unwrap(), "a".into());
    assert_eq!(eval("get_optional(None, \"b\")", None).unwrap(), "b".into());

    let err = eval("@match 3 @case 1 @then 1 @case 2 @then 2 @endmatch", None).unwrap_err();
    assert!(!err.is_internal());
}

#[test]
fn lambdas_and_definitions() {
    let src = "@define double = @function(x) x * 2 @endfunction @then double(21) @enddefine";
    assert_eq!(eval(src, None).unwrap(), 42.into());
    assert_eq!(
        eval("@define a = 1, b = a + 1 @then (a, b) @enddefine", None).unwrap(),
        Value::Tuple(vec![1.into(), 2.into()])
    );
    assert_eq!(eval("select([1, 5, 2, 8], ? > 2)", None).unwrap(), numbers(&[5, 8]));
    assert_eq!(
        eval(
            "apply_each([(a: 1, b: 0), (a: 3, b: 0)], @function(r) r#a + 1 @endfunction)",
            None
        )
        .unwrap(),
        numbers(&[2, 4])
    );
}

#[test]
fn explanations_name_the_cells_used() {
    let ctx = context();
    let typed = check("sum(@entire Quantity) * abs(@column Price)", &ctx).unwrap();
    let options = EvaluateOptions {
        record_explanation: true,
    };
    let evaluated = evaluate_with_options(&typed, &ctx, Some(2), &options).unwrap();
    assert_eq!(evaluated.value, 2040.into());
    let texts: Vec<_> = evaluated
        .explanations
        .iter()
        .map(|e| e.expression.as_str())
        .collect();
    assert_eq!(texts, vec!["sum(@entire Quantity)", "abs(@column Price)"]);
    let sum = &evaluated.explanations[0];
    let rows: Vec<_> = sum.locations.iter().map(|location| location.row).collect();
    assert_eq!(rows, vec![Some(0), Some(1), Some(2), Some(3)]);
    assert!(sum.locations.iter().all(|location| location.column.raw() == "Quantity"));
    let abs = &evaluated.explanations[1];
    assert_eq!(abs.locations.len(), 1);
    assert_eq!(abs.locations[0].row, Some(2));
    assert_eq!(abs.locations[0].column.raw(), "Price");
}

fn explained_rows(src: &str) -> Vec<Option<usize>> {
    let ctx = context();
    let typed = check(src, &ctx).unwrap();
    let options = EvaluateOptions {
        record_explanation: true,
    };
    let evaluated = evaluate_with_options(&typed, &ctx, None, &options).unwrap();
    assert_eq!(evaluated.explanations.len(), 1, "{src}");
    evaluated.explanations[0]
        .locations
        .iter()
        .map(|location| location.row)
        .collect()
}

#[test]
fn functions_record_the_cells_they_read() {
    assert_eq!(explained_rows("maximum(@entire Date)").len(), 4);
    assert_eq!(explained_rows("select(@entire Quantity, ? > 3)").len(), 4);
    // Short-circuiting stops reading at the deciding element.
    assert_eq!(explained_rows("any(@entire Quantity, ? > 3)"), vec![Some(0)]);
    assert_eq!(explained_rows("contains(@entire Item, \"lamp\")"), vec![Some(0), Some(1)]);
    assert_eq!(explained_rows("element(@entire Item, 3)"), vec![Some(2)]);
}
