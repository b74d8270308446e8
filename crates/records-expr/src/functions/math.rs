use std::cmp::Ordering;

use records_model::{compare_values, Number, RecordsError, RecordsResult, Value};

use super::{list_of, number_in, take_args, var, FunctionCall, FunctionDefinition};
use crate::types::TypeClass;

pub(super) fn definitions() -> Vec<FunctionDefinition> {
    vec![
        FunctionDefinition::new("math", "abs", vec![number_in("u")], number_in("u"), abs),
        FunctionDefinition::new("math", "round", vec![number_in("u")], number_in("u"), round),
        FunctionDefinition::new(
            "math",
            "sum",
            vec![list_of(number_in("u"))],
            number_in("u"),
            sum,
        ),
        FunctionDefinition::new(
            "math",
            "average",
            vec![list_of(number_in("u"))],
            number_in("u"),
            average,
        ),
        FunctionDefinition::new("math", "maximum", vec![list_of(var("t"))], var("t"), maximum)
            .constrain("t", TypeClass::Comparable),
        FunctionDefinition::new("math", "minimum", vec![list_of(var("t"))], var("t"), minimum)
            .constrain("t", TypeClass::Comparable),
    ]
}

fn abs(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [x] = take_args(args)?;
    Ok(Value::Number(x.as_number()?.abs()))
}

/// Rounds half away from zero to a whole number.
fn round(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [x] = take_args(args)?;
    Ok(Value::Number(x.as_number()?.round_dp(0)))
}

fn total(items: &[Value]) -> RecordsResult<Number> {
    items
        .iter()
        .try_fold(Number::ZERO, |acc, item| acc.checked_add(item.as_number()?))
}

fn sum(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [list] = take_args(args)?;
    Ok(Value::Number(total(&call.read_items(&list)?)?))
}

fn average(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [list] = take_args(args)?;
    let items = call.read_items(&list)?;
    if items.is_empty() {
        return Err(RecordsError::user("cannot take the average of an empty list"));
    }
    let count = i64::try_from(items.len()).map_err(|_| RecordsError::user("list is too long"))?;
    Ok(Value::Number(total(&items)?.checked_div(Number::from(count))?))
}

fn extreme(
    call: &mut FunctionCall<'_>,
    args: Vec<Value>,
    keep: Ordering,
    what: &str,
) -> RecordsResult<Value> {
    let [list] = take_args(args)?;
    let mut best: Option<Value> = None;
    for item in call.read_items(&list)? {
        best = Some(match best {
            Some(current) if compare_values(&item, &current)? != keep => current,
            _ => item,
        });
    }
    best.ok_or_else(|| RecordsError::user(format!("cannot take the {what} of an empty list")))
}

fn maximum(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    extreme(call, args, Ordering::Greater, "maximum")
}

fn minimum(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    extreme(call, args, Ordering::Less, "minimum")
}
