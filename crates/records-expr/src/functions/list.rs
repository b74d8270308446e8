use records_model::{values_equal, RecordsError, RecordsResult, TypeTerm, Value};

use super::{count_value, function_of, list_of, take_args, var, FunctionCall, FunctionDefinition};
use crate::types::TypeClass;

pub(super) fn definitions() -> Vec<FunctionDefinition> {
    let predicate = || function_of(vec![var("t")], TypeTerm::Boolean);
    vec![
        FunctionDefinition::new(
            "list",
            "count",
            vec![list_of(var("t"))],
            TypeTerm::number(),
            count,
        ),
        FunctionDefinition::new(
            "list",
            "element",
            vec![list_of(var("t")), TypeTerm::number()],
            var("t"),
            element,
        ),
        FunctionDefinition::new(
            "list",
            "apply_each",
            vec![list_of(var("a")), function_of(vec![var("a")], var("b"))],
            list_of(var("b")),
            apply_each,
        ),
        FunctionDefinition::new(
            "list",
            "select",
            vec![list_of(var("t")), predicate()],
            list_of(var("t")),
            select,
        ),
        FunctionDefinition::new(
            "list",
            "any",
            vec![list_of(var("t")), predicate()],
            TypeTerm::Boolean,
            any,
        ),
        FunctionDefinition::new(
            "list",
            "all",
            vec![list_of(var("t")), predicate()],
            TypeTerm::Boolean,
            all,
        ),
        FunctionDefinition::new(
            "list",
            "contains",
            vec![list_of(var("t")), var("t")],
            TypeTerm::Boolean,
            contains,
        )
        .constrain("t", TypeClass::Equatable),
    ]
}

fn count(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [list] = take_args(args)?;
    count_value(list.as_list()?.size()?)
}

/// Indexes from 1. The element's source cell, if any, counts towards the explanation.
fn element(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [list, index] = take_args(args)?;
    let list = list.as_list()?;
    let size = list.size()?;
    let index = index.as_number()?;
    let position = index
        .as_i64()
        .filter(|i| *i >= 1)
        .and_then(|i| usize::try_from(i - 1).ok())
        .filter(|i| *i < size)
        .ok_or_else(|| {
            RecordsError::user(format!(
                "element {index} is out of range for a list of {size} item(s)"
            ))
        })?;
    call.read_item(list, position)
}

fn apply_each(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [list, f] = take_args(args)?;
    let f = f.as_function()?;
    let mapped = call
        .read_items(&list)?
        .into_iter()
        .map(|item| f.call(vec![item], call.locations))
        .collect::<RecordsResult<Vec<_>>>()?;
    Ok(Value::list(mapped))
}

fn select(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [list, keep] = take_args(args)?;
    let keep = keep.as_function()?;
    let mut kept = Vec::new();
    for item in call.read_items(&list)? {
        if keep.call(vec![item.clone()], call.locations)?.as_boolean()? {
            kept.push(item);
        }
    }
    Ok(Value::list(kept))
}

/// Stops at the first item whose predicate result equals `stop_on`.
fn find_first(
    call: &mut FunctionCall<'_>,
    args: Vec<Value>,
    stop_on: bool,
) -> RecordsResult<bool> {
    let [list, predicate] = take_args(args)?;
    let predicate = predicate.as_function()?;
    let list = list.as_list()?;
    for index in 0..list.size()? {
        let item = call.read_item(list, index)?;
        if predicate.call(vec![item], call.locations)?.as_boolean()? == stop_on {
            return Ok(true);
        }
    }
    Ok(false)
}

fn any(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    Ok(Value::Boolean(find_first(call, args, true)?))
}

fn all(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    Ok(Value::Boolean(!find_first(call, args, false)?))
}

fn contains(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [list, needle] = take_args(args)?;
    let list = list.as_list()?;
    for index in 0..list.size()? {
        if values_equal(&call.read_item(list, index)?, &needle)? {
            return Ok(Value::Boolean(true));
        }
    }
    Ok(Value::Boolean(false))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::super::test_support::call;
    use super::*;
    use pretty_assertions::assert_eq;
    use records_model::{FunctionValue, LocationRecorder, Number};

    /// Tests whether a number is positive and counts how often it was asked.
    struct Positive {
        calls: AtomicUsize,
    }

    impl FunctionValue for Positive {
        fn call(&self, args: Vec<Value>, _: &mut LocationRecorder) -> RecordsResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Boolean(args[0].as_number()? > Number::ZERO))
        }
    }

    fn numbers(items: &[i64]) -> Value {
        Value::list(items.iter().copied().map(Value::from).collect())
    }

    #[test]
    fn element_is_one_based() {
        let list = numbers(&[10, 20, 30]);
        assert_eq!(call("element", vec![list.clone(), 1.into()]).unwrap(), 10.into());
        assert_eq!(call("element", vec![list.clone(), 3.into()]).unwrap(), 30.into());
        let err = call("element", vec![list.clone(), 0.into()]).unwrap_err();
        assert!(!err.is_internal());
        assert!(call("element", vec![list, 4.into()]).is_err());
    }

    #[test]
    fn any_stops_at_the_first_match() {
        let positive = Arc::new(Positive {
            calls: AtomicUsize::new(0),
        });
        let f = Value::Function(positive.clone());
        let result = call("any", vec![numbers(&[-1, 2, 3, 4]), f.clone()]).unwrap();
        assert_eq!(result, true.into());
        assert_eq!(positive.calls.load(Ordering::SeqCst), 2);

        let result = call("all", vec![numbers(&[1, -2, 3]), f.clone()]).unwrap();
        assert_eq!(result, false.into());
        assert_eq!(call("all", vec![numbers(&[]), f]).unwrap(), true.into());
    }

    #[test]
    fn select_and_count() {
        let positive = Value::Function(Arc::new(Positive {
            calls: AtomicUsize::new(0),
        }));
        let kept = call("select", vec![numbers(&[3, -1, 0, 5]), positive]).unwrap();
        assert_eq!(kept, numbers(&[3, 5]));
        assert_eq!(call("count", vec![kept]).unwrap(), 2.into());
        assert_eq!(call("contains", vec![numbers(&[1, 2]), 2.into()]).unwrap(), true.into());
    }
}
