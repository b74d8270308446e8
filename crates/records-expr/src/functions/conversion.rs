use records_model::{
    display_value, load_value, Number, RecordsError, RecordsResult, TermArg, TypeId, TypeTerm,
    UnitTerm, Value, UNIT_TYPE,
};

use super::{number_in, take_args, var, FunctionCall, FunctionDefinition};

pub(super) fn definitions() -> Vec<FunctionDefinition> {
    vec![
        FunctionDefinition::new("conversion", "to_text", vec![var("t")], TypeTerm::Text, to_text)
            .needs("t"),
        FunctionDefinition::new(
            "conversion",
            "from_text",
            vec![TypeTerm::Text],
            var("t"),
            from_text,
        )
        .needs("t"),
        FunctionDefinition::new(
            "conversion",
            "convert_unit",
            vec![unit_of("to"), number_in("from")],
            number_in("to"),
            convert_unit,
        )
        .needs("to")
        .needs("from"),
    ]
}

/// `Unit({unit_var})`, the type of a unit literal such as `{m/s}`.
fn unit_of(unit_var: &str) -> TypeTerm {
    let name = TypeId::new(UNIT_TYPE).unwrap_or_else(|_| unreachable!("builtin type name"));
    TypeTerm::Tagged {
        name,
        args: vec![TermArg::Unit(UnitTerm::Var(unit_var.to_string()))],
    }
}

fn to_text(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [value] = take_args(args)?;
    let data_type = call.bindings.data_type("t")?;
    Ok(Value::Text(display_value(&value, data_type, call.types.unit_manager())?))
}

/// Reads text as a value of the type the context expects, in saved-value syntax.
fn from_text(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [text] = take_args(args)?;
    let text = text.as_text()?;
    let data_type = call.bindings.data_type("t")?;
    load_value(data_type, text)
        .map_err(|err| RecordsError::user(format!("cannot read {text:?}: {err}")))
}

fn convert_unit(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [_, amount] = take_args(args)?;
    let to = call.bindings.unit("to")?;
    let from = call.bindings.unit("from")?;
    let factor = call.types.unit_manager().conversion_factor(from, to)?;
    let converted = amount.as_number()?.checked_mul(Number::from(factor))?;
    Ok(Value::Number(converted.normalised()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::call_with;
    use super::super::TypeBindings;
    use super::*;
    use pretty_assertions::assert_eq;
    use records_model::{DataType, TaggedValue, Unit};

    fn typed(var: &str, data_type: DataType) -> TypeBindings {
        let mut bindings = TypeBindings::default();
        bindings.types.insert(var.to_string(), data_type);
        bindings
    }

    #[test]
    fn text_conversions_follow_the_bound_type() {
        let numbers = typed("t", DataType::number());
        let read = call_with("from_text", &numbers, vec!["12.5".into()]).unwrap();
        assert_eq!(read, Value::Number("12.5".parse().unwrap()));
        let err = call_with("from_text", &numbers, vec!["twelve".into()]).unwrap_err();
        assert!(!err.is_internal());

        let texts = typed("t", DataType::Text);
        assert_eq!(call_with("to_text", &texts, vec!["a b".into()]).unwrap(), "a b".into());
    }

    #[test]
    fn unbound_variables_are_internal_errors() {
        let err = call_with("to_text", &TypeBindings::default(), vec![1.into()]).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn converts_between_compatible_units() {
        let mut bindings = TypeBindings::default();
        bindings.units.insert("to".to_string(), Unit::single("cm"));
        bindings.units.insert("from".to_string(), Unit::single("m"));
        let unit_literal = Value::from(TaggedValue::bare(0));
        let result = call_with("convert_unit", &bindings, vec![unit_literal, 2.into()]).unwrap();
        assert_eq!(result, 200.into());
    }
}
