use records_model::{RecordsResult, TypeTerm, Value};

use super::{take_args, FunctionCall, FunctionDefinition};

pub(super) fn definitions() -> Vec<FunctionDefinition> {
    vec![
        FunctionDefinition::new("boolean", "not", vec![TypeTerm::Boolean], TypeTerm::Boolean, not),
        FunctionDefinition::new(
            "boolean",
            "xor",
            vec![TypeTerm::Boolean, TypeTerm::Boolean],
            TypeTerm::Boolean,
            xor,
        ),
    ]
}

fn not(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [b] = take_args(args)?;
    Ok(Value::Boolean(!b.as_boolean()?))
}

fn xor(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [a, b] = take_args(args)?;
    Ok(Value::Boolean(a.as_boolean()? != b.as_boolean()?))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::call;
    use pretty_assertions::assert_eq;
    use records_model::Value;

    #[test]
    fn truth_tables() {
        assert_eq!(call("not", vec![true.into()]).unwrap(), Value::Boolean(false));
        for (a, b) in [(false, false), (false, true), (true, false), (true, true)] {
            assert_eq!(call("xor", vec![a.into(), b.into()]).unwrap(), Value::Boolean(a ^ b));
        }
    }
}
