use records_model::{RecordsError, RecordsResult, Value, IS_TAG, OPTIONAL_TYPE};

use super::{optional_of, take_args, var, FunctionCall, FunctionDefinition};

pub(super) fn definitions() -> Vec<FunctionDefinition> {
    vec![FunctionDefinition::new(
        "optional",
        "get_optional",
        vec![optional_of(var("t")), var("t")],
        var("t"),
        get_optional,
    )]
}

/// The wrapped value of `Is(x)`, or the fallback for `None`.
fn get_optional(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [optional, fallback] = take_args(args)?;
    let is_index = call
        .types
        .lookup_definition_str(OPTIONAL_TYPE)
        .and_then(|definition| definition.tag_index(IS_TAG))
        .ok_or_else(|| RecordsError::internal("the Optional type is not registered"))?;
    let tagged = optional.as_tagged()?;
    match &tagged.inner {
        Some(inner) if tagged.tag_index == is_index => Ok((**inner).clone()),
        _ => Ok(fallback),
    }
}
