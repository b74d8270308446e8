use records_model::{RecordsResult, TypeTerm, Value};
use unicode_segmentation::UnicodeSegmentation;

use super::{count_value, list_of, take_args, FunctionCall, FunctionDefinition};

pub(super) fn definitions() -> Vec<FunctionDefinition> {
    let text = || TypeTerm::Text;
    vec![
        FunctionDefinition::new(
            "text",
            "text_length",
            vec![text()],
            TypeTerm::number(),
            text_length,
        ),
        FunctionDefinition::new("text", "upper", vec![text()], text(), upper),
        FunctionDefinition::new("text", "lower", vec![text()], text(), lower),
        FunctionDefinition::new("text", "trim", vec![text()], text(), trim),
        FunctionDefinition::new("text", "join_text", vec![list_of(text())], text(), join_text),
    ]
}

/// Length in user-perceived characters, so `"é"` is one character however it is encoded.
fn text_length(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [text] = take_args(args)?;
    count_value(text.as_text()?.graphemes(true).count())
}

fn map_text(args: Vec<Value>, f: impl FnOnce(&str) -> String) -> RecordsResult<Value> {
    let [text] = take_args(args)?;
    Ok(Value::Text(f(text.as_text()?)))
}

fn upper(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    map_text(args, str::to_uppercase)
}

fn lower(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    map_text(args, str::to_lowercase)
}

fn trim(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    map_text(args, |text| text.trim().to_string())
}

fn join_text(call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [list] = take_args(args)?;
    let mut joined = String::new();
    for item in call.read_items(&list)? {
        joined.push_str(item.as_text()?);
    }
    Ok(Value::Text(joined))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::call;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn length_counts_graphemes() {
        assert_eq!(call("text_length", vec!["cafe\u{301}".into()]).unwrap(), 4.into());
        assert_eq!(call("text_length", vec!["".into()]).unwrap(), 0.into());
    }

    #[test]
    fn case_and_whitespace() {
        assert_eq!(call("upper", vec!["Straße".into()]).unwrap(), "STRASSE".into());
        assert_eq!(call("lower", vec!["ABC".into()]).unwrap(), "abc".into());
        assert_eq!(call("trim", vec!["  a b \n".into()]).unwrap(), "a b".into());
        let parts = Value::list(vec!["a".into(), "-".into(), "b".into()]);
        assert_eq!(call("join_text", vec![parts]).unwrap(), "a-b".into());
    }
}
