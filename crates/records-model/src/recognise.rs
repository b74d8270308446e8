//! Typed value recognisers.
//!
//! Each data type variant has a recogniser reached through [`DataTypeVisitor`], so loading a
//! cell and editing a cell share one implementation per type. Errors carry the offset at which
//! recognition failed.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::data_type::{DataType, DataTypeVisitor, DateTimeKind, TagType, TypeArg};
use crate::ids::TypeId;
use crate::parse_progress::{ParseProgress, RecogniseError, RecogniseResult};
use crate::unit::Unit;
use crate::value::{Number, TaggedValue, TemporalValue, Value};

/// Recognises one value of `data_type` at the start of `progress`.
pub fn recognise_value<'a>(
    data_type: &DataType,
    progress: ParseProgress<'a>,
) -> RecogniseResult<'a, Value> {
    data_type.apply(&mut Recogniser { progress })
}

/// Loads a complete value; anything other than trailing spaces after it is an error.
pub fn load_value(data_type: &DataType, text: &str) -> Result<Value, RecogniseError> {
    let success = recognise_value(data_type, ParseProgress::new(text))?;
    let end = success.progress.skip_spaces();
    if !end.at_end() {
        return Err(end.error("unexpected text after value"));
    }
    Ok(success.value)
}

struct Recogniser<'a> {
    progress: ParseProgress<'a>,
}

fn expect<'a>(
    progress: ParseProgress<'a>,
    token: &str,
) -> Result<ParseProgress<'a>, RecogniseError> {
    progress
        .consume_next(token)
        .ok_or_else(|| progress.skip_spaces().error(format!("expected '{token}'")))
}

fn parse_temporal(kind: DateTimeKind, text: &str) -> Option<TemporalValue> {
    match kind {
        DateTimeKind::YearMonthDay => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(TemporalValue::YearMonthDay),
        DateTimeKind::YearMonth => {
            let (year, month) = text.split_once('-')?;
            let year: i32 = year.parse().ok()?;
            let month: u32 = month.parse().ok()?;
            (1..=12)
                .contains(&month)
                .then_some(TemporalValue::YearMonth { year, month })
        }
        DateTimeKind::TimeOfDay => NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
            .ok()
            .map(TemporalValue::TimeOfDay),
        DateTimeKind::DateTime => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
            .ok()
            .map(TemporalValue::DateTime),
        DateTimeKind::DateTimeZoned => {
            DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z")
                .ok()
                .map(TemporalValue::DateTimeZoned)
        }
    }
}

/// Reads the characters a temporal literal may contain, trimming trailing spaces.
pub fn consume_temporal_text(progress: ParseProgress<'_>) -> (&str, ParseProgress<'_>) {
    let start = progress.skip_spaces();
    let (raw, _) = start
        .consume_while(|c| c.is_ascii_digit() || matches!(c, '-' | ':' | '.' | '+' | ' '));
    let trimmed = raw.trim_end();
    (trimmed, start.advance(trimmed.len()))
}

pub fn recognise_temporal(
    kind: DateTimeKind,
    progress: ParseProgress<'_>,
) -> RecogniseResult<'_, TemporalValue> {
    let start = progress.skip_spaces();
    let (text, after) = consume_temporal_text(start);
    match parse_temporal(kind, text) {
        Some(value) => after.success(value),
        None => Err(start.error(format!("invalid {} value: {text:?}", kind.type_name()))),
    }
}

impl<'a> Recogniser<'a> {
    fn nested(
        &self,
        data_type: &DataType,
        progress: ParseProgress<'a>,
    ) -> RecogniseResult<'a, Value> {
        recognise_value(data_type, progress)
    }
}

impl<'a> DataTypeVisitor for Recogniser<'a> {
    type Output = RecogniseResult<'a, Value>;

    fn number(&mut self, _unit: &Unit) -> Self::Output {
        let start = self.progress.skip_spaces();
        let Some((text, after)) = start.consume_number() else {
            return Err(start.error("expected a number"));
        };
        match text.parse::<Number>() {
            Ok(number) => after.success(Value::Number(number)),
            Err(err) => Err(start.error(err.message())),
        }
    }

    fn text(&mut self) -> Self::Output {
        let success = self.progress.consume_quoted()?;
        success.progress.success(Value::Text(success.value))
    }

    fn boolean(&mut self) -> Self::Output {
        if let Some(after) = self.progress.consume_keyword("true") {
            return after.success(Value::Boolean(true));
        }
        if let Some(after) = self.progress.consume_keyword("false") {
            return after.success(Value::Boolean(false));
        }
        Err(self.progress.skip_spaces().error("expected true or false"))
    }

    fn date(&mut self, kind: DateTimeKind) -> Self::Output {
        let success = recognise_temporal(kind, self.progress)?;
        success.progress.success(Value::Temporal(success.value))
    }

    fn tagged(
        &mut self,
        name: &TypeId,
        _args: &[TypeArg],
        tags: &[TagType<DataType>],
    ) -> Self::Output {
        let start = self.progress.skip_spaces();
        let Some((tag_name, after_tag)) = start.consume_ident() else {
            return Err(start.error(format!("expected a tag of {name}")));
        };
        let Some(tag_index) = tags.iter().position(|t| t.name == tag_name) else {
            return Err(start.error(format!("unknown tag: {tag_name}")));
        };
        match &tags[tag_index].inner {
            None => after_tag.success(Value::Tagged(TaggedValue::bare(tag_index))),
            Some(inner_type) => {
                let open = expect(after_tag, "(")?;
                let inner = self.nested(inner_type, open)?;
                let close = expect(inner.progress, ")")?;
                close.success(Value::Tagged(TaggedValue::with_inner(tag_index, inner.value)))
            }
        }
    }

    fn tuple(&mut self, members: &[DataType]) -> Self::Output {
        let mut progress = expect(self.progress, "(")?;
        let mut values = Vec::with_capacity(members.len());
        for (i, member) in members.iter().enumerate() {
            if i > 0 {
                progress = expect(progress, ",")?;
            }
            let success = self.nested(member, progress)?;
            values.push(success.value);
            progress = success.progress;
        }
        expect(progress, ")")?.success(Value::Tuple(values))
    }

    fn record(&mut self, fields: &BTreeMap<String, DataType>) -> Self::Output {
        let open = expect(self.progress, "(")?;
        let mut progress = open;
        let mut values = BTreeMap::new();
        loop {
            if let Some(after) = progress.consume_next(")") {
                progress = after;
                break;
            }
            if !values.is_empty() {
                progress = expect(progress, ",")?;
            }
            let field_start = progress.skip_spaces();
            let name = field_start.consume_name()?;
            let Some(field_type) = fields.get(&name.value) else {
                return Err(field_start.error(format!("unknown field: {}", name.value)));
            };
            if values.contains_key(&name.value) {
                return Err(field_start.error(format!("duplicate field: {}", name.value)));
            }
            let colon = expect(name.progress, ":")?;
            let success = self.nested(field_type, colon)?;
            values.insert(name.value, success.value);
            progress = success.progress;
        }
        if let Some(missing) = fields.keys().find(|k| !values.contains_key(*k)) {
            return Err(open.error(format!("missing field: {missing}")));
        }
        progress.success(Value::Record(values))
    }

    fn array(&mut self, element: &DataType) -> Self::Output {
        let mut progress = expect(self.progress, "[")?;
        let mut items = Vec::new();
        if let Some(after) = progress.consume_next("]") {
            return after.success(Value::list(items));
        }
        loop {
            let success = self.nested(element, progress)?;
            items.push(success.value);
            progress = success.progress;
            if let Some(after) = progress.consume_next(",") {
                progress = after;
                continue;
            }
            return match progress.consume_next("]") {
                Some(after) => after.success(Value::list(items)),
                None => Err(progress.skip_spaces().error("expected ']'")),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record_type() -> DataType {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), DataType::number());
        fields.insert("b".to_string(), DataType::number());
        DataType::Record(fields)
    }

    #[test]
    fn list_recogniser_consumes_closing_bracket() {
        let list = DataType::Array(Box::new(DataType::number()));
        let success = recognise_value(&list, ParseProgress::new("[1,2,3] tail")).unwrap();
        assert_eq!(
            success.value,
            Value::list(vec![Value::from(1), Value::from(2), Value::from(3)])
        );
        assert_eq!(success.progress.position(), 7);
    }

    #[test]
    fn list_recogniser_reports_missing_bracket() {
        let list = DataType::Array(Box::new(DataType::number()));
        let err = recognise_value(&list, ParseProgress::new("[1,2")).unwrap_err();
        assert_eq!(err.message, "expected ']'");
        assert_eq!(err.position, 4);
    }

    #[test]
    fn record_recogniser_reads_fields() {
        let success = recognise_value(&record_type(), ParseProgress::new("(a:1,b:2)")).unwrap();
        let mut expected = BTreeMap::new();
        expected.insert("a".to_string(), Value::from(1));
        expected.insert("b".to_string(), Value::from(2));
        assert_eq!(success.value, Value::Record(expected));
        assert!(success.progress.at_end());
    }

    #[test]
    fn record_recogniser_rejects_unknown_and_missing_fields() {
        let err = load_value(&record_type(), "(a:1, c:2)").unwrap_err();
        assert_eq!(err.message, "unknown field: c");
        assert_eq!(err.position, 6);

        let err = load_value(&record_type(), "(b: 2)").unwrap_err();
        assert_eq!(err.message, "missing field: a");
    }

    #[test]
    fn tagged_recogniser_requires_known_tag() {
        let ty = DataType::Tagged {
            name: TypeId::new("C").unwrap(),
            args: Vec::new(),
            tags: vec![
                TagType::new("Blank", None),
                TagType::new("Num", Some(DataType::number())),
            ],
        };
        let value = load_value(&ty, "Num(5)").unwrap();
        assert_eq!(value, Value::Tagged(TaggedValue::with_inner(1, Value::from(5))));
        assert_eq!(load_value(&ty, " Blank ").unwrap(), Value::Tagged(TaggedValue::bare(0)));
        assert_eq!(load_value(&ty, "Other").unwrap_err().message, "unknown tag: Other");
    }

    #[test]
    fn temporal_values_stop_at_separators() {
        let ty = DataType::Tuple(vec![
            DataType::Date(DateTimeKind::DateTime),
            DataType::Date(DateTimeKind::YearMonth),
        ]);
        let value = load_value(&ty, "(2020-01-02 12:30:00 , 2021-11)").unwrap();
        let members = value.as_tuple().unwrap();
        assert_eq!(members[0].as_temporal().unwrap().to_string(), "2020-01-02 12:30:00");
        assert_eq!(members[1].as_temporal().unwrap().to_string(), "2021-11");
        assert!(load_value(&DataType::Date(DateTimeKind::YearMonth), "2021-13").is_err());
    }

    #[test]
    fn trailing_text_is_rejected() {
        let err = load_value(&DataType::Boolean, "true false").unwrap_err();
        assert_eq!(err.position, 5);
    }
}
