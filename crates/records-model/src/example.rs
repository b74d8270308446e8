//! Deterministic example values for previews and generated demo data.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveTime};

use crate::data_type::{DataType, DataTypeVisitor, DateTimeKind, TagType, TypeArg};
use crate::error::{RecordsError, RecordsResult};
use crate::ids::TypeId;
use crate::unit::Unit;
use crate::value::{Number, TaggedValue, TemporalValue, Value};

const EXAMPLE_WORDS: &[&str] = &["apple", "banana", "cherry", "damson", "elder"];

/// The `index`th example value of `data_type`. The same arguments always give the same value.
pub fn example_value(data_type: &DataType, index: usize) -> RecordsResult<Value> {
    data_type.apply(&mut ExampleGenerator { index })
}

struct ExampleGenerator {
    index: usize,
}

fn index_i64(index: usize) -> RecordsResult<i64> {
    i64::try_from(index).map_err(|_| RecordsError::user("example index is too large"))
}

impl DataTypeVisitor for ExampleGenerator {
    type Output = RecordsResult<Value>;

    fn number(&mut self, _unit: &Unit) -> Self::Output {
        let i = index_i64(self.index)?;
        let number = if i % 2 == 0 {
            Number::Int(i)
        } else {
            Number::from(rust_decimal::Decimal::new(i * 10 + 5, 1))
        };
        Ok(Value::Number(number))
    }

    fn text(&mut self) -> Self::Output {
        let word = EXAMPLE_WORDS[self.index % EXAMPLE_WORDS.len()];
        let round = self.index / EXAMPLE_WORDS.len();
        Ok(Value::Text(if round == 0 {
            word.to_string()
        } else {
            format!("{word} {round}")
        }))
    }

    fn boolean(&mut self) -> Self::Output {
        Ok(Value::Boolean(self.index % 2 == 1))
    }

    fn date(&mut self, kind: DateTimeKind) -> Self::Output {
        let invalid = || RecordsError::internal("example date out of range");
        let days = index_i64(self.index)?;
        let base = NaiveDate::from_ymd_opt(2000, 1, 1).ok_or_else(invalid)?;
        let date = base
            .checked_add_signed(Duration::days(days * 37))
            .ok_or_else(invalid)?;
        let seconds = u32::try_from((self.index * 3_671) % 86_400).map_err(|_| invalid())?;
        let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).ok_or_else(invalid)?;
        let temporal = match kind {
            DateTimeKind::YearMonthDay => TemporalValue::YearMonthDay(date),
            DateTimeKind::YearMonth => TemporalValue::YearMonth {
                year: date.year(),
                month: date.month(),
            },
            DateTimeKind::TimeOfDay => TemporalValue::TimeOfDay(time),
            DateTimeKind::DateTime => TemporalValue::DateTime(date.and_time(time)),
            DateTimeKind::DateTimeZoned => {
                let offset = FixedOffset::east_opt(3_600 * (self.index % 5) as i32)
                    .ok_or_else(invalid)?;
                let zoned = date
                    .and_time(time)
                    .and_local_timezone(offset)
                    .single()
                    .ok_or_else(invalid)?;
                TemporalValue::DateTimeZoned(zoned)
            }
        };
        Ok(Value::Temporal(temporal))
    }

    fn tagged(
        &mut self,
        name: &TypeId,
        _args: &[TypeArg],
        tags: &[TagType<DataType>],
    ) -> Self::Output {
        if tags.is_empty() {
            return Err(RecordsError::internal(format!("tagged type {name} has no tags")));
        }
        let tag_index = self.index % tags.len();
        Ok(Value::Tagged(match &tags[tag_index].inner {
            None => TaggedValue::bare(tag_index),
            Some(inner) => {
                TaggedValue::with_inner(tag_index, example_value(inner, self.index / tags.len())?)
            }
        }))
    }

    fn tuple(&mut self, members: &[DataType]) -> Self::Output {
        let values = members
            .iter()
            .map(|member| example_value(member, self.index))
            .collect::<RecordsResult<_>>()?;
        Ok(Value::Tuple(values))
    }

    fn record(&mut self, fields: &BTreeMap<String, DataType>) -> Self::Output {
        let values = fields
            .iter()
            .map(|(name, ty)| Ok((name.clone(), example_value(ty, self.index)?)))
            .collect::<RecordsResult<_>>()?;
        Ok(Value::Record(values))
    }

    fn array(&mut self, element: &DataType) -> Self::Output {
        let items = (0..self.index % 4)
            .map(|offset| example_value(element, self.index + offset))
            .collect::<RecordsResult<_>>()?;
        Ok(Value::list(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare_values;
    use crate::value_text::save_value;
    use pretty_assertions::assert_eq;

    #[test]
    fn examples_are_deterministic() {
        let ty = DataType::Array(Box::new(DataType::Tuple(vec![
            DataType::number(),
            DataType::Text,
            DataType::Date(DateTimeKind::DateTimeZoned),
        ])));
        for index in 0..20 {
            let a = example_value(&ty, index).unwrap();
            let b = example_value(&ty, index).unwrap();
            assert_eq!(
                compare_values(&a, &b).unwrap(),
                std::cmp::Ordering::Equal
            );
        }
    }

    #[test]
    fn tagged_examples_cycle_through_tags() {
        let ty = DataType::Tagged {
            name: TypeId::new("C").unwrap(),
            args: Vec::new(),
            tags: vec![
                TagType::new("Blank", None),
                TagType::new("Num", Some(DataType::number())),
            ],
        };
        let saved: Vec<String> = (0..4)
            .map(|i| save_value(&example_value(&ty, i).unwrap(), &ty).unwrap())
            .collect();
        assert_eq!(saved, vec!["Blank", "Num(0)", "Blank", "Num(1.5)"]);
    }
}
