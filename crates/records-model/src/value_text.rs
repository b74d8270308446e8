//! Saved and displayed text of values.

use std::collections::BTreeMap;

use crate::data_type::{DataType, DataTypeVisitor, DateTimeKind, TagType, TypeArg};
use crate::error::{RecordsError, RecordsResult};
use crate::escape::{quote, quoted_if_needed};
use crate::ids::TypeId;
use crate::parse_progress::ParseProgress;
use crate::recognise::load_value;
use crate::unit::{Unit, UnitManager};
use crate::value::Value;

pub const INVALID_MARKER: &str = "@INVALID";

/// Writes `value` in the form [`load_value`] reads back. Records are written in key order.
pub fn save_value(value: &Value, data_type: &DataType) -> RecordsResult<String> {
    data_type.apply(&mut ValueWriter {
        value,
        units: None,
    })
}

/// Text shown in a cell: like the saved form, but text is unquoted and numbers carry their
/// unit's prefix and suffix.
pub fn display_value(
    value: &Value,
    data_type: &DataType,
    units: &UnitManager,
) -> RecordsResult<String> {
    data_type.apply(&mut ValueWriter {
        value,
        units: Some(units),
    })
}

struct ValueWriter<'v> {
    value: &'v Value,
    /// Set when writing for display rather than saving.
    units: Option<&'v UnitManager>,
}

impl<'v> ValueWriter<'v> {
    fn nested(&self, value: &Value, data_type: &DataType) -> RecordsResult<String> {
        data_type.apply(&mut ValueWriter {
            value,
            units: self.units,
        })
    }

    fn write_members<'a>(
        &self,
        pairs: impl Iterator<Item = (Option<&'a str>, &'a Value, &'a DataType)>,
    ) -> RecordsResult<String> {
        let mut parts = Vec::new();
        for (label, value, data_type) in pairs {
            let text = self.nested(value, data_type)?;
            parts.push(match label {
                Some(label) => format!("{}: {text}", quoted_if_needed(label)),
                None => text,
            });
        }
        Ok(parts.join(", "))
    }
}

impl DataTypeVisitor for ValueWriter<'_> {
    type Output = RecordsResult<String>;

    fn number(&mut self, unit: &Unit) -> Self::Output {
        let number = self.value.as_number()?;
        let Some(units) = self.units else {
            return Ok(number.to_string());
        };
        if let [(name, 1)] = unit.factors().collect::<Vec<_>>().as_slice() {
            if let Some(decl) = units.declaration(name) {
                if !decl.prefix.is_empty() || !decl.suffix.is_empty() {
                    return Ok(format!("{}{number}{}", decl.prefix, decl.suffix));
                }
            }
        }
        if unit.is_scalar() {
            Ok(number.to_string())
        } else {
            Ok(format!("{number} {unit}"))
        }
    }

    fn text(&mut self) -> Self::Output {
        let text = self.value.as_text()?;
        Ok(if self.units.is_some() {
            text.to_string()
        } else {
            quote(text)
        })
    }

    fn boolean(&mut self) -> Self::Output {
        Ok(self.value.as_boolean()?.to_string())
    }

    fn date(&mut self, kind: DateTimeKind) -> Self::Output {
        let temporal = self.value.as_temporal()?;
        if temporal.kind() != kind {
            return Err(RecordsError::internal(format!(
                "expected {} value but found {}",
                kind.type_name(),
                temporal.kind().type_name()
            )));
        }
        Ok(temporal.to_string())
    }

    fn tagged(
        &mut self,
        name: &TypeId,
        _args: &[TypeArg],
        tags: &[TagType<DataType>],
    ) -> Self::Output {
        let tagged = self.value.as_tagged()?;
        let tag = tags.get(tagged.tag_index).ok_or_else(|| {
            RecordsError::internal(format!(
                "tag index {} out of range for {name}",
                tagged.tag_index
            ))
        })?;
        match (&tag.inner, &tagged.inner) {
            (None, None) => Ok(tag.name.clone()),
            (Some(inner_type), Some(inner)) => {
                Ok(format!("{}({})", tag.name, self.nested(inner, inner_type)?))
            }
            _ => Err(RecordsError::internal(format!(
                "value for tag {} of {name} has the wrong shape",
                tag.name
            ))),
        }
    }

    fn tuple(&mut self, members: &[DataType]) -> Self::Output {
        let values = self.value.as_tuple()?;
        if values.len() != members.len() {
            return Err(RecordsError::internal("tuple value has the wrong size"));
        }
        let inner = self.write_members(
            values
                .iter()
                .zip(members)
                .map(|(value, ty)| (None, value, ty)),
        )?;
        Ok(format!("({inner})"))
    }

    fn record(&mut self, fields: &BTreeMap<String, DataType>) -> Self::Output {
        let values = self.value.as_record()?;
        let mut pairs = Vec::with_capacity(fields.len());
        for (field, ty) in fields {
            let value = values.get(field).ok_or_else(|| {
                RecordsError::internal(format!("record value lacks field {field}"))
            })?;
            pairs.push((Some(field.as_str()), value, ty));
        }
        let inner = self.write_members(pairs.into_iter())?;
        Ok(format!("({inner})"))
    }

    fn array(&mut self, element: &DataType) -> Self::Output {
        let items = self.value.list_items()?;
        let inner = self.write_members(items.iter().map(|value| (None, value, element)))?;
        Ok(format!("[{inner}]"))
    }
}

/// A stored cell: either a value of the column's type, or the raw text that failed to load.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadedValue {
    Valid(Value),
    Invalid(String),
}

/// Loads a saved cell. Unreadable text is kept as [`LoadedValue::Invalid`] so that it survives
/// the next save.
pub fn load_cell(data_type: &DataType, text: &str) -> LoadedValue {
    let progress = ParseProgress::new(text);
    if let Some(after) = progress.consume_keyword(INVALID_MARKER) {
        if let Ok(raw) = after.consume_quoted() {
            if raw.progress.skip_spaces().at_end() {
                return LoadedValue::Invalid(raw.value);
            }
        }
    }
    match load_value(data_type, text) {
        Ok(value) => LoadedValue::Valid(value),
        Err(err) => {
            log::debug!("keeping unreadable cell as invalid: {err}");
            LoadedValue::Invalid(text.to_string())
        }
    }
}

pub fn save_cell(cell: &LoadedValue, data_type: &DataType) -> RecordsResult<String> {
    match cell {
        LoadedValue::Valid(value) => save_value(value, data_type),
        LoadedValue::Invalid(raw) => Ok(format!("{INVALID_MARKER} {}", quote(raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Number, TaggedValue};
    use pretty_assertions::assert_eq;

    fn numeric_enum() -> DataType {
        DataType::Tagged {
            name: TypeId::new("C").unwrap(),
            args: Vec::new(),
            tags: vec![
                TagType::new("Blank", None),
                TagType::new("Num", Some(DataType::number())),
            ],
        }
    }

    #[test]
    fn tagged_value_saves_with_inner() {
        let value = Value::Tagged(TaggedValue::with_inner(1, Value::from(5)));
        assert_eq!(save_value(&value, &numeric_enum()).unwrap(), "Num(5)");
        let blank = Value::Tagged(TaggedValue::bare(0));
        assert_eq!(save_value(&blank, &numeric_enum()).unwrap(), "Blank");
    }

    #[test]
    fn record_fields_save_sorted() {
        let mut types = BTreeMap::new();
        types.insert("zeta".to_string(), DataType::Text);
        types.insert("alpha".to_string(), DataType::number());
        let mut values = BTreeMap::new();
        values.insert("zeta".to_string(), Value::from("a\"b"));
        values.insert("alpha".to_string(), Value::Number("1.50".parse::<Number>().unwrap()));
        let saved = save_value(&Value::Record(values), &DataType::Record(types)).unwrap();
        assert_eq!(saved, "(alpha: 1.5, zeta: \"a^qb\")");
    }

    #[test]
    fn saved_values_load_back() {
        let ty = DataType::Array(Box::new(numeric_enum()));
        let text = "[Num(5), Blank, Num(-2.25)]";
        let value = load_value(&ty, text).unwrap();
        assert_eq!(save_value(&value, &ty).unwrap(), text);
    }

    #[test]
    fn invalid_cells_round_trip() {
        let cell = load_cell(&DataType::number(), "12 apples");
        assert_eq!(cell, LoadedValue::Invalid("12 apples".to_string()));
        let saved = save_cell(&cell, &DataType::number()).unwrap();
        assert_eq!(saved, "@INVALID \"12 apples\"");
        assert_eq!(load_cell(&DataType::number(), &saved), cell);
    }

    #[test]
    fn display_uses_unit_prefix_and_unquoted_text() {
        let units = UnitManager::new();
        let usd = DataType::Number(Unit::single("USD"));
        assert_eq!(display_value(&Value::from(3), &usd, &units).unwrap(), "$3");
        let speed = DataType::Number(Unit::single("m").divide(&Unit::single("s")));
        assert_eq!(display_value(&Value::from(3), &speed, &units).unwrap(), "3 m/s");
        assert_eq!(
            display_value(&Value::from("hi"), &DataType::Text, &units).unwrap(),
            "hi"
        );
    }
}
