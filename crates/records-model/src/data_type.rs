//! The closed set of column/value data types.
//!
//! Algorithms that must handle every variant implement [`DataTypeVisitor`] and call
//! [`DataType::apply`]; adding a variant breaks every visitor at compile time instead of
//! falling through a chain of runtime type tests.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::escape::quoted_if_needed;
use crate::ids::TypeId;
use crate::unit::Unit;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateTimeKind {
    YearMonthDay,
    YearMonth,
    TimeOfDay,
    DateTime,
    DateTimeZoned,
}

impl DateTimeKind {
    pub const ALL: [DateTimeKind; 5] = [
        DateTimeKind::YearMonthDay,
        DateTimeKind::YearMonth,
        DateTimeKind::TimeOfDay,
        DateTimeKind::DateTime,
        DateTimeKind::DateTimeZoned,
    ];

    /// Name of the type in type expressions (`type{DateYMD}`).
    pub fn type_name(self) -> &'static str {
        match self {
            DateTimeKind::YearMonthDay => "DateYMD",
            DateTimeKind::YearMonth => "DateYM",
            DateTimeKind::TimeOfDay => "Time",
            DateTimeKind::DateTime => "DateTime",
            DateTimeKind::DateTimeZoned => "DateTimeZoned",
        }
    }

    /// Keyword introducing a literal of this kind (`date{2020-01-31}`).
    pub fn literal_keyword(self) -> &'static str {
        match self {
            DateTimeKind::YearMonthDay => "date",
            DateTimeKind::YearMonth => "dateym",
            DateTimeKind::TimeOfDay => "time",
            DateTimeKind::DateTime => "datetime",
            DateTimeKind::DateTimeZoned => "datetimezoned",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }

    pub fn from_literal_keyword(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.literal_keyword() == name)
    }
}

/// Argument to a parameterised tagged type: either a type or a unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TypeArg {
    Type(DataType),
    Unit(Unit),
}

/// One alternative of a tagged type, optionally carrying an inner value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagType<T> {
    pub name: String,
    pub inner: Option<T>,
}

impl<T> TagType<T> {
    pub fn new(name: impl Into<String>, inner: Option<T>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataType {
    Number(Unit),
    Text,
    Boolean,
    Date(DateTimeKind),
    /// Tag order is significant: two types listing the same tags in a different order are
    /// different types, and tag indexes in values refer to this order.
    Tagged {
        name: TypeId,
        args: Vec<TypeArg>,
        tags: Vec<TagType<DataType>>,
    },
    Tuple(Vec<DataType>),
    Record(BTreeMap<String, DataType>),
    Array(Box<DataType>),
}

pub trait DataTypeVisitor {
    type Output;

    fn number(&mut self, unit: &Unit) -> Self::Output;
    fn text(&mut self) -> Self::Output;
    fn boolean(&mut self) -> Self::Output;
    fn date(&mut self, kind: DateTimeKind) -> Self::Output;
    fn tagged(
        &mut self,
        name: &TypeId,
        args: &[TypeArg],
        tags: &[TagType<DataType>],
    ) -> Self::Output;
    fn tuple(&mut self, members: &[DataType]) -> Self::Output;
    fn record(&mut self, fields: &BTreeMap<String, DataType>) -> Self::Output;
    fn array(&mut self, element: &DataType) -> Self::Output;
}

impl DataType {
    pub fn number() -> Self {
        DataType::Number(Unit::scalar())
    }

    pub fn apply<V: DataTypeVisitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
        match self {
            DataType::Number(unit) => visitor.number(unit),
            DataType::Text => visitor.text(),
            DataType::Boolean => visitor.boolean(),
            DataType::Date(kind) => visitor.date(*kind),
            DataType::Tagged { name, args, tags } => visitor.tagged(name, args, tags),
            DataType::Tuple(members) => visitor.tuple(members),
            DataType::Record(fields) => visitor.record(fields),
            DataType::Array(element) => visitor.array(element),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, DataType::Number(_))
    }
}

/// True when a tagged type can be displayed in a single numeric cell: at most one tag carries
/// an inner value, and that inner value is a number.
pub fn can_fit_in_one_numeric(tags: &[TagType<DataType>]) -> bool {
    let mut found_numeric = false;
    for tag in tags {
        match &tag.inner {
            None => {}
            Some(inner) if inner.is_number() && !found_numeric => found_numeric = true,
            Some(_) => return false,
        }
    }
    true
}

pub(crate) fn write_type_args<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    args: &[T],
) -> fmt::Result {
    if args.is_empty() {
        return Ok(());
    }
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

impl fmt::Display for TypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeArg::Type(t) => write!(f, "{t}"),
            TypeArg::Unit(u) => write!(f, "{{{u}}}"),
        }
    }
}

/// Saved form of a type, as accepted inside `type{...}`.
impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Number(unit) if unit.is_scalar() => f.write_str("Number"),
            DataType::Number(unit) => write!(f, "Number{{{unit}}}"),
            DataType::Text => f.write_str("Text"),
            DataType::Boolean => f.write_str("Boolean"),
            DataType::Date(kind) => f.write_str(kind.type_name()),
            DataType::Tagged { name, args, .. } => {
                f.write_str(&quoted_if_needed(name.raw()))?;
                write_type_args(f, args)
            }
            DataType::Tuple(members) => {
                f.write_str("(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str(")")
            }
            DataType::Record(fields) => {
                f.write_str("(")?;
                for (i, (field, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {ty}", quoted_if_needed(field))?;
                }
                f.write_str(")")
            }
            DataType::Array(element) => write!(f, "[{element}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tagged(tags: Vec<TagType<DataType>>) -> DataType {
        DataType::Tagged {
            name: TypeId::new("C").unwrap(),
            args: Vec::new(),
            tags,
        }
    }

    #[test]
    fn blank_or_number_fits_in_one_numeric() {
        let tags = vec![
            TagType::new("Blank", None),
            TagType::new("Num", Some(DataType::number())),
        ];
        assert!(can_fit_in_one_numeric(&tags));
        assert!(can_fit_in_one_numeric(&[TagType::new("A", None)]));
    }

    #[test]
    fn two_numeric_or_text_tags_do_not_fit() {
        let two = vec![
            TagType::new("A", Some(DataType::number())),
            TagType::new("B", Some(DataType::number())),
        ];
        assert!(!can_fit_in_one_numeric(&two));
        assert!(!can_fit_in_one_numeric(&[TagType::new(
            "T",
            Some(DataType::Text)
        )]));
    }

    #[test]
    fn tag_order_is_part_of_type_identity() {
        let a = tagged(vec![TagType::new("X", None), TagType::new("Y", None)]);
        let b = tagged(vec![TagType::new("Y", None), TagType::new("X", None)]);
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn displays_saved_type_syntax() {
        let mut fields = BTreeMap::new();
        fields.insert("b".to_string(), DataType::Text);
        fields.insert("a b".to_string(), DataType::Number(Unit::single("m")));
        let ty = DataType::Array(Box::new(DataType::Record(fields)));
        assert_eq!(ty.to_string(), "[(\"a b\": Number{m}, b: Text)]");

        let optional = DataType::Tagged {
            name: TypeId::new("Optional").unwrap(),
            args: vec![TypeArg::Type(DataType::Date(DateTimeKind::YearMonthDay))],
            tags: Vec::new(),
        };
        assert_eq!(optional.to_string(), "Optional(DateYMD)");
    }

    struct VariantName;

    impl DataTypeVisitor for VariantName {
        type Output = &'static str;

        fn number(&mut self, _unit: &Unit) -> &'static str {
            "number"
        }
        fn text(&mut self) -> &'static str {
            "text"
        }
        fn boolean(&mut self) -> &'static str {
            "boolean"
        }
        fn date(&mut self, _kind: DateTimeKind) -> &'static str {
            "date"
        }
        fn tagged(&mut self, _: &TypeId, _: &[TypeArg], _: &[TagType<DataType>]) -> &'static str {
            "tagged"
        }
        fn tuple(&mut self, _: &[DataType]) -> &'static str {
            "tuple"
        }
        fn record(&mut self, _: &BTreeMap<String, DataType>) -> &'static str {
            "record"
        }
        fn array(&mut self, _: &DataType) -> &'static str {
            "array"
        }
    }

    #[test]
    fn apply_dispatches_to_exactly_one_method() {
        assert_eq!(DataType::Text.apply(&mut VariantName), "text");
        assert_eq!(
            DataType::Array(Box::new(DataType::Boolean)).apply(&mut VariantName),
            "array"
        );
        assert_eq!(tagged(vec![TagType::new("A", None)]).apply(&mut VariantName), "tagged");
    }
}
