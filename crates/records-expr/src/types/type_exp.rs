//! Inference-time types and units, which may contain unresolved variables.

use std::collections::BTreeMap;
use std::fmt;

use records_model::{DataType, DateTimeKind, TypeArg, TypeId, Unit};

/// Handle of a type variable slot in a [`TypeArena`](super::TypeArena).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeVarId(pub(crate) u32);

/// Handle of a unit variable slot in a [`TypeArena`](super::TypeArena).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitVarId(pub(crate) u32);

/// Constraint on the types a variable may be bound to. `Comparable` implies `Equatable`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeClass {
    Equatable,
    Comparable,
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeClass::Equatable => "Equatable",
            TypeClass::Comparable => "Comparable",
        })
    }
}

/// A unit as a product of integer powers of named units and unit variables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct UnitExp {
    pub(crate) base: Unit,
    pub(crate) vars: BTreeMap<UnitVarId, i32>,
}

impl UnitExp {
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn concrete(unit: Unit) -> Self {
        Self {
            base: unit,
            vars: BTreeMap::new(),
        }
    }

    pub fn var(id: UnitVarId) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(id, 1);
        Self {
            base: Unit::scalar(),
            vars,
        }
    }

    pub fn as_concrete(&self) -> Option<&Unit> {
        self.vars.is_empty().then_some(&self.base)
    }

    /// Powers saturate at the `i32` bounds, like [`Unit::multiply`].
    #[must_use]
    pub fn multiply(&self, other: &UnitExp) -> UnitExp {
        let mut vars = self.vars.clone();
        for (id, power) in &other.vars {
            let entry = vars.entry(*id).or_insert(0);
            *entry = entry.saturating_add(*power);
        }
        vars.retain(|_, power| *power != 0);
        UnitExp {
            base: self.base.multiply(&other.base),
            vars,
        }
    }

    /// `None` if a power leaves the `i32` range.
    pub fn checked_multiply(&self, other: &UnitExp) -> Option<UnitExp> {
        let mut vars = self.vars.clone();
        for (id, power) in &other.vars {
            let entry = vars.entry(*id).or_insert(0);
            *entry = entry.checked_add(*power)?;
        }
        vars.retain(|_, power| *power != 0);
        Some(UnitExp {
            base: self.base.checked_multiply(&other.base)?,
            vars,
        })
    }

    #[must_use]
    pub fn raised_to(&self, power: i32) -> UnitExp {
        UnitExp {
            base: self.base.raised_to(power),
            vars: self
                .vars
                .iter()
                .filter(|_| power != 0)
                .map(|(id, p)| (*id, p.saturating_mul(power)))
                .collect(),
        }
    }

    pub fn checked_raised_to(&self, power: i32) -> Option<UnitExp> {
        let vars = self
            .vars
            .iter()
            .filter(|_| power != 0)
            .map(|(id, p)| Some((*id, p.checked_mul(power)?)))
            .collect::<Option<_>>()?;
        Some(UnitExp {
            base: self.base.checked_raised_to(power)?,
            vars,
        })
    }

    #[must_use]
    pub fn divide(&self, other: &UnitExp) -> UnitExp {
        self.multiply(&other.raised_to(-1))
    }

    pub fn checked_divide(&self, other: &UnitExp) -> Option<UnitExp> {
        self.checked_multiply(&other.checked_raised_to(-1)?)
    }
}

impl fmt::Display for UnitExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vars.is_empty() {
            return write!(f, "{}", self.base);
        }
        let mut first = true;
        if !self.base.is_scalar() {
            write!(f, "{}", self.base)?;
            first = false;
        }
        for (id, power) in &self.vars {
            if !first {
                f.write_str("*")?;
            }
            first = false;
            write!(f, "@unitvar u{}", id.0)?;
            if *power != 1 {
                write!(f, "^{power}")?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeExpArg {
    Type(TypeExp),
    Unit(UnitExp),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeExp {
    Var(TypeVarId),
    Number(UnitExp),
    Text,
    Boolean,
    Date(DateTimeKind),
    Tagged {
        name: TypeId,
        args: Vec<TypeExpArg>,
    },
    Tuple(Vec<TypeExp>),
    Record(BTreeMap<String, TypeExp>),
    Array(Box<TypeExp>),
    Function {
        params: Vec<TypeExp>,
        result: Box<TypeExp>,
    },
}

impl TypeExp {
    pub fn number() -> Self {
        TypeExp::Number(UnitExp::scalar())
    }

    pub fn array(element: TypeExp) -> Self {
        TypeExp::Array(Box::new(element))
    }

    pub fn function(params: Vec<TypeExp>, result: TypeExp) -> Self {
        TypeExp::Function {
            params,
            result: Box::new(result),
        }
    }

    pub fn from_data_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Number(unit) => TypeExp::Number(UnitExp::concrete(unit.clone())),
            DataType::Text => TypeExp::Text,
            DataType::Boolean => TypeExp::Boolean,
            DataType::Date(kind) => TypeExp::Date(*kind),
            DataType::Tagged { name, args, .. } => TypeExp::Tagged {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| match arg {
                        TypeArg::Type(t) => TypeExpArg::Type(TypeExp::from_data_type(t)),
                        TypeArg::Unit(u) => TypeExpArg::Unit(UnitExp::concrete(u.clone())),
                    })
                    .collect(),
            },
            DataType::Tuple(members) => {
                TypeExp::Tuple(members.iter().map(TypeExp::from_data_type).collect())
            }
            DataType::Record(fields) => TypeExp::Record(
                fields
                    .iter()
                    .map(|(name, t)| (name.clone(), TypeExp::from_data_type(t)))
                    .collect(),
            ),
            DataType::Array(element) => TypeExp::array(TypeExp::from_data_type(element)),
        }
    }

    /// Short name of the outermost constructor, for mismatch messages.
    pub(crate) fn describe_head(&self) -> String {
        match self {
            TypeExp::Var(_) => "an unknown type".to_string(),
            TypeExp::Number(_) => "Number".to_string(),
            TypeExp::Text => "Text".to_string(),
            TypeExp::Boolean => "Boolean".to_string(),
            TypeExp::Date(kind) => kind.type_name().to_string(),
            TypeExp::Tagged { name, .. } => name.raw().to_string(),
            TypeExp::Tuple(members) => format!("a tuple of {}", members.len()),
            TypeExp::Record(_) => "a record".to_string(),
            TypeExp::Array(_) => "an array".to_string(),
            TypeExp::Function { params, .. } => {
                format!("a function of {} argument(s)", params.len())
            }
        }
    }
}

fn write_list<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl IntoIterator<Item = T>,
) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Type expression syntax, with unresolved variables written as `@typevar t<n>`. Resolve the
/// type through the arena first to show what is currently known.
impl fmt::Display for TypeExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExp::Var(id) => write!(f, "@typevar t{}", id.0),
            TypeExp::Number(unit) if unit == &UnitExp::scalar() => f.write_str("Number"),
            TypeExp::Number(unit) => write!(f, "Number{{{unit}}}"),
            TypeExp::Text => f.write_str("Text"),
            TypeExp::Boolean => f.write_str("Boolean"),
            TypeExp::Date(kind) => f.write_str(kind.type_name()),
            TypeExp::Tagged { name, args } => {
                f.write_str(name.raw())?;
                if args.is_empty() {
                    return Ok(());
                }
                f.write_str("(")?;
                write_list(
                    f,
                    args.iter().map(|arg| match arg {
                        TypeExpArg::Type(t) => t.to_string(),
                        TypeExpArg::Unit(u) => format!("{{{u}}}"),
                    }),
                )?;
                f.write_str(")")
            }
            TypeExp::Tuple(members) => {
                f.write_str("(")?;
                write_list(f, members)?;
                f.write_str(")")
            }
            TypeExp::Record(fields) => {
                f.write_str("(")?;
                write_list(f, fields.iter().map(|(name, t)| format!("{name}: {t}")))?;
                f.write_str(")")
            }
            TypeExp::Array(element) => write!(f, "[{element}]"),
            TypeExp::Function { params, result } => {
                f.write_str("@function(")?;
                write_list(f, params)?;
                write!(f, ") -> {result}")
            }
        }
    }
}
