//! Unit and type expressions as written in source: `unit{m/s^2}`, `type{Optional(Number{m})}`.
//!
//! These keep the written structure so that saving reproduces the input. They become a
//! [`Unit`], [`DataType`] or [`TypeTerm`] once names are looked up.

use std::collections::BTreeMap;

use records_model::{
    DataType, DateTimeKind, RecordsError, RecordsResult, TermArg, TypeArg, TypeId, TypeManager,
    TypeTerm, Unit, UnitManager, UnitTerm,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitExpression {
    /// `1`
    Scalar,
    Single(String),
    /// `@unitvar u`, only meaningful in declarations.
    Var(String),
    Times(Vec<UnitExpression>),
    Divide(Box<UnitExpression>, Box<UnitExpression>),
    Raise(Box<UnitExpression>, i32),
}

fn power_too_large() -> RecordsError {
    RecordsError::user("unit power too large")
}

impl UnitExpression {
    pub fn to_unit(&self, units: &UnitManager) -> RecordsResult<Unit> {
        Ok(match self {
            UnitExpression::Scalar => Unit::scalar(),
            UnitExpression::Single(name) => units.load_use(name)?,
            UnitExpression::Var(name) => {
                return Err(RecordsError::user(format!(
                    "unit variable {name} is not allowed here"
                )))
            }
            UnitExpression::Times(factors) => {
                let mut unit = Unit::scalar();
                for factor in factors {
                    unit = unit
                        .checked_multiply(&factor.to_unit(units)?)
                        .ok_or_else(power_too_large)?;
                }
                unit
            }
            UnitExpression::Divide(num, den) => num
                .to_unit(units)?
                .checked_divide(&den.to_unit(units)?)
                .ok_or_else(power_too_large)?,
            UnitExpression::Raise(base, power) => base
                .to_unit(units)?
                .checked_raised_to(*power)
                .ok_or_else(power_too_large)?,
        })
    }

    /// A unit term for declarations. Unit variables may only appear alone.
    pub fn to_unit_term(&self, units: &UnitManager) -> RecordsResult<UnitTerm> {
        match self {
            UnitExpression::Var(name) => Ok(UnitTerm::Var(name.clone())),
            other => Ok(UnitTerm::Concrete(other.to_unit(units)?)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeExpression {
    /// `Number` or `Number{unit}`.
    Number(Option<UnitExpression>),
    Text,
    Boolean,
    Date(DateTimeKind),
    /// A tagged type, possibly applied: `Optional(Text)`, `Measured({m})`.
    Named {
        name: String,
        args: Vec<TypeExpressionArg>,
    },
    /// `@typevar t`, only meaningful in declarations.
    TypeVar(String),
    Tuple(Vec<TypeExpression>),
    /// Fields in written order.
    Record(Vec<(String, TypeExpression)>),
    Array(Box<TypeExpression>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeExpressionArg {
    Type(TypeExpression),
    Unit(UnitExpression),
}

fn type_id(name: &str) -> RecordsResult<TypeId> {
    TypeId::new(name)
        .map_err(|err| RecordsError::user(format!("invalid type name {name:?}: {err}")))
}

fn record_fields<T>(
    fields: &[(String, TypeExpression)],
    mut convert: impl FnMut(&TypeExpression) -> RecordsResult<T>,
) -> RecordsResult<BTreeMap<String, T>> {
    let mut out = BTreeMap::new();
    for (name, ty) in fields {
        if out.insert(name.clone(), convert(ty)?).is_some() {
            return Err(RecordsError::user(format!("duplicate field: {name}")));
        }
    }
    Ok(out)
}

impl TypeExpression {
    pub fn to_data_type(&self, types: &TypeManager) -> RecordsResult<DataType> {
        Ok(match self {
            TypeExpression::Number(None) => DataType::number(),
            TypeExpression::Number(Some(unit)) => {
                DataType::Number(unit.to_unit(types.unit_manager())?)
            }
            TypeExpression::Text => DataType::Text,
            TypeExpression::Boolean => DataType::Boolean,
            TypeExpression::Date(kind) => DataType::Date(*kind),
            TypeExpression::Named { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| {
                        Ok(match arg {
                            TypeExpressionArg::Type(t) => TypeArg::Type(t.to_data_type(types)?),
                            TypeExpressionArg::Unit(u) => {
                                TypeArg::Unit(u.to_unit(types.unit_manager())?)
                            }
                        })
                    })
                    .collect::<RecordsResult<Vec<_>>>()?;
                types.instantiate(&type_id(name)?, &args)?
            }
            TypeExpression::TypeVar(name) => {
                return Err(RecordsError::user(format!(
                    "type variable {name} is not allowed here"
                )))
            }
            TypeExpression::Tuple(members) => {
                if members.len() < 2 {
                    return Err(RecordsError::user("a tuple needs at least two members"));
                }
                DataType::Tuple(
                    members
                        .iter()
                        .map(|m| m.to_data_type(types))
                        .collect::<RecordsResult<_>>()?,
                )
            }
            TypeExpression::Record(fields) => {
                DataType::Record(record_fields(fields, |t| t.to_data_type(types))?)
            }
            TypeExpression::Array(element) => {
                DataType::Array(Box::new(element.to_data_type(types)?))
            }
        })
    }

    /// A type term for tagged type declarations, where `@typevar`/`@unitvar` are allowed.
    /// Referenced tagged types are only checked for existence when the declaration is
    /// registered.
    pub fn to_type_term(&self, units: &UnitManager) -> RecordsResult<TypeTerm> {
        Ok(match self {
            TypeExpression::Number(None) => TypeTerm::number(),
            TypeExpression::Number(Some(unit)) => TypeTerm::Number(unit.to_unit_term(units)?),
            TypeExpression::Text => TypeTerm::Text,
            TypeExpression::Boolean => TypeTerm::Boolean,
            TypeExpression::Date(kind) => TypeTerm::Date(*kind),
            TypeExpression::Named { name, args } => TypeTerm::Tagged {
                name: type_id(name)?,
                args: args
                    .iter()
                    .map(|arg| {
                        Ok(match arg {
                            TypeExpressionArg::Type(t) => TermArg::Type(t.to_type_term(units)?),
                            TypeExpressionArg::Unit(u) => TermArg::Unit(u.to_unit_term(units)?),
                        })
                    })
                    .collect::<RecordsResult<_>>()?,
            },
            TypeExpression::TypeVar(name) => TypeTerm::Var(name.clone()),
            TypeExpression::Tuple(members) => TypeTerm::Tuple(
                members
                    .iter()
                    .map(|m| m.to_type_term(units))
                    .collect::<RecordsResult<_>>()?,
            ),
            TypeExpression::Record(fields) => {
                TypeTerm::Record(record_fields(fields, |t| t.to_type_term(units))?)
            }
            TypeExpression::Array(element) => TypeTerm::array(element.to_type_term(units)?),
        })
    }

    /// The expression that saves as `data_type`'s canonical text.
    pub fn from_data_type(data_type: &DataType) -> TypeExpression {
        match data_type {
            DataType::Number(unit) if unit.is_scalar() => TypeExpression::Number(None),
            DataType::Number(unit) => TypeExpression::Number(Some(UnitExpression::from_unit(unit))),
            DataType::Text => TypeExpression::Text,
            DataType::Boolean => TypeExpression::Boolean,
            DataType::Date(kind) => TypeExpression::Date(*kind),
            DataType::Tagged { name, args, .. } => TypeExpression::Named {
                name: name.raw().to_string(),
                args: args
                    .iter()
                    .map(|arg| match arg {
                        TypeArg::Type(t) => {
                            TypeExpressionArg::Type(TypeExpression::from_data_type(t))
                        }
                        TypeArg::Unit(u) => TypeExpressionArg::Unit(UnitExpression::from_unit(u)),
                    })
                    .collect(),
            },
            DataType::Tuple(members) => {
                TypeExpression::Tuple(members.iter().map(TypeExpression::from_data_type).collect())
            }
            DataType::Record(fields) => TypeExpression::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), TypeExpression::from_data_type(v)))
                    .collect(),
            ),
            DataType::Array(element) => {
                TypeExpression::Array(Box::new(TypeExpression::from_data_type(element)))
            }
        }
    }
}

impl TypeExpression {
    /// The declaration text for `term`. Function types have no written form.
    pub fn from_type_term(term: &TypeTerm) -> RecordsResult<TypeExpression> {
        Ok(match term {
            TypeTerm::Number(UnitTerm::Concrete(unit)) if unit.is_scalar() => {
                TypeExpression::Number(None)
            }
            TypeTerm::Number(unit) => TypeExpression::Number(Some(UnitExpression::from_term(unit))),
            TypeTerm::Text => TypeExpression::Text,
            TypeTerm::Boolean => TypeExpression::Boolean,
            TypeTerm::Date(kind) => TypeExpression::Date(*kind),
            TypeTerm::Var(name) => TypeExpression::TypeVar(name.clone()),
            TypeTerm::Tagged { name, args } => TypeExpression::Named {
                name: name.raw().to_string(),
                args: args
                    .iter()
                    .map(|arg| {
                        Ok(match arg {
                            TermArg::Type(t) => {
                                TypeExpressionArg::Type(TypeExpression::from_type_term(t)?)
                            }
                            TermArg::Unit(u) => {
                                TypeExpressionArg::Unit(UnitExpression::from_term(u))
                            }
                        })
                    })
                    .collect::<RecordsResult<_>>()?,
            },
            TypeTerm::Tuple(members) => TypeExpression::Tuple(
                members
                    .iter()
                    .map(TypeExpression::from_type_term)
                    .collect::<RecordsResult<_>>()?,
            ),
            TypeTerm::Record(fields) => TypeExpression::Record(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), TypeExpression::from_type_term(v)?)))
                    .collect::<RecordsResult<_>>()?,
            ),
            TypeTerm::Array(element) => {
                TypeExpression::Array(Box::new(TypeExpression::from_type_term(element)?))
            }
            TypeTerm::Function { .. } => {
                return Err(RecordsError::internal("function types cannot be written out"))
            }
        })
    }
}

impl UnitExpression {
    pub fn from_term(unit: &UnitTerm) -> UnitExpression {
        match unit {
            UnitTerm::Concrete(unit) => UnitExpression::from_unit(unit),
            UnitTerm::Var(name) => UnitExpression::Var(name.clone()),
        }
    }

    /// Mirrors `Unit`'s display form: positive powers multiplied, then one `/` denominator.
    pub fn from_unit(unit: &Unit) -> UnitExpression {
        let factor = |name: &str, power: i32| {
            let single = UnitExpression::Single(name.to_string());
            if power == 1 {
                single
            } else {
                UnitExpression::Raise(Box::new(single), power)
            }
        };
        let product = |factors: Vec<UnitExpression>| match factors.len() {
            0 => UnitExpression::Scalar,
            1 => factors.into_iter().next().unwrap_or(UnitExpression::Scalar),
            _ => UnitExpression::Times(factors),
        };
        let numerator: Vec<_> = unit
            .factors()
            .filter(|(_, p)| *p > 0)
            .map(|(n, p)| factor(n, p))
            .collect();
        let denominator: Vec<_> = unit
            .factors()
            .filter(|(_, p)| *p < 0)
            .map(|(n, p)| factor(n, -p))
            .collect();
        if denominator.is_empty() {
            product(numerator)
        } else {
            UnitExpression::Divide(Box::new(product(numerator)), Box::new(product(denominator)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unit_expression_resolves_against_registry() {
        let units = UnitManager::new();
        let accel = UnitExpression::Divide(
            Box::new(UnitExpression::Single("m".to_string())),
            Box::new(UnitExpression::Raise(
                Box::new(UnitExpression::Single("s".to_string())),
                2,
            )),
        );
        let unit = accel.to_unit(&units).unwrap();
        assert_eq!(unit.to_string(), "m/s^2");
        assert_eq!(UnitExpression::from_unit(&unit), accel);

        let unknown = UnitExpression::Single("parsec".to_string());
        assert_eq!(unknown.to_unit(&units).unwrap_err().message(), "unknown unit: parsec");

        let huge = UnitExpression::Raise(
            Box::new(UnitExpression::Raise(
                Box::new(UnitExpression::Single("m".to_string())),
                2,
            )),
            2_000_000_000,
        );
        let err = huge.to_unit(&units).unwrap_err();
        assert_eq!(err.message(), "unit power too large");
        assert!(!err.is_internal());
    }

    #[test]
    fn type_expression_instantiates_tagged_types() {
        let types = TypeManager::new();
        let expr = TypeExpression::Named {
            name: "Optional".to_string(),
            args: vec![TypeExpressionArg::Type(TypeExpression::Number(Some(
                UnitExpression::Single("m".to_string()),
            )))],
        };
        let data_type = expr.to_data_type(&types).unwrap();
        assert_eq!(data_type.to_string(), "Optional(Number{m})");
        assert_eq!(TypeExpression::from_data_type(&data_type), expr);
    }

    #[test]
    fn variables_only_become_terms() {
        let types = TypeManager::new();
        let var = TypeExpression::Array(Box::new(TypeExpression::TypeVar("t".to_string())));
        assert!(var.to_data_type(&types).is_err());
        assert_eq!(
            var.to_type_term(types.unit_manager()).unwrap(),
            TypeTerm::array(TypeTerm::var("t"))
        );
    }
}
