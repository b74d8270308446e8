//! Types that may mention named type and unit variables.
//!
//! Tagged type declarations (`Optional(t) = None | Is(t)`) and function signatures are written
//! with these terms; they become a concrete [`DataType`] once every variable is substituted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::data_type::{write_type_args, DataType, DateTimeKind, TypeArg};
use crate::error::{RecordsError, RecordsResult};
use crate::escape::quoted_if_needed;
use crate::ids::TypeId;
use crate::type_manager::TypeManager;
use crate::unit::Unit;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnitTerm {
    Concrete(Unit),
    Var(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TermArg {
    Type(TypeTerm),
    Unit(UnitTerm),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTerm {
    Number(UnitTerm),
    Text,
    Boolean,
    Date(DateTimeKind),
    Var(String),
    Tagged { name: TypeId, args: Vec<TermArg> },
    Tuple(Vec<TypeTerm>),
    Record(BTreeMap<String, TypeTerm>),
    Array(Box<TypeTerm>),
    /// Only valid in function signatures; tagged declarations reject it.
    Function {
        params: Vec<TypeTerm>,
        result: Box<TypeTerm>,
    },
}

impl TypeTerm {
    pub fn number() -> Self {
        TypeTerm::Number(UnitTerm::Concrete(Unit::scalar()))
    }

    pub fn number_in(unit_var: &str) -> Self {
        TypeTerm::Number(UnitTerm::Var(unit_var.to_string()))
    }

    pub fn var(name: &str) -> Self {
        TypeTerm::Var(name.to_string())
    }

    pub fn array(element: TypeTerm) -> Self {
        TypeTerm::Array(Box::new(element))
    }

    pub fn function(params: Vec<TypeTerm>, result: TypeTerm) -> Self {
        TypeTerm::Function {
            params,
            result: Box::new(result),
        }
    }

    pub fn from_data_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Number(unit) => TypeTerm::Number(UnitTerm::Concrete(unit.clone())),
            DataType::Text => TypeTerm::Text,
            DataType::Boolean => TypeTerm::Boolean,
            DataType::Date(kind) => TypeTerm::Date(*kind),
            DataType::Tagged { name, args, .. } => TypeTerm::Tagged {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| match arg {
                        TypeArg::Type(t) => TermArg::Type(TypeTerm::from_data_type(t)),
                        TypeArg::Unit(u) => TermArg::Unit(UnitTerm::Concrete(u.clone())),
                    })
                    .collect(),
            },
            DataType::Tuple(members) => {
                TypeTerm::Tuple(members.iter().map(TypeTerm::from_data_type).collect())
            }
            DataType::Record(fields) => TypeTerm::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), TypeTerm::from_data_type(v)))
                    .collect(),
            ),
            DataType::Array(element) => TypeTerm::array(TypeTerm::from_data_type(element)),
        }
    }

    /// Replaces every variable with its binding, producing a concrete type.
    pub fn substitute(
        &self,
        types: &HashMap<String, DataType>,
        units: &HashMap<String, Unit>,
        manager: &TypeManager,
    ) -> RecordsResult<DataType> {
        Ok(match self {
            TypeTerm::Number(unit) => DataType::Number(unit.substitute(units)?),
            TypeTerm::Text => DataType::Text,
            TypeTerm::Boolean => DataType::Boolean,
            TypeTerm::Date(kind) => DataType::Date(*kind),
            TypeTerm::Var(name) => types.get(name).cloned().ok_or_else(|| {
                RecordsError::internal(format!("unbound type variable {name}"))
            })?,
            TypeTerm::Tagged { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| {
                        Ok(match arg {
                            TermArg::Type(t) => TypeArg::Type(t.substitute(types, units, manager)?),
                            TermArg::Unit(u) => TypeArg::Unit(u.substitute(units)?),
                        })
                    })
                    .collect::<RecordsResult<Vec<_>>>()?;
                manager.instantiate(name, &args)?
            }
            TypeTerm::Tuple(members) => DataType::Tuple(
                members
                    .iter()
                    .map(|m| m.substitute(types, units, manager))
                    .collect::<RecordsResult<_>>()?,
            ),
            TypeTerm::Record(fields) => DataType::Record(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.substitute(types, units, manager)?)))
                    .collect::<RecordsResult<_>>()?,
            ),
            TypeTerm::Array(element) => {
                DataType::Array(Box::new(element.substitute(types, units, manager)?))
            }
            TypeTerm::Function { .. } => {
                return Err(RecordsError::user(
                    "function types cannot be used as data types",
                ))
            }
        })
    }

    /// Calls `visit` for every tagged type name referenced by this term.
    pub fn visit_tagged_names(&self, visit: &mut dyn FnMut(&TypeId, usize)) {
        match self {
            TypeTerm::Tagged { name, args } => {
                visit(name, args.len());
                for arg in args {
                    if let TermArg::Type(t) = arg {
                        t.visit_tagged_names(visit);
                    }
                }
            }
            TypeTerm::Tuple(members) => members.iter().for_each(|m| m.visit_tagged_names(visit)),
            TypeTerm::Record(fields) => fields.values().for_each(|m| m.visit_tagged_names(visit)),
            TypeTerm::Array(element) => element.visit_tagged_names(visit),
            TypeTerm::Function { params, result } => {
                params.iter().for_each(|p| p.visit_tagged_names(visit));
                result.visit_tagged_names(visit);
            }
            TypeTerm::Number(_)
            | TypeTerm::Text
            | TypeTerm::Boolean
            | TypeTerm::Date(_)
            | TypeTerm::Var(_) => {}
        }
    }

    /// Calls `visit(name, is_unit)` for every variable in this term.
    pub fn visit_vars(&self, visit: &mut dyn FnMut(&str, bool)) {
        match self {
            TypeTerm::Number(UnitTerm::Var(name)) => visit(name, true),
            TypeTerm::Number(UnitTerm::Concrete(_))
            | TypeTerm::Text
            | TypeTerm::Boolean
            | TypeTerm::Date(_) => {}
            TypeTerm::Var(name) => visit(name, false),
            TypeTerm::Tagged { args, .. } => {
                for arg in args {
                    match arg {
                        TermArg::Type(t) => t.visit_vars(visit),
                        TermArg::Unit(UnitTerm::Var(name)) => visit(name, true),
                        TermArg::Unit(UnitTerm::Concrete(_)) => {}
                    }
                }
            }
            TypeTerm::Tuple(members) => members.iter().for_each(|m| m.visit_vars(visit)),
            TypeTerm::Record(fields) => fields.values().for_each(|m| m.visit_vars(visit)),
            TypeTerm::Array(element) => element.visit_vars(visit),
            TypeTerm::Function { params, result } => {
                params.iter().for_each(|p| p.visit_vars(visit));
                result.visit_vars(visit);
            }
        }
    }
}

impl UnitTerm {
    fn substitute(&self, units: &HashMap<String, Unit>) -> RecordsResult<Unit> {
        match self {
            UnitTerm::Concrete(unit) => Ok(unit.clone()),
            UnitTerm::Var(name) => units
                .get(name)
                .cloned()
                .ok_or_else(|| RecordsError::internal(format!("unbound unit variable {name}"))),
        }
    }
}

impl fmt::Display for UnitTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitTerm::Concrete(unit) => write!(f, "{unit}"),
            UnitTerm::Var(name) => write!(f, "@unitvar {name}"),
        }
    }
}

impl fmt::Display for TermArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermArg::Type(t) => write!(f, "{t}"),
            TermArg::Unit(u) => write!(f, "{{{u}}}"),
        }
    }
}

/// Declaration syntax; matches the type expression grammar plus `@typevar`/`@unitvar`.
impl fmt::Display for TypeTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTerm::Number(UnitTerm::Concrete(unit)) if unit.is_scalar() => {
                f.write_str("Number")
            }
            TypeTerm::Number(unit) => write!(f, "Number{{{unit}}}"),
            TypeTerm::Text => f.write_str("Text"),
            TypeTerm::Boolean => f.write_str("Boolean"),
            TypeTerm::Date(kind) => f.write_str(kind.type_name()),
            TypeTerm::Var(name) => write!(f, "@typevar {name}"),
            TypeTerm::Tagged { name, args } => {
                f.write_str(&quoted_if_needed(name.raw()))?;
                write_type_args(f, args)
            }
            TypeTerm::Tuple(members) => {
                f.write_str("(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str(")")
            }
            TypeTerm::Record(fields) => {
                f.write_str("(")?;
                for (i, (field, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {ty}", quoted_if_needed(field))?;
                }
                f.write_str(")")
            }
            TypeTerm::Array(element) => write!(f, "[{element}]"),
            TypeTerm::Function { params, result } => {
                f.write_str("@function(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {result}")
            }
        }
    }
}
