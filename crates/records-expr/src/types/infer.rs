//! Unification over an arena of type and unit variables.
//!
//! Variables are integer handles into the arena's slots. A slot is either unbound, carrying the
//! type classes its eventual type must satisfy, or bound to a term. Following a chain of
//! bindings compresses it so later lookups are direct.
//!
//! Units form an abelian group, so unit equations are solved with Kennedy's algorithm: the
//! equation `a = b` becomes `a / b = 1` and variables are eliminated one at a time, introducing
//! a fresh variable when no exponent divides the others.

use std::collections::{BTreeSet, HashMap};

use records_model::{DataType, TermArg, TypeArg, TypeManager, TypeTerm, Unit, UnitTerm};

use super::type_exp::{TypeClass, TypeExp, TypeExpArg, TypeVarId, UnitExp, UnitVarId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnifyError {
    #[error("expected {expected} but found {found}")]
    Mismatch { expected: String, found: String },

    #[error("type {var} would have to contain itself: {within}")]
    Occurs { var: String, within: String },

    #[error("expected {expected} argument(s) but found {found}")]
    Arity { expected: usize, found: usize },

    #[error("units do not match: {left} and {right}")]
    Units { left: String, right: String },

    #[error("{found} is not {class}")]
    TypeClass { class: TypeClass, found: String },
}

/// A type that still has unresolved variables, or that cannot be a data type at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TypeConcretisationError {
    pub message: String,
}

impl TypeConcretisationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug)]
enum TypeSlot {
    Unbound(BTreeSet<TypeClass>),
    Bound(TypeExp),
}

/// Fresh variables created for the named variables of one instantiated signature or tagged
/// type.
#[derive(Clone, Debug, Default)]
pub struct InstantiatedVars {
    pub types: HashMap<String, TypeExp>,
    pub units: HashMap<String, UnitExp>,
}

/// The variables of one type check pass. Never shared between passes.
#[derive(Clone, Debug, Default)]
pub struct TypeArena {
    types: Vec<TypeSlot>,
    units: Vec<Option<UnitExp>>,
}

fn to_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> TypeExp {
        self.types.push(TypeSlot::Unbound(BTreeSet::new()));
        TypeExp::Var(TypeVarId(to_u32(self.types.len() - 1)))
    }

    pub fn fresh_with(&mut self, class: TypeClass) -> TypeExp {
        self.types.push(TypeSlot::Unbound(BTreeSet::from([class])));
        TypeExp::Var(TypeVarId(to_u32(self.types.len() - 1)))
    }

    pub fn fresh_unit(&mut self) -> UnitExp {
        UnitExp::var(self.fresh_unit_id())
    }

    fn fresh_unit_id(&mut self) -> UnitVarId {
        self.units.push(None);
        UnitVarId(to_u32(self.units.len() - 1))
    }

    fn type_slot(&self, id: TypeVarId) -> Option<&TypeSlot> {
        self.types.get(id.0 as usize)
    }

    fn set_type_slot(&mut self, id: TypeVarId, slot: TypeSlot) {
        if let Some(existing) = self.types.get_mut(id.0 as usize) {
            *existing = slot;
        }
    }

    fn unit_binding(&self, id: UnitVarId) -> Option<UnitExp> {
        self.units.get(id.0 as usize).cloned().flatten()
    }

    fn set_unit_binding(&mut self, id: UnitVarId, binding: UnitExp) {
        if let Some(slot) = self.units.get_mut(id.0 as usize) {
            *slot = Some(binding);
        }
    }

    /// Follows the bindings of an outermost variable, compressing the chain.
    pub fn shallow(&mut self, ty: &TypeExp) -> TypeExp {
        let TypeExp::Var(id) = ty else {
            return ty.clone();
        };
        match self.type_slot(*id) {
            Some(TypeSlot::Bound(bound)) => {
                let bound = bound.clone();
                let end = self.shallow(&bound);
                self.set_type_slot(*id, TypeSlot::Bound(end.clone()));
                end
            }
            _ => ty.clone(),
        }
    }

    /// Substitutes every bound variable, all the way down.
    pub fn resolve(&mut self, ty: &TypeExp) -> TypeExp {
        match self.shallow(ty) {
            TypeExp::Var(id) => TypeExp::Var(id),
            TypeExp::Number(unit) => TypeExp::Number(self.resolve_unit(&unit)),
            TypeExp::Tagged { name, args } => TypeExp::Tagged {
                name,
                args: args
                    .iter()
                    .map(|arg| match arg {
                        TypeExpArg::Type(t) => TypeExpArg::Type(self.resolve(t)),
                        TypeExpArg::Unit(u) => TypeExpArg::Unit(self.resolve_unit(u)),
                    })
                    .collect(),
            },
            TypeExp::Tuple(members) => {
                TypeExp::Tuple(members.iter().map(|m| self.resolve(m)).collect())
            }
            TypeExp::Record(fields) => TypeExp::Record(
                fields
                    .iter()
                    .map(|(name, t)| (name.clone(), self.resolve(t)))
                    .collect(),
            ),
            TypeExp::Array(element) => TypeExp::array(self.resolve(&element)),
            TypeExp::Function { params, result } => TypeExp::function(
                params.iter().map(|p| self.resolve(p)).collect(),
                self.resolve(&result),
            ),
            other => other,
        }
    }

    pub fn resolve_unit(&mut self, unit: &UnitExp) -> UnitExp {
        let mut out = UnitExp::concrete(unit.base.clone());
        for (id, power) in &unit.vars {
            let factor = match self.unit_binding(*id) {
                Some(binding) => {
                    let resolved = self.resolve_unit(&binding);
                    self.set_unit_binding(*id, resolved.clone());
                    resolved
                }
                None => UnitExp::var(*id),
            };
            out = out.multiply(&factor.raised_to(*power));
        }
        out
    }

    pub fn display(&mut self, ty: &TypeExp) -> String {
        self.resolve(ty).to_string()
    }

    fn mismatch(&mut self, expected: &TypeExp, found: &TypeExp) -> UnifyError {
        UnifyError::Mismatch {
            expected: self.display(expected),
            found: self.display(found),
        }
    }

    /// Makes `expected` and `found` the same type. The names only decide which way round a
    /// mismatch is reported.
    pub fn unify(&mut self, expected: &TypeExp, found: &TypeExp) -> Result<(), UnifyError> {
        let expected = self.shallow(expected);
        let found = self.shallow(found);
        match (expected, found) {
            (TypeExp::Var(x), TypeExp::Var(y)) if x == y => Ok(()),
            (TypeExp::Var(x), other) | (other, TypeExp::Var(x)) => self.bind(x, &other),
            (TypeExp::Number(u), TypeExp::Number(v)) => self.unify_units(&u, &v),
            (TypeExp::Text, TypeExp::Text) | (TypeExp::Boolean, TypeExp::Boolean) => Ok(()),
            (TypeExp::Date(a), TypeExp::Date(b)) if a == b => Ok(()),
            (
                TypeExp::Tagged { name: n1, args: a1 },
                TypeExp::Tagged { name: n2, args: a2 },
            ) if n1 == n2 && a1.len() == a2.len() => {
                for (x, y) in a1.iter().zip(&a2) {
                    match (x, y) {
                        (TypeExpArg::Type(x), TypeExpArg::Type(y)) => self.unify(x, y)?,
                        (TypeExpArg::Unit(x), TypeExpArg::Unit(y)) => self.unify_units(x, y)?,
                        _ => {
                            return Err(self.mismatch(
                                &TypeExp::Tagged {
                                    name: n1.clone(),
                                    args: a1.clone(),
                                },
                                &TypeExp::Tagged {
                                    name: n2.clone(),
                                    args: a2.clone(),
                                },
                            ))
                        }
                    }
                }
                Ok(())
            }
            (TypeExp::Tuple(m1), TypeExp::Tuple(m2)) if m1.len() == m2.len() => {
                for (x, y) in m1.iter().zip(&m2) {
                    self.unify(x, y)?;
                }
                Ok(())
            }
            (TypeExp::Record(f1), TypeExp::Record(f2))
                if f1.len() == f2.len() && f1.keys().eq(f2.keys()) =>
            {
                for (x, y) in f1.values().zip(f2.values()) {
                    self.unify(x, y)?;
                }
                Ok(())
            }
            (TypeExp::Array(x), TypeExp::Array(y)) => self.unify(&x, &y),
            (
                TypeExp::Function {
                    params: p1,
                    result: r1,
                },
                TypeExp::Function {
                    params: p2,
                    result: r2,
                },
            ) => {
                if p1.len() != p2.len() {
                    return Err(UnifyError::Arity {
                        expected: p1.len(),
                        found: p2.len(),
                    });
                }
                for (x, y) in p1.iter().zip(&p2) {
                    self.unify(x, y)?;
                }
                self.unify(&r1, &r2)
            }
            (expected, found) => Err(self.mismatch(&expected, &found)),
        }
    }

    fn bind(&mut self, var: TypeVarId, ty: &TypeExp) -> Result<(), UnifyError> {
        let resolved = self.resolve(ty);
        if occurs(var, &resolved) {
            return Err(UnifyError::Occurs {
                var: TypeExp::Var(var).to_string(),
                within: resolved.to_string(),
            });
        }
        if let Some(TypeSlot::Unbound(classes)) = self.type_slot(var) {
            for class in classes.clone() {
                self.require_class(&resolved, class)?;
            }
        }
        self.set_type_slot(var, TypeSlot::Bound(resolved));
        Ok(())
    }

    /// Checks that `ty` belongs to `class`, recording the constraint on any variables it still
    /// contains.
    pub fn require_class(&mut self, ty: &TypeExp, class: TypeClass) -> Result<(), UnifyError> {
        match self.shallow(ty) {
            TypeExp::Var(id) => {
                if let Some(TypeSlot::Unbound(classes)) = self.type_slot(id) {
                    let mut classes = classes.clone();
                    classes.insert(class);
                    self.set_type_slot(id, TypeSlot::Unbound(classes));
                }
                Ok(())
            }
            TypeExp::Number(_) | TypeExp::Text | TypeExp::Boolean | TypeExp::Date(_) => Ok(()),
            TypeExp::Tagged { args, .. } => {
                for arg in &args {
                    if let TypeExpArg::Type(t) = arg {
                        self.require_class(t, class)?;
                    }
                }
                Ok(())
            }
            TypeExp::Tuple(members) => {
                for member in &members {
                    self.require_class(member, class)?;
                }
                Ok(())
            }
            TypeExp::Record(fields) => {
                for field in fields.values() {
                    self.require_class(field, class)?;
                }
                Ok(())
            }
            TypeExp::Array(element) => self.require_class(&element, class),
            function @ TypeExp::Function { .. } => Err(UnifyError::TypeClass {
                class,
                found: self.display(&function),
            }),
        }
    }

    pub fn unify_units(&mut self, left: &UnitExp, right: &UnitExp) -> Result<(), UnifyError> {
        let left = self.resolve_unit(left);
        let right = self.resolve_unit(right);
        let mut term = left.divide(&right);
        loop {
            let Some((var, power)) = term
                .vars
                .iter()
                .min_by_key(|(_, power)| power.unsigned_abs())
                .map(|(id, power)| (*id, *power))
            else {
                return if term.base.is_scalar() {
                    Ok(())
                } else {
                    Err(UnifyError::Units {
                        left: left.to_string(),
                        right: right.to_string(),
                    })
                };
            };

            let mut rest = term.clone();
            rest.vars.remove(&var);
            let divisible = rest.vars.values().all(|e| e.wrapping_rem(power) == 0)
                && rest.base.factors().all(|(_, e)| e.wrapping_rem(power) == 0);
            if divisible {
                // var^power * rest = 1
                let binding = map_powers(&rest, |e| e.saturating_neg() / power);
                self.bind_unit(var, binding)?;
                return Ok(());
            }
            if rest.vars.is_empty() {
                return Err(UnifyError::Units {
                    left: left.to_string(),
                    right: right.to_string(),
                });
            }
            let fresh = self.fresh_unit();
            let binding = fresh.multiply(&map_powers(&rest, |e| {
                e.checked_div_euclid(power).map_or(i32::MAX, i32::saturating_neg)
            }));
            self.bind_unit(var, binding)?;
            term = self.resolve_unit(&term);
        }
    }

    fn bind_unit(&mut self, var: UnitVarId, binding: UnitExp) -> Result<(), UnifyError> {
        let binding = self.resolve_unit(&binding);
        if binding.vars.contains_key(&var) {
            return Err(UnifyError::Occurs {
                var: UnitExp::var(var).to_string(),
                within: binding.to_string(),
            });
        }
        self.set_unit_binding(var, binding);
        Ok(())
    }

    pub fn concrete_unit(&mut self, unit: &UnitExp) -> Option<Unit> {
        self.resolve_unit(unit).as_concrete().cloned()
    }

    /// Turns a fully inferred type into a data type.
    pub fn to_concrete(
        &mut self,
        ty: &TypeExp,
        types: &TypeManager,
    ) -> Result<DataType, TypeConcretisationError> {
        Ok(match self.shallow(ty) {
            TypeExp::Var(_) => {
                return Err(TypeConcretisationError::new(
                    "cannot work out the type here; add a type annotation with ::",
                ))
            }
            TypeExp::Number(unit) => DataType::Number(self.concrete_unit(&unit).ok_or_else(
                || TypeConcretisationError::new("cannot work out the unit of this number"),
            )?),
            TypeExp::Text => DataType::Text,
            TypeExp::Boolean => DataType::Boolean,
            TypeExp::Date(kind) => DataType::Date(kind),
            TypeExp::Tagged { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| {
                        Ok(match arg {
                            TypeExpArg::Type(t) => TypeArg::Type(self.to_concrete(t, types)?),
                            TypeExpArg::Unit(u) => {
                                TypeArg::Unit(self.concrete_unit(u).ok_or_else(|| {
                                    TypeConcretisationError::new(format!(
                                        "cannot work out the unit argument of {name}"
                                    ))
                                })?)
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, TypeConcretisationError>>()?;
                types
                    .instantiate(&name, &args)
                    .map_err(|err| TypeConcretisationError::new(err.message()))?
            }
            TypeExp::Tuple(members) => DataType::Tuple(
                members
                    .iter()
                    .map(|m| self.to_concrete(m, types))
                    .collect::<Result<_, _>>()?,
            ),
            TypeExp::Record(fields) => DataType::Record(
                fields
                    .iter()
                    .map(|(name, t)| Ok((name.clone(), self.to_concrete(t, types)?)))
                    .collect::<Result<_, TypeConcretisationError>>()?,
            ),
            TypeExp::Array(element) => {
                DataType::Array(Box::new(self.to_concrete(&element, types)?))
            }
            TypeExp::Function { .. } => {
                return Err(TypeConcretisationError::new(
                    "a function is not a value that can be stored; call it with arguments",
                ))
            }
        })
    }

    /// Instantiates a declared term, creating a fresh variable the first time each named
    /// variable is seen.
    pub fn instantiate(&mut self, term: &TypeTerm, vars: &mut InstantiatedVars) -> TypeExp {
        match term {
            TypeTerm::Number(unit) => TypeExp::Number(self.instantiate_unit(unit, vars)),
            TypeTerm::Text => TypeExp::Text,
            TypeTerm::Boolean => TypeExp::Boolean,
            TypeTerm::Date(kind) => TypeExp::Date(*kind),
            TypeTerm::Var(name) => {
                if let Some(existing) = vars.types.get(name) {
                    return existing.clone();
                }
                let fresh = self.fresh();
                vars.types.insert(name.clone(), fresh.clone());
                fresh
            }
            TypeTerm::Tagged { name, args } => TypeExp::Tagged {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| match arg {
                        TermArg::Type(t) => TypeExpArg::Type(self.instantiate(t, vars)),
                        TermArg::Unit(u) => TypeExpArg::Unit(self.instantiate_unit(u, vars)),
                    })
                    .collect(),
            },
            TypeTerm::Tuple(members) => TypeExp::Tuple(
                members
                    .iter()
                    .map(|m| self.instantiate(m, vars))
                    .collect(),
            ),
            TypeTerm::Record(fields) => TypeExp::Record(
                fields
                    .iter()
                    .map(|(name, t)| (name.clone(), self.instantiate(t, vars)))
                    .collect(),
            ),
            TypeTerm::Array(element) => TypeExp::array(self.instantiate(element, vars)),
            TypeTerm::Function { params, result } => TypeExp::function(
                params.iter().map(|p| self.instantiate(p, vars)).collect(),
                self.instantiate(result, vars),
            ),
        }
    }

    fn instantiate_unit(&mut self, unit: &UnitTerm, vars: &mut InstantiatedVars) -> UnitExp {
        match unit {
            UnitTerm::Concrete(unit) => UnitExp::concrete(unit.clone()),
            UnitTerm::Var(name) => {
                if let Some(existing) = vars.units.get(name) {
                    return existing.clone();
                }
                let fresh = self.fresh_unit();
                vars.units.insert(name.clone(), fresh.clone());
                fresh
            }
        }
    }
}

fn map_powers(unit: &UnitExp, f: impl Fn(i32) -> i32) -> UnitExp {
    let mut out = UnitExp::scalar();
    for (name, power) in unit.base.factors() {
        out = out.multiply(&UnitExp::concrete(Unit::single(name).raised_to(f(power))));
    }
    for (id, power) in &unit.vars {
        out = out.multiply(&UnitExp::var(*id).raised_to(f(*power)));
    }
    out
}

fn occurs(var: TypeVarId, ty: &TypeExp) -> bool {
    match ty {
        TypeExp::Var(id) => *id == var,
        TypeExp::Number(_) | TypeExp::Text | TypeExp::Boolean | TypeExp::Date(_) => false,
        TypeExp::Tagged { args, .. } => args.iter().any(|arg| match arg {
            TypeExpArg::Type(t) => occurs(var, t),
            TypeExpArg::Unit(_) => false,
        }),
        TypeExp::Tuple(members) => members.iter().any(|m| occurs(var, m)),
        TypeExp::Record(fields) => fields.values().any(|f| occurs(var, f)),
        TypeExp::Array(element) => occurs(var, element),
        TypeExp::Function { params, result } => {
            params.iter().any(|p| occurs(var, p)) || occurs(var, result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unit(name: &str) -> UnitExp {
        UnitExp::concrete(Unit::single(name))
    }

    #[test]
    fn binds_variables_through_chains() {
        let mut arena = TypeArena::new();
        let a = arena.fresh();
        let b = arena.fresh();
        arena.unify(&a, &b).unwrap();
        arena.unify(&b, &TypeExp::Text).unwrap();
        assert_eq!(arena.resolve(&a), TypeExp::Text);
        let err = arena.unify(&a, &TypeExp::Boolean).unwrap_err();
        assert_eq!(err.to_string(), "expected Text but found Boolean");
    }

    #[test]
    fn occurs_check_rejects_infinite_types() {
        let mut arena = TypeArena::new();
        let a = arena.fresh();
        let err = arena.unify(&a, &TypeExp::array(a.clone())).unwrap_err();
        assert!(matches!(err, UnifyError::Occurs { .. }));
    }

    #[test]
    fn functions_are_not_equatable() {
        let mut arena = TypeArena::new();
        let a = arena.fresh_with(TypeClass::Equatable);
        let function = TypeExp::function(vec![TypeExp::Text], TypeExp::Text);
        let err = arena.unify(&a, &TypeExp::array(function)).unwrap_err();
        assert!(matches!(err, UnifyError::TypeClass { .. }));
        arena.unify(&a, &TypeExp::array(TypeExp::Text)).unwrap();
    }

    #[test]
    fn solves_unit_equations_with_powers() {
        let mut arena = TypeArena::new();
        let u = arena.fresh_unit();
        // u^2 = m^2/s^2
        let m_per_s = unit("m").divide(&unit("s"));
        arena.unify_units(&u.raised_to(2), &m_per_s.raised_to(2)).unwrap();
        assert_eq!(arena.concrete_unit(&u), Some(Unit::single("m").divide(&Unit::single("s"))));

        let v = arena.fresh_unit();
        assert!(arena.unify_units(&v.raised_to(2), &unit("m")).is_err());
    }

    #[test]
    fn introduces_fresh_variables_when_no_power_divides() {
        let mut arena = TypeArena::new();
        let a = arena.fresh_unit();
        let b = arena.fresh_unit();
        // a^2 * b^3 = m^6
        arena
            .unify_units(&a.raised_to(2).multiply(&b.raised_to(3)), &unit("m").raised_to(6))
            .unwrap();
        arena.unify_units(&b, &unit("m").raised_to(2)).unwrap();
        assert_eq!(arena.concrete_unit(&a), Some(Unit::scalar()));
    }

    #[test]
    fn concretisation_needs_every_variable() {
        let types = TypeManager::new();
        let mut arena = TypeArena::new();
        let element = arena.fresh();
        let list = TypeExp::array(element.clone());
        let err = arena.to_concrete(&list, &types).unwrap_err();
        assert!(err.message.contains("type annotation"));
        arena.unify(&element, &TypeExp::Number(unit("m"))).unwrap();
        assert_eq!(
            arena.to_concrete(&list, &types).unwrap(),
            DataType::Array(Box::new(DataType::Number(Unit::single("m"))))
        );
    }
}
