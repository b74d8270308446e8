//! The standard function library.
//!
//! Every function has a namespace and a signature written with type and unit variables.
//! Each use of a function gets fresh variables, so `abs` works on any unit. An implementation
//! is a plain function over the argument values; it keeps no state between calls.

mod boolean;
mod conversion;
mod datetime;
mod list;
mod math;
mod optional;
mod text;

use std::collections::HashMap;
use std::fmt;

use records_model::{
    DataType, ListRef, LocationRecorder, RecordsError, RecordsResult, TermArg, TypeId,
    TypeManager, TypeTerm, Unit, UnitTerm, Value, OPTIONAL_TYPE,
};

use crate::types::TypeClass;

pub type FunctionImpl = fn(&mut FunctionCall<'_>, Vec<Value>) -> RecordsResult<Value>;

/// Concrete types chosen for a signature's variables at one call site.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeBindings {
    pub types: HashMap<String, DataType>,
    pub units: HashMap<String, Unit>,
}

impl TypeBindings {
    pub fn data_type(&self, var: &str) -> RecordsResult<&DataType> {
        self.types
            .get(var)
            .ok_or_else(|| RecordsError::internal(format!("type variable {var} was not resolved")))
    }

    pub fn unit(&self, var: &str) -> RecordsResult<&Unit> {
        self.units
            .get(var)
            .ok_or_else(|| RecordsError::internal(format!("unit variable {var} was not resolved")))
    }
}

/// Everything an implementation may use besides its arguments.
pub struct FunctionCall<'a> {
    pub types: &'a TypeManager,
    pub bindings: &'a TypeBindings,
    pub locations: &'a mut LocationRecorder,
}

impl FunctionCall<'_> {
    /// Reads element `index`; its source cell, if any, counts towards the explanation.
    pub fn read_item(&mut self, list: &ListRef, index: usize) -> RecordsResult<Value> {
        if self.locations.is_enabled() {
            if let Some(location) = list.location(index) {
                self.locations.record(location);
            }
        }
        list.get(index)
    }

    /// Reads every element of an array value, recording where each came from.
    pub fn read_items(&mut self, list: &Value) -> RecordsResult<Vec<Value>> {
        let list = list.as_list()?;
        (0..list.size()?).map(|index| self.read_item(list, index)).collect()
    }
}

pub struct FunctionDefinition {
    pub namespace: &'static str,
    pub name: &'static str,
    pub params: Vec<TypeTerm>,
    pub result: TypeTerm,
    pub constraints: Vec<(&'static str, TypeClass)>,
    /// Signature variables the implementation reads from [`TypeBindings`]. A call is only
    /// accepted when all of them are resolved.
    pub runtime_vars: Vec<&'static str>,
    pub implementation: FunctionImpl,
}

impl FunctionDefinition {
    pub fn new(
        namespace: &'static str,
        name: &'static str,
        params: Vec<TypeTerm>,
        result: TypeTerm,
        implementation: FunctionImpl,
    ) -> Self {
        Self {
            namespace,
            name,
            params,
            result,
            constraints: Vec::new(),
            runtime_vars: Vec::new(),
            implementation,
        }
    }

    #[must_use]
    pub fn constrain(mut self, var: &'static str, class: TypeClass) -> Self {
        self.constraints.push((var, class));
        self
    }

    #[must_use]
    pub fn needs(mut self, var: &'static str) -> Self {
        self.runtime_vars.push(var);
        self
    }

    pub fn signature(&self) -> TypeTerm {
        TypeTerm::function(self.params.clone(), self.result.clone())
    }

    pub fn qualified_name(&self) -> String {
        format!("{}\\{}", self.namespace, self.name)
    }

    pub fn call(&self, call: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
        if args.len() != self.params.len() {
            return Err(RecordsError::internal(format!(
                "{} expects {} argument(s) but was given {}",
                self.qualified_name(),
                self.params.len(),
                args.len()
            )));
        }
        (self.implementation)(call, args)
    }
}

impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.qualified_name())
            .field("signature", &self.signature().to_string())
            .finish()
    }
}

/// Finds functions by `name` or `namespace\name`.
#[derive(Debug, Default)]
pub struct FunctionLookup {
    functions: Vec<FunctionDefinition>,
    by_name: HashMap<&'static str, usize>,
}

impl FunctionLookup {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut lookup = Self::empty();
        let all = [
            math::definitions(),
            text::definitions(),
            boolean::definitions(),
            list::definitions(),
            optional::definitions(),
            conversion::definitions(),
            datetime::definitions(),
        ];
        for definition in all.into_iter().flatten() {
            if let Err(err) = lookup.register(definition) {
                log::error!("standard function library: {err}");
            }
        }
        lookup
    }

    /// Adds a function. Names must be unique even across namespaces, so that every function
    /// can be called unqualified.
    pub fn register(&mut self, definition: FunctionDefinition) -> RecordsResult<()> {
        if self.by_name.contains_key(definition.name) {
            return Err(RecordsError::user(format!(
                "a function called {} already exists",
                definition.name
            )));
        }
        log::debug!("registering function {}", definition.qualified_name());
        self.by_name.insert(definition.name, self.functions.len());
        self.functions.push(definition);
        Ok(())
    }

    pub fn lookup(&self, namespace: Option<&str>, name: &str) -> Option<&FunctionDefinition> {
        let definition = &self.functions[*self.by_name.get(name)?];
        match namespace {
            Some(namespace) if namespace != definition.namespace => None,
            _ => Some(definition),
        }
    }

    pub fn all_functions(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.functions.iter()
    }
}

/// Fixed-size view of an argument list whose length the checker has already verified.
pub(crate) fn take_args<const N: usize>(args: Vec<Value>) -> RecordsResult<[Value; N]> {
    let count = args.len();
    <[Value; N]>::try_from(args).map_err(|_| {
        RecordsError::internal(format!("expected {N} argument(s) but was given {count}"))
    })
}

pub(crate) fn var(name: &str) -> TypeTerm {
    TypeTerm::var(name)
}

pub(crate) fn number_in(unit_var: &str) -> TypeTerm {
    TypeTerm::number_in(unit_var)
}

pub(crate) fn number_of(unit: &str) -> TypeTerm {
    TypeTerm::Number(UnitTerm::Concrete(Unit::single(unit)))
}

pub(crate) fn list_of(element: TypeTerm) -> TypeTerm {
    TypeTerm::array(element)
}

pub(crate) fn function_of(params: Vec<TypeTerm>, result: TypeTerm) -> TypeTerm {
    TypeTerm::function(params, result)
}

pub(crate) fn optional_of(inner: TypeTerm) -> TypeTerm {
    let name =
        TypeId::new(OPTIONAL_TYPE).unwrap_or_else(|_| unreachable!("builtin type name"));
    TypeTerm::Tagged {
        name,
        args: vec![TermArg::Type(inner)],
    }
}

pub(crate) fn count_value(count: usize) -> RecordsResult<Value> {
    i64::try_from(count)
        .map(Value::from)
        .map_err(|_| RecordsError::user("count is too large"))
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_accepts_plain_and_namespaced_names() {
        let lookup = FunctionLookup::standard();
        assert_eq!(lookup.lookup(None, "abs").unwrap().qualified_name(), "math\\abs");
        assert!(lookup.lookup(Some("math"), "abs").is_some());
        assert!(lookup.lookup(Some("text"), "abs").is_none());
        assert!(lookup.lookup(None, "no_such_function").is_none());
        assert_eq!(lookup.all_functions().count(), 29);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut lookup = FunctionLookup::standard();
        let again = math::definitions().into_iter().next().unwrap();
        assert!(lookup.register(again).is_err());
    }

    #[test]
    fn signatures_display_in_declaration_syntax() {
        let lookup = FunctionLookup::standard();
        let sum = lookup.lookup(None, "sum").unwrap();
        assert_eq!(
            sum.signature().to_string(),
            "@function([Number{@unitvar u}]) -> Number{@unitvar u}"
        );
    }
}
