//! Registry of tagged types for one document.
//!
//! Registration happens while a document loads or through explicit user action; lookups
//! afterwards only need `&TypeManager`, so a manager behind an `Arc` can be shared by readers.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::data_type::{DataType, TagType, TypeArg};
use crate::error::{RecordsError, RecordsResult};
use crate::ids::{is_valid_ident, TypeId};
use crate::type_term::{TermArg, TypeTerm, UnitTerm};
use crate::unit::{Unit, UnitManager};

pub const OPTIONAL_TYPE: &str = "Optional";
pub const NONE_TAG: &str = "None";
pub const IS_TAG: &str = "Is";
pub const TYPE_TYPE: &str = "Type";
pub const UNIT_TYPE: &str = "Unit";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeVariableKind {
    Type,
    Unit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedTypeDefinition {
    pub name: TypeId,
    pub type_vars: Vec<(TypeVariableKind, String)>,
    pub tags: Vec<TagType<TypeTerm>>,
}

impl TaggedTypeDefinition {
    pub fn tag_index(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|t| t.name == tag)
    }

    /// The defined type applied to its own variables, e.g. `Optional(@typevar t)`.
    pub fn self_term(&self) -> TypeTerm {
        TypeTerm::Tagged {
            name: self.name.clone(),
            args: self
                .type_vars
                .iter()
                .map(|(kind, name)| match kind {
                    TypeVariableKind::Type => TermArg::Type(TypeTerm::Var(name.clone())),
                    TypeVariableKind::Unit => TermArg::Unit(UnitTerm::Var(name.clone())),
                })
                .collect(),
        }
    }

    fn instantiate(&self, args: &[TypeArg], manager: &TypeManager) -> RecordsResult<DataType> {
        if args.len() != self.type_vars.len() {
            return Err(RecordsError::user(format!(
                "type {} expects {} argument(s) but was given {}",
                self.name,
                self.type_vars.len(),
                args.len()
            )));
        }
        let mut types = HashMap::new();
        let mut units = HashMap::new();
        for ((kind, var), arg) in self.type_vars.iter().zip(args) {
            match (kind, arg) {
                (TypeVariableKind::Type, TypeArg::Type(t)) => {
                    types.insert(var.clone(), t.clone());
                }
                (TypeVariableKind::Unit, TypeArg::Unit(u)) => {
                    units.insert(var.clone(), u.clone());
                }
                _ => {
                    return Err(RecordsError::user(format!(
                        "argument {var} of type {} has the wrong kind",
                        self.name
                    )))
                }
            }
        }
        let tags = self
            .tags
            .iter()
            .map(|tag| {
                let inner = match &tag.inner {
                    Some(term) => Some(term.substitute(&types, &units, manager)?),
                    None => None,
                };
                Ok(TagType::new(tag.name.clone(), inner))
            })
            .collect::<RecordsResult<Vec<_>>>()?;
        Ok(DataType::Tagged {
            name: self.name.clone(),
            args: args.to_vec(),
            tags,
        })
    }
}

#[derive(Clone, Debug)]
pub struct TypeManager {
    units: UnitManager,
    tagged: BTreeMap<TypeId, TaggedTypeDefinition>,
    builtin: Vec<TypeId>,
}

impl Default for TypeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeManager {
    pub fn new() -> Self {
        Self::with_units(UnitManager::new())
    }

    pub fn with_units(units: UnitManager) -> Self {
        let mut manager = Self {
            units,
            tagged: BTreeMap::new(),
            builtin: Vec::new(),
        };
        for definition in builtin_types() {
            manager.builtin.push(definition.name.clone());
            manager.tagged.insert(definition.name.clone(), definition);
        }
        manager
    }

    pub fn unit_manager(&self) -> &UnitManager {
        &self.units
    }

    pub fn unit_manager_mut(&mut self) -> &mut UnitManager {
        &mut self.units
    }

    pub fn lookup_definition(&self, name: &TypeId) -> Option<&TaggedTypeDefinition> {
        self.tagged.get(name)
    }

    pub fn lookup_definition_str(&self, name: &str) -> Option<&TaggedTypeDefinition> {
        TypeId::new(name).ok().and_then(|id| self.tagged.get(&id))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &TaggedTypeDefinition> {
        self.tagged.values()
    }

    pub fn is_builtin(&self, name: &TypeId) -> bool {
        self.builtin.contains(name)
    }

    /// User-registered definitions, in name order.
    pub fn user_definitions(&self) -> impl Iterator<Item = &TaggedTypeDefinition> {
        self.tagged.values().filter(|def| !self.is_builtin(&def.name))
    }

    /// Concrete type for `name` applied to `args`, or `None` if the name is unknown or the
    /// arguments do not match its type variables.
    pub fn lookup_type(&self, name: &TypeId, args: &[TypeArg]) -> Option<DataType> {
        self.instantiate(name, args).ok()
    }

    pub fn instantiate(&self, name: &TypeId, args: &[TypeArg]) -> RecordsResult<DataType> {
        let definition = self
            .tagged
            .get(name)
            .ok_or_else(|| RecordsError::user(format!("unknown type: {name}")))?;
        definition.instantiate(args, self)
    }

    pub fn register_tagged_type(
        &mut self,
        name: TypeId,
        type_vars: Vec<(TypeVariableKind, String)>,
        tags: Vec<TagType<TypeTerm>>,
    ) -> RecordsResult<&TaggedTypeDefinition> {
        let definition = TaggedTypeDefinition {
            name: name.clone(),
            type_vars,
            tags,
        };
        match self.tagged.get(&name) {
            Some(existing) if *existing != definition => {
                return Err(RecordsError::user(format!(
                    "type {name} is already defined differently"
                )));
            }
            Some(_) => {}
            None => {
                self.validate(&definition)?;
                log::debug!(
                    "registering tagged type {} with {} tag(s)",
                    definition.name,
                    definition.tags.len()
                );
                self.tagged.insert(name.clone(), definition);
            }
        }
        self.tagged
            .get(&name)
            .ok_or_else(|| RecordsError::internal(format!("type {name} was not registered")))
    }

    fn validate(&self, definition: &TaggedTypeDefinition) -> RecordsResult<()> {
        let name = &definition.name;
        if definition.tags.is_empty() {
            return Err(RecordsError::user(format!("type {name} must have at least one tag")));
        }

        let mut declared: HashMap<&str, TypeVariableKind> = HashMap::new();
        for (kind, var) in &definition.type_vars {
            if !is_valid_ident(var) {
                return Err(RecordsError::user(format!("invalid type variable name: {var:?}")));
            }
            if declared.insert(var.as_str(), *kind).is_some() {
                return Err(RecordsError::user(format!(
                    "type variable {var} is declared twice in {name}"
                )));
            }
        }

        let mut seen_tags = HashSet::new();
        for tag in &definition.tags {
            if !is_valid_ident(&tag.name) {
                return Err(RecordsError::user(format!("invalid tag name: {:?}", tag.name)));
            }
            if !seen_tags.insert(tag.name.as_str()) {
                return Err(RecordsError::user(format!(
                    "tag {} appears twice in {name}",
                    tag.name
                )));
            }
            let Some(inner) = &tag.inner else {
                continue;
            };

            let mut problem = None;
            inner.visit_vars(&mut |var, is_unit| {
                let expected = if is_unit {
                    TypeVariableKind::Unit
                } else {
                    TypeVariableKind::Type
                };
                match declared.get(var) {
                    Some(kind) if *kind == expected => {}
                    Some(_) => {
                        problem.get_or_insert_with(|| {
                            format!("variable {var} used with the wrong kind")
                        });
                    }
                    None => {
                        problem.get_or_insert_with(|| format!("undeclared type variable {var}"));
                    }
                }
            });
            inner.visit_tagged_names(&mut |referenced, arity| {
                if referenced == name {
                    problem.get_or_insert_with(|| format!("type {name} cannot refer to itself"));
                    return;
                }
                match self.tagged.get(referenced) {
                    Some(def) if def.type_vars.len() == arity => {}
                    Some(def) => {
                        problem.get_or_insert_with(|| {
                            format!(
                                "type {referenced} expects {} argument(s) but was given {arity}",
                                def.type_vars.len()
                            )
                        });
                    }
                    None => {
                        problem.get_or_insert_with(|| format!("unknown type: {referenced}"));
                    }
                }
            });
            if contains_function(inner) {
                problem.get_or_insert_with(|| "tags cannot contain function types".to_string());
            }
            if let Some(message) = problem {
                return Err(RecordsError::user(message));
            }
        }
        Ok(())
    }

    /// Every (definition, tag index) whose tag is called `tag`.
    pub fn find_tags(&self, tag: &str) -> Vec<(&TaggedTypeDefinition, usize)> {
        self.tagged
            .values()
            .filter_map(|def| def.tag_index(tag).map(|index| (def, index)))
            .collect()
    }

    pub fn optional_type(&self, inner: DataType) -> RecordsResult<DataType> {
        self.instantiate(&builtin_id(OPTIONAL_TYPE)?, &[TypeArg::Type(inner)])
    }

    pub fn type_type(&self, of: DataType) -> RecordsResult<DataType> {
        self.instantiate(&builtin_id(TYPE_TYPE)?, &[TypeArg::Type(of)])
    }

    pub fn unit_type(&self, of: Unit) -> RecordsResult<DataType> {
        self.instantiate(&builtin_id(UNIT_TYPE)?, &[TypeArg::Unit(of)])
    }
}

fn builtin_id(name: &str) -> RecordsResult<TypeId> {
    TypeId::new(name).map_err(|err| RecordsError::internal(format!("builtin type {name}: {err}")))
}

fn contains_function(term: &TypeTerm) -> bool {
    match term {
        TypeTerm::Function { .. } => true,
        TypeTerm::Tagged { args, .. } => args.iter().any(|arg| match arg {
            TermArg::Type(t) => contains_function(t),
            TermArg::Unit(_) => false,
        }),
        TypeTerm::Tuple(members) => members.iter().any(contains_function),
        TypeTerm::Record(fields) => fields.values().any(contains_function),
        TypeTerm::Array(element) => contains_function(element),
        TypeTerm::Number(_)
        | TypeTerm::Text
        | TypeTerm::Boolean
        | TypeTerm::Date(_)
        | TypeTerm::Var(_) => false,
    }
}

fn builtin_types() -> Vec<TaggedTypeDefinition> {
    let id = |name: &str| TypeId::new(name).unwrap_or_else(|_| unreachable!("builtin type name"));
    vec![
        TaggedTypeDefinition {
            name: id(OPTIONAL_TYPE),
            type_vars: vec![(TypeVariableKind::Type, "t".to_string())],
            tags: vec![
                TagType::new(NONE_TAG, None),
                TagType::new(IS_TAG, Some(TypeTerm::var("t"))),
            ],
        },
        TaggedTypeDefinition {
            name: id(TYPE_TYPE),
            type_vars: vec![(TypeVariableKind::Type, "t".to_string())],
            tags: vec![TagType::new(TYPE_TYPE, None)],
        },
        TaggedTypeDefinition {
            name: id(UNIT_TYPE),
            type_vars: vec![(TypeVariableKind::Unit, "u".to_string())],
            tags: vec![TagType::new(UNIT_TYPE, None)],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::can_fit_in_one_numeric;
    use pretty_assertions::assert_eq;

    fn id(name: &str) -> TypeId {
        TypeId::new(name).unwrap()
    }

    #[test]
    fn optional_instantiates_with_inner_type() {
        let types = TypeManager::new();
        let optional = types.optional_type(DataType::Text).unwrap();
        let DataType::Tagged { tags, args, .. } = &optional else {
            panic!("expected tagged type, got {optional:?}");
        };
        assert_eq!(args, &vec![TypeArg::Type(DataType::Text)]);
        assert_eq!(
            tags,
            &vec![
                TagType::new(NONE_TAG, None),
                TagType::new(IS_TAG, Some(DataType::Text))
            ]
        );
        assert_eq!(optional.to_string(), "Optional(Text)");
    }

    #[test]
    fn registers_numeric_enumeration() {
        let mut types = TypeManager::new();
        types
            .register_tagged_type(
                id("C"),
                Vec::new(),
                vec![
                    TagType::new("Blank", None),
                    TagType::new("Num", Some(TypeTerm::number())),
                ],
            )
            .unwrap();
        let Some(DataType::Tagged { tags, .. }) = types.lookup_type(&id("C"), &[]) else {
            panic!("C should be registered");
        };
        assert!(can_fit_in_one_numeric(&tags));
        assert_eq!(types.user_definitions().count(), 1);
        assert_eq!(types.find_tags("Num").len(), 1);
    }

    #[test]
    fn identical_re_registration_is_idempotent() {
        let mut types = TypeManager::new();
        let tags = vec![TagType::new("A", None)];
        types.register_tagged_type(id("T"), Vec::new(), tags.clone()).unwrap();
        types.register_tagged_type(id("T"), Vec::new(), tags).unwrap();
        let err = types
            .register_tagged_type(id("T"), Vec::new(), vec![TagType::new("B", None)])
            .unwrap_err();
        assert!(err.message().contains("already defined"));
    }

    #[test]
    fn rejects_invalid_definitions() {
        let mut types = TypeManager::new();
        let cases: Vec<(Vec<(TypeVariableKind, String)>, Vec<TagType<TypeTerm>>, &str)> = vec![
            (Vec::new(), Vec::new(), "at least one tag"),
            (
                Vec::new(),
                vec![TagType::new("A", None), TagType::new("A", None)],
                "appears twice",
            ),
            (
                Vec::new(),
                vec![TagType::new("A", Some(TypeTerm::var("t")))],
                "undeclared type variable t",
            ),
            (
                vec![(TypeVariableKind::Unit, "u".to_string())],
                vec![TagType::new("A", Some(TypeTerm::var("u")))],
                "wrong kind",
            ),
            (
                Vec::new(),
                vec![TagType::new(
                    "A",
                    Some(TypeTerm::Tagged {
                        name: id("Bad"),
                        args: Vec::new(),
                    }),
                )],
                "refer to itself",
            ),
        ];
        for (vars, tags, expected) in cases {
            let err = types
                .register_tagged_type(id("Bad"), vars, tags)
                .unwrap_err();
            assert!(
                err.message().contains(expected),
                "{:?} should mention {expected:?}",
                err.message()
            );
        }
        assert!(types.lookup_definition(&id("Bad")).is_none());
    }

    #[test]
    fn nested_user_types_substitute_arguments() {
        let mut types = TypeManager::new();
        types
            .register_tagged_type(
                id("Measured"),
                vec![(TypeVariableKind::Unit, "u".to_string())],
                vec![
                    TagType::new("Unknown", None),
                    TagType::new("Known", Some(TypeTerm::number_in("u"))),
                ],
            )
            .unwrap();
        let ty = types
            .instantiate(&id("Measured"), &[TypeArg::Unit(Unit::single("m"))])
            .unwrap();
        assert_eq!(ty.to_string(), "Measured({m})");
        let DataType::Tagged { tags, .. } = ty else {
            unreachable!()
        };
        assert_eq!(tags[1].inner, Some(DataType::Number(Unit::single("m"))));

        assert!(types.instantiate(&id("Measured"), &[]).is_err());
        assert!(types.lookup_type(&id("Nope"), &[]).is_none());
    }
}
