//! What an identifier refers to once local variables have been ruled out.
//!
//! Locals always win. After them come standard functions and then the tags of tagged types.
//! `ns\name` first looks for a function in namespace `ns`, then for tag `name` of type `ns`.

use records_model::escape::quoted_if_needed;
use records_model::{TypeId, TypeManager};

use crate::functions::FunctionLookup;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A variable bound by a lambda, `@define` or pattern, under its scope key.
    Local(String),
    Function {
        namespace: &'static str,
        name: &'static str,
    },
    Tag {
        type_name: TypeId,
        tag_index: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown name: {0}")]
    Unknown(String),

    /// `candidates` holds the qualified spelling for each type that has the tag.
    #[error("{name} is a tag of more than one type; write one of {}", .candidates.join(", "))]
    AmbiguousTag {
        name: String,
        candidates: Vec<String>,
    },
}

/// Looks up a name that is not a local variable.
pub fn resolve_global(
    namespace: Option<&str>,
    name: &str,
    functions: &FunctionLookup,
    types: &TypeManager,
) -> Result<Resolution, ResolveError> {
    if let Some(function) = functions.lookup(namespace, name) {
        return Ok(Resolution::Function {
            namespace: function.namespace,
            name: function.name,
        });
    }
    match namespace {
        Some(namespace) => TypeId::new(namespace)
            .ok()
            .and_then(|id| types.lookup_definition(&id))
            .and_then(|definition| {
                definition.tag_index(name).map(|tag_index| Resolution::Tag {
                    type_name: definition.name.clone(),
                    tag_index,
                })
            })
            .ok_or_else(|| ResolveError::Unknown(format!("{namespace}\\{name}"))),
        None => match types.find_tags(name).as_slice() {
            [] => Err(ResolveError::Unknown(name.to_string())),
            [(definition, tag_index)] => Ok(Resolution::Tag {
                type_name: definition.name.clone(),
                tag_index: *tag_index,
            }),
            several => Err(ResolveError::AmbiguousTag {
                name: name.to_string(),
                candidates: several
                    .iter()
                    .map(|(definition, _)| {
                        format!("{}\\{}", quoted_if_needed(definition.name.raw()), name)
                    })
                    .collect(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use records_model::{TagType, TypeTerm};

    fn types_with_shared_tag() -> TypeManager {
        let mut types = TypeManager::new();
        for name in ["Colour", "Light"] {
            types
                .register_tagged_type(
                    TypeId::new(name).unwrap(),
                    Vec::new(),
                    vec![TagType::new("Red", None), TagType::new("Other", Some(TypeTerm::Text))],
                )
                .unwrap();
        }
        types
    }

    #[test]
    fn functions_come_before_tags() {
        let types = TypeManager::new();
        let functions = FunctionLookup::standard();
        assert_eq!(
            resolve_global(None, "abs", &functions, &types).unwrap(),
            Resolution::Function {
                namespace: "math",
                name: "abs"
            }
        );
        assert_eq!(
            resolve_global(None, "Is", &functions, &types).unwrap(),
            Resolution::Tag {
                type_name: TypeId::new("Optional").unwrap(),
                tag_index: 1
            }
        );
        assert_eq!(
            resolve_global(Some("math"), "Is", &functions, &types).unwrap_err(),
            ResolveError::Unknown("math\\Is".to_string())
        );
    }

    #[test]
    fn shared_tags_need_a_type_name() {
        let types = types_with_shared_tag();
        let functions = FunctionLookup::standard();
        let err = resolve_global(None, "Red", &functions, &types).unwrap_err();
        assert_eq!(
            err,
            ResolveError::AmbiguousTag {
                name: "Red".to_string(),
                candidates: vec!["Colour\\Red".to_string(), "Light\\Red".to_string()],
            }
        );
        assert_eq!(
            resolve_global(Some("Light"), "Red", &functions, &types).unwrap(),
            Resolution::Tag {
                type_name: TypeId::new("Light").unwrap(),
                tag_index: 0
            }
        );
    }
}
