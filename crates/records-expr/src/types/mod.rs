//! Type and unit inference.

mod infer;
mod type_exp;

pub use infer::{InstantiatedVars, TypeArena, TypeConcretisationError, UnifyError};
pub use type_exp::{TypeClass, TypeExp, TypeExpArg, TypeVarId, UnitExp, UnitVarId};
