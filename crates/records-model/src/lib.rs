//! `records-model` defines the data side of the Records expression language.
//!
//! It holds everything an expression is checked and evaluated against:
//! - units and the per-document unit registry
//! - data types, tagged type definitions and the tagged type registry
//! - runtime values, their total order, saved text and typed recognisers

mod compare;
mod data_type;
mod error;
pub mod escape;
mod example;
mod ids;
pub mod parse_progress;
mod recognise;
mod type_manager;
mod type_term;
mod unit;
mod value;
mod value_text;

pub use compare::{compare_values, values_equal};
pub use data_type::{
    can_fit_in_one_numeric, DataType, DataTypeVisitor, DateTimeKind, TagType, TypeArg,
};
pub use error::{InternalError, RecordsError, RecordsResult, Span, UserError};
pub use example::example_value;
pub use ids::{is_valid_ident, ColumnId, IdentifierError, TableId, TypeId, RESERVED_WORDS};
pub use parse_progress::{ParseProgress, RecogniseError, RecogniseResult, Success};
pub use recognise::{consume_temporal_text, load_value, recognise_temporal, recognise_value};
pub use type_manager::{
    TaggedTypeDefinition, TypeManager, TypeVariableKind, IS_TAG, NONE_TAG, OPTIONAL_TYPE,
    TYPE_TYPE, UNIT_TYPE,
};
pub use type_term::{TermArg, TypeTerm, UnitTerm};
pub use unit::{Unit, UnitDeclaration, UnitManager};
pub use value::{
    check_index, EagerList, ExplanationLocation, FunctionRef, FunctionValue, ListEx, ListRef,
    LocationRecorder, Number, TaggedValue, TemporalValue, Value,
};
pub use value_text::{display_value, load_cell, save_cell, save_value, LoadedValue, INVALID_MARKER};
