//! Record-type metadata registry.
//!
//! # Responsibility
//! - Hold one statically declared descriptor per record type.
//! - Answer `describe(type)` for the query, materialize and mutation layers.
//!
//! # Invariants
//! - Descriptors are built once at startup and never mutated afterwards.
//! - Unknown type names resolve to `NotFound`.

use crate::error::CrudError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod coerce;
pub mod descriptor;
pub mod registry;
pub mod transform;

pub use coerce::{coerce_literal, coerce_value};
pub use descriptor::{
    is_plain_identifier, FieldDescriptor, FieldType, IgnorePolicy, OutputRule, RecordMetadata,
    RecordMetadataBuilder,
};
pub use registry::EntityRegistry;
pub use transform::{InputTransform, TransformStep};

/// Descriptor construction and registration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    InvalidIdentifier(String),
    DuplicateField { type_name: String, field: String },
    ReservedField { type_name: String, field: String },
    DuplicateType(String),
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier(name) => write!(f, "`{name}` is not a plain identifier"),
            Self::DuplicateField { type_name, field } => {
                write!(f, "field `{field}` declared twice on `{type_name}`")
            }
            Self::ReservedField { type_name, field } => {
                write!(f, "`{type_name}` redeclares base field `{field}`")
            }
            Self::DuplicateType(name) => write!(f, "record type `{name}` already registered"),
        }
    }
}

impl Error for MetadataError {}

impl From<MetadataError> for CrudError {
    fn from(value: MetadataError) -> Self {
        Self::internal("invalid record metadata").with_source(value)
    }
}
