//! Static per-record-type descriptors.
//!
//! # Responsibility
//! - Describe every field of a record type: column, type tag, search
//!   eligibility, ignore policy, transform chain and output visibility.
//! - Prepend the shared base fields (`id`, `deleted`) to every type.
//!
//! # Invariants
//! - Field names are unique within one descriptor.
//! - `id` carries no transform steps and is ignored on input except for
//!   merge-style upserts.
//! - Type, table, field and column names are plain SQL identifiers.
//! - A built [`RecordMetadata`] is immutable.

use crate::metadata::transform::{InputTransform, TransformStep};
use crate::metadata::MetadataError;
use crate::model::method::Method;
use crate::model::record::{DELETED_FIELD, ID_FIELD};
use crate::service::hooks::LifecycleHook;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns whether `value` can be used verbatim as a SQL identifier.
pub fn is_plain_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

/// Declared type tag of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    Boolean,
    /// 32-bit float (stored as 64-bit).
    Float,
    Double,
    /// Closed set of variant names.
    Enum(Vec<String>),
    /// Many-to-one relation; the column stores the target id.
    Record(String),
    /// One-to-many relation mapped by a record field on the target type.
    Collection { target: String, mapped_by: String },
}

impl FieldType {
    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(variants.into_iter().map(Into::into).collect())
    }

    pub fn record(target: impl Into<String>) -> Self {
        Self::Record(target.into())
    }

    pub fn collection(target: impl Into<String>, mapped_by: impl Into<String>) -> Self {
        Self::Collection {
            target: target.into(),
            mapped_by: mapped_by.into(),
        }
    }

    /// Only string-typed fields take part in free-text search.
    pub fn is_searchable(&self) -> bool {
        matches!(self, Self::Text)
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, Self::Record(_) | Self::Collection { .. })
    }

    /// Whether the field owns a storage column.
    pub fn has_column(&self) -> bool {
        !matches!(self, Self::Collection { .. })
    }

    /// Target record type of a relation.
    pub fn relation_target(&self) -> Option<&str> {
        match self {
            Self::Record(target) => Some(target),
            Self::Collection { target, .. } => Some(target),
            _ => None,
        }
    }

    /// SQLite column type used by schema sync.
    pub fn sql_type(&self) -> Option<&'static str> {
        match self {
            Self::Text | Self::Enum(_) => Some("TEXT"),
            Self::Integer | Self::Long | Self::Boolean | Self::Record(_) => Some("INTEGER"),
            Self::Float | Self::Double => Some("REAL"),
            Self::Collection { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Boolean => "boolean",
            Self::Float => "float",
            Self::Double => "double",
            Self::Enum(_) => "enum",
            Self::Record(_) => "record",
            Self::Collection { .. } => "collection",
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record(target) => write!(f, "record<{target}>"),
            Self::Collection { target, .. } => write!(f, "collection<{target}>"),
            other => f.write_str(other.label()),
        }
    }
}

/// Methods for which a field's input is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnorePolicy {
    Never,
    Always,
    OnMethods(BTreeSet<Method>),
}

impl IgnorePolicy {
    pub fn applies_to(&self, method: Method) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::OnMethods(methods) => methods.contains(&method),
        }
    }
}

/// Output visibility of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputRule {
    #[default]
    Visible,
    Hidden,
}

/// Static description of one field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    column: String,
    field_type: FieldType,
    ignore: IgnorePolicy,
    transforms: Vec<TransformStep>,
    output: OutputRule,
}

impl FieldDescriptor {
    /// Creates a visible field whose column equals its name.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            field_type,
            ignore: IgnorePolicy::Never,
            transforms: Vec::new(),
            output: OutputRule::Visible,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn long(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Long)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Double)
    }

    /// Overrides the storage column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn ignore_always(mut self) -> Self {
        self.ignore = IgnorePolicy::Always;
        self
    }

    pub fn ignore_on(mut self, methods: &[Method]) -> Self {
        self.ignore = IgnorePolicy::OnMethods(methods.iter().copied().collect());
        self
    }

    /// Appends a transform step that runs for every method.
    pub fn transform(mut self, transform: InputTransform) -> Self {
        self.transforms.push(TransformStep::always(transform));
        self
    }

    /// Appends a transform step restricted to `methods`.
    pub fn transform_on(mut self, transform: InputTransform, methods: &[Method]) -> Self {
        self.transforms.push(TransformStep::on(transform, methods));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.output = OutputRule::Hidden;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_name(&self) -> &str {
        &self.column
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn is_searchable(&self) -> bool {
        self.field_type.is_searchable()
    }

    pub fn is_ignored_for(&self, method: Method) -> bool {
        self.ignore.applies_to(method)
    }

    /// Transform steps active for `method`, in declaration order.
    pub fn transforms_for(&self, method: Method) -> impl Iterator<Item = &InputTransform> {
        self.transforms
            .iter()
            .filter(move |step| step.applies_to(method))
            .map(TransformStep::transform)
    }

    pub fn transforms(&self) -> &[TransformStep] {
        &self.transforms
    }

    pub fn is_base(&self) -> bool {
        self.name == ID_FIELD || self.name == DELETED_FIELD
    }

    fn id_field() -> Self {
        Self::long(ID_FIELD).ignore_always()
    }

    fn deleted_field() -> Self {
        Self::boolean(DELETED_FIELD)
            .transform(InputTransform::ConstantFalse)
            .ignore_on(&[Method::Put])
    }
}

/// Immutable metadata of one record type.
#[derive(Debug)]
pub struct RecordMetadata {
    type_name: String,
    table: String,
    fields: Vec<FieldDescriptor>,
    hooks: Vec<LifecycleHook>,
}

impl RecordMetadata {
    pub fn builder(type_name: impl Into<String>) -> RecordMetadataBuilder {
        RecordMetadataBuilder::new(type_name)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Every field, base fields first.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn searchable_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| field.is_searchable())
    }

    /// Fields that own a storage column, base fields included.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|field| field.field_type.has_column())
    }

    /// Fields emitted by the projector, in declaration order.
    pub fn output_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|field| field.output == OutputRule::Visible)
    }

    pub fn hooks(&self) -> &[LifecycleHook] {
        &self.hooks
    }
}

/// Builder for [`RecordMetadata`].
pub struct RecordMetadataBuilder {
    type_name: String,
    table: Option<String>,
    fields: Vec<FieldDescriptor>,
    hooks: Vec<LifecycleHook>,
}

impl RecordMetadataBuilder {
    fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table: None,
            fields: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Overrides the table name (defaults to the type name).
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Registers a lifecycle hook; dispatch follows registration order.
    pub fn hook(mut self, hook: LifecycleHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> Result<RecordMetadata, MetadataError> {
        if !is_plain_identifier(&self.type_name) {
            return Err(MetadataError::InvalidIdentifier(self.type_name));
        }
        let table = self.table.unwrap_or_else(|| self.type_name.clone());
        if !is_plain_identifier(&table) {
            return Err(MetadataError::InvalidIdentifier(table));
        }

        let mut fields = vec![FieldDescriptor::id_field(), FieldDescriptor::deleted_field()];
        let mut names: HashSet<String> = fields.iter().map(|f| f.name.clone()).collect();
        let mut columns: HashSet<String> = fields.iter().map(|f| f.column.clone()).collect();

        for field in self.fields {
            if field.is_base() {
                return Err(MetadataError::ReservedField {
                    type_name: self.type_name,
                    field: field.name,
                });
            }
            if !is_plain_identifier(&field.name) {
                return Err(MetadataError::InvalidIdentifier(field.name));
            }
            if !is_plain_identifier(&field.column) {
                return Err(MetadataError::InvalidIdentifier(field.column));
            }
            if !names.insert(field.name.clone()) {
                return Err(MetadataError::DuplicateField {
                    type_name: self.type_name,
                    field: field.name,
                });
            }
            if field.field_type.has_column() && !columns.insert(field.column.clone()) {
                return Err(MetadataError::DuplicateField {
                    type_name: self.type_name,
                    field: field.column,
                });
            }
            fields.push(field);
        }

        Ok(RecordMetadata {
            type_name: self.type_name,
            table,
            fields,
            hooks: self.hooks,
        })
    }
}
