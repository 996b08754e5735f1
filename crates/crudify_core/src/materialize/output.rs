//! Typed record to nested JSON output.
//!
//! # Invariants
//! - The allow-list filters top-level fields only; an empty list keeps all.
//! - Hidden fields and fields named in the skip set are never emitted, at
//!   any nesting level.
//! - A nested record is omitted when null or when its type is already on
//!   the skip path; collections reset the skip path.
//! - A reference stub is emitted as `{ "id": n }` only.

use crate::error::CrudResult;
use crate::metadata::{EntityRegistry, FieldType};
use crate::model::record::{Record, ID_FIELD};
use crate::model::value::Value;
use serde_json::{json, Map, Number, Value as JsonValue};

/// Output shaping requested by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// Top-level allow-list; empty keeps every visible field.
    pub fields: Vec<String>,
    /// Field names dropped at every nesting level.
    pub skip: Vec<String>,
}

impl Projection {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            skip: Vec::new(),
        }
    }

    /// Adds field names to drop at every nesting level.
    pub fn skipping<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip.extend(names.into_iter().map(Into::into));
        self
    }
}

impl From<Vec<String>> for Projection {
    fn from(fields: Vec<String>) -> Self {
        Self::new(fields)
    }
}

/// Projects `record` into a JSON object.
///
/// `skip_fields` is applied at every level; `skip_types` names record types
/// whose nested occurrences are dropped and is normally empty.
pub fn to_output(
    registry: &EntityRegistry,
    record: &Record,
    allow: &[String],
    skip_fields: &[String],
    skip_types: &[String],
) -> CrudResult<Map<String, JsonValue>> {
    let skipped = |name: &str| skip_fields.iter().any(|skip| skip == name);
    let mut output = Map::new();

    if record.is_stub() {
        if let (Some(id), false) = (record.id(), skipped(ID_FIELD)) {
            output.insert(ID_FIELD.to_string(), JsonValue::from(id));
        }
        return Ok(output);
    }

    let metadata = registry.describe(record.type_name())?;
    for field in metadata.output_fields() {
        if skipped(field.name()) {
            continue;
        }
        if !allow.is_empty() && !allow.iter().any(|name| name == field.name()) {
            continue;
        }

        let value = record.get(field.name());
        match field.field_type() {
            FieldType::Record(target) => {
                let Value::Record(nested) = value else {
                    continue;
                };
                if skip_types.iter().any(|name| name == target) {
                    continue;
                }
                let mut nested_skip = skip_types.to_vec();
                nested_skip.push(metadata.type_name().to_string());
                let nested = to_output(registry, &nested, &[], skip_fields, &nested_skip)?;
                output.insert(field.name().to_string(), JsonValue::Object(nested));
            }
            FieldType::Collection { .. } => {
                let Value::List(children) = value else {
                    continue;
                };
                let items = children
                    .iter()
                    .map(|child| {
                        to_output(registry, child, &[], skip_fields, &[]).map(JsonValue::Object)
                    })
                    .collect::<CrudResult<Vec<_>>>()?;
                output.insert(field.name().to_string(), JsonValue::Array(items));
            }
            _ => {
                output.insert(field.name().to_string(), scalar_to_json(&value));
            }
        }
    }

    Ok(output)
}

/// Projects a list of records.
pub fn to_list_output(
    registry: &EntityRegistry,
    records: &[Record],
    projection: &Projection,
) -> CrudResult<Vec<JsonValue>> {
    records
        .iter()
        .map(|record| {
            to_output(registry, record, &projection.fields, &projection.skip, &[])
                .map(JsonValue::Object)
        })
        .collect()
}

/// Page variant: `{ "data": [...], "pages": N }`.
pub fn to_page_output(
    registry: &EntityRegistry,
    records: &[Record],
    pages: i64,
    projection: &Projection,
) -> CrudResult<JsonValue> {
    let data = to_list_output(registry, records, projection)?;
    Ok(json!({ "data": data, "pages": pages }))
}

fn scalar_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null | Value::Record(_) | Value::List(_) => JsonValue::Null,
        Value::Bool(flag) => JsonValue::Bool(*flag),
        Value::Int(number) => JsonValue::from(*number),
        Value::Float(number) => Number::from_f64(*number).map_or(JsonValue::Null, JsonValue::Number),
        Value::Text(text) => JsonValue::String(text.clone()),
    }
}
