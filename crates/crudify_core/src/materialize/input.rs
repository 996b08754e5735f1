//! Flat JSON input to typed record.
//!
//! # Invariants
//! - Ignored fields are never read from input.
//! - `id` is read only in [`InputMode::Merge`] and never transformed.
//! - A value that is still null after its transforms is left unset.
//! - Collections are read-only and never materialized from input.

use crate::error::{CrudError, CrudResult};
use crate::logging::redact;
use crate::metadata::{coerce_value, FieldDescriptor, FieldType, InputTransform, RecordMetadata};
use crate::model::method::Method;
use crate::model::record::{Record, ID_FIELD};
use crate::model::value::Value;
use log::debug;
use serde_json::{Map, Value as JsonValue};

/// Whether the caller-supplied identifier is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// `id` is ignored; the provider assigns one.
    Create,
    /// `id` is read so existing rows can be matched (upsert).
    Merge,
}

/// Builds a record of `metadata`'s type from a flat input map.
///
/// # Errors
/// - `BadRequest` when a transform rejects a value or a value does not
///   coerce to its field type.
pub fn from_input(
    metadata: &RecordMetadata,
    input: &Map<String, JsonValue>,
    method: Method,
    mode: InputMode,
) -> CrudResult<Record> {
    debug!(
        "event=materialize_input module=materialize status=start type={} method={} keys={:?}",
        metadata.type_name(),
        method,
        input.keys().collect::<Vec<_>>()
    );

    let mut record = Record::new(metadata.type_name());
    for field in metadata.fields() {
        if field.name() == ID_FIELD {
            if mode == InputMode::Merge {
                let id = input.get(ID_FIELD).map_or(Ok(Value::Null), |raw| {
                    coerce_value(field, json_to_value(field, raw)?)
                })?;
                record.set(ID_FIELD, id);
            }
            continue;
        }
        if field.is_ignored_for(method) {
            continue;
        }

        let raw = input.get(field.name()).unwrap_or(&JsonValue::Null);
        let value = match field.field_type() {
            FieldType::Collection { .. } => continue,
            FieldType::Record(target) => relation_reference(field, target, raw)?,
            _ => {
                let mut value = json_to_value(field, raw)?;
                for transform in field.transforms_for(method) {
                    value = transform.apply(value)?;
                }
                coerce_value(field, value)?
            }
        };

        if value.is_null() {
            debug!(
                "event=materialize_input module=materialize status=skipped type={} field={} reason=null",
                metadata.type_name(),
                field.name()
            );
            continue;
        }
        record.set(field.name(), value);
    }

    debug!(
        "event=materialize_input module=materialize status=ok type={} method={} values={}",
        metadata.type_name(),
        method,
        describe_values(metadata, &record, method)
    );
    Ok(record)
}

/// `name=value` pairs of `record`; values produced by a secret transform
/// are redacted.
fn describe_values(metadata: &RecordMetadata, record: &Record, method: Method) -> String {
    record
        .values()
        .map(|(name, value)| {
            let secret = metadata.field(name).is_some_and(|field| {
                field
                    .transforms_for(method)
                    .any(InputTransform::is_secret)
            });
            format!("{name}={}", redact(value, secret))
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn relation_reference(field: &FieldDescriptor, target: &str, raw: &JsonValue) -> CrudResult<Value> {
    let id = match raw {
        JsonValue::Null => return Ok(Value::Null),
        JsonValue::Number(number) => number.as_i64(),
        JsonValue::Object(object) => object.get(ID_FIELD).and_then(JsonValue::as_i64),
        _ => None,
    };
    id.map(|id| Value::from(Record::reference(target, id)))
        .ok_or_else(|| {
            CrudError::bad_request("Field {} expects a {} reference with an id")
                .with_arg(field.name())
                .with_arg(target)
        })
}

fn json_to_value(field: &FieldDescriptor, raw: &JsonValue) -> CrudResult<Value> {
    match raw {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(flag) => Ok(Value::Bool(*flag)),
        JsonValue::Number(number) => Ok(number
            .as_i64()
            .map(Value::Int)
            .or_else(|| number.as_f64().map(Value::Float))
            .unwrap_or(Value::Null)),
        JsonValue::String(text) => Ok(Value::Text(text.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            Err(CrudError::bad_request("Field {} does not accept nested values").with_arg(field.name()))
        }
    }
}
