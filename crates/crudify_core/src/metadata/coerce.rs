//! Type-tagged value coercion.
//!
//! Used both for filter literals (always strings) and for materialized input
//! values after their transform chain ran.

use crate::error::{CrudError, CrudResult};
use crate::metadata::descriptor::{FieldDescriptor, FieldType};
use crate::model::value::Value;

/// Parses a filter literal into the field's declared type.
///
/// # Errors
/// - `BadRequest` when the literal does not parse, names an unknown enum
///   variant, or targets a relation field.
pub fn coerce_literal(field: &FieldDescriptor, literal: &str) -> CrudResult<Value> {
    if field.field_type().is_relation() {
        return Err(CrudError::bad_request("Field {} of type {} cannot be filtered")
            .with_arg(field.name())
            .with_arg(field.field_type()));
    }

    let parsed = match field.field_type() {
        FieldType::Text => Some(Value::Text(literal.to_string())),
        FieldType::Integer => literal.trim().parse::<i32>().ok().map(Value::from),
        FieldType::Long => literal.trim().parse::<i64>().ok().map(Value::Int),
        FieldType::Boolean => parse_bool(literal).map(Value::Bool),
        FieldType::Float => literal
            .trim()
            .parse::<f32>()
            .ok()
            .map(|n| Value::Float(f64::from(n))),
        FieldType::Double => literal.trim().parse::<f64>().ok().map(Value::Float),
        FieldType::Enum(variants) => variants
            .iter()
            .any(|variant| variant == literal.trim())
            .then(|| Value::Text(literal.trim().to_string())),
        FieldType::Record(_) | FieldType::Collection { .. } => None,
    };

    parsed.ok_or_else(|| mismatch(field, literal))
}

/// Coerces a scalar value into the field's declared type.
///
/// Null passes through. Strings are parsed for numeric and boolean fields.
pub fn coerce_value(field: &FieldDescriptor, value: Value) -> CrudResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if let Value::Text(text) = &value {
        if !matches!(field.field_type(), FieldType::Text) {
            return coerce_literal(field, text);
        }
    }

    let coerced = match (field.field_type(), &value) {
        (FieldType::Text, Value::Text(_)) => Some(value.clone()),
        (FieldType::Integer, Value::Int(n)) => i32::try_from(*n).ok().map(Value::from),
        (FieldType::Long, Value::Int(n)) => Some(Value::Int(*n)),
        (FieldType::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
        (FieldType::Float, Value::Int(_) | Value::Float(_)) => value
            .as_f64()
            .map(|n| Value::Float(f64::from(n as f32))),
        (FieldType::Double, Value::Int(_) | Value::Float(_)) => value.as_f64().map(Value::Float),
        _ => None,
    };

    coerced.ok_or_else(|| mismatch(field, &value.to_string()))
}

fn parse_bool(literal: &str) -> Option<bool> {
    match literal.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn mismatch(field: &FieldDescriptor, shown: &str) -> CrudError {
    CrudError::bad_request("Value {} is not a valid {} for field {}")
        .with_arg(shown)
        .with_arg(field.field_type().label())
        .with_arg(field.name())
}
