//! Input transform steps.
//!
//! Each step receives the raw input value (before type coercion) and either
//! substitutes a value or rejects it with `BadRequest`.

use crate::error::{CrudError, CrudResult};
use crate::model::method::Method;
use crate::model::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

type TransformFn = dyn Fn(Value) -> CrudResult<Value> + Send + Sync;

/// Built-in and caller-supplied input transforms.
#[derive(Clone)]
pub enum InputTransform {
    /// Trims surrounding whitespace; null passes through.
    Trim,
    /// Lower-cases and trims an e-mail address; missing or malformed input
    /// is rejected.
    NormalizeEmail,
    /// Always `false`, whatever the input.
    ConstantFalse,
    /// `false` when the input is null.
    DefaultFalse,
    /// Always `0`, whatever the input.
    ConstantZero,
    /// Fresh 32-character hex identifier, whatever the input.
    GeneratedId,
    /// SHA-256 hex digest; blank input is rejected.
    HashSecret,
    Custom { name: String, apply: Arc<TransformFn> },
}

impl InputTransform {
    pub fn custom<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(Value) -> CrudResult<Value> + Send + Sync + 'static,
    {
        Self::Custom {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Trim => "trim",
            Self::NormalizeEmail => "normalize_email",
            Self::ConstantFalse => "constant_false",
            Self::DefaultFalse => "default_false",
            Self::ConstantZero => "constant_zero",
            Self::GeneratedId => "generated_id",
            Self::HashSecret => "hash_secret",
            Self::Custom { name, .. } => name,
        }
    }

    /// Whether the step handles secret material, which must not be logged.
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::HashSecret)
    }

    pub fn apply(&self, value: Value) -> CrudResult<Value> {
        match self {
            Self::Trim => Ok(match value {
                Value::Text(text) => Value::Text(text.trim().to_string()),
                other => other,
            }),
            Self::NormalizeEmail => normalize_email(value),
            Self::ConstantFalse => Ok(Value::Bool(false)),
            Self::DefaultFalse => Ok(if value.is_null() {
                Value::Bool(false)
            } else {
                value
            }),
            Self::ConstantZero => Ok(Value::Int(0)),
            Self::GeneratedId => Ok(Value::Text(Uuid::new_v4().simple().to_string())),
            Self::HashSecret => hash_secret(value),
            Self::Custom { apply, .. } => apply(value),
        }
    }
}

impl Debug for InputTransform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom { name, .. } => write!(f, "Custom({name})"),
            other => f.write_str(other.name()),
        }
    }
}

/// A transform plus the methods it is active for (`None` = every method).
#[derive(Debug, Clone)]
pub struct TransformStep {
    transform: InputTransform,
    methods: Option<BTreeSet<Method>>,
}

impl TransformStep {
    pub fn always(transform: InputTransform) -> Self {
        Self {
            transform,
            methods: None,
        }
    }

    pub fn on(transform: InputTransform, methods: &[Method]) -> Self {
        Self {
            transform,
            methods: Some(methods.iter().copied().collect()),
        }
    }

    pub fn transform(&self) -> &InputTransform {
        &self.transform
    }

    pub fn applies_to(&self, method: Method) -> bool {
        self.methods
            .as_ref()
            .map_or(true, |methods| methods.contains(&method))
    }
}

fn normalize_email(value: Value) -> CrudResult<Value> {
    let Value::Text(mail) = value else {
        return Err(CrudError::bad_request("Invalid Mail"));
    };
    let normalized = mail.trim().to_lowercase();
    if !EMAIL_RE.is_match(&normalized) {
        return Err(CrudError::bad_request("Invalid Mail"));
    }
    Ok(Value::Text(normalized))
}

fn hash_secret(value: Value) -> CrudResult<Value> {
    let secret = match &value {
        Value::Text(text) if !text.trim().is_empty() => text,
        _ => return Err(CrudError::bad_request("Password is empty")),
    };
    let digest = Sha256::digest(secret.as_bytes());
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    Ok(Value::Text(hex))
}

#[cfg(test)]
mod tests {
    use super::{InputTransform, TransformStep};
    use crate::error::{CrudError, ErrorKind};
    use crate::model::method::Method;
    use crate::model::value::Value;

    #[test]
    fn trim_passes_null_through() {
        assert_eq!(
            InputTransform::Trim.apply(Value::from("  ada ")).unwrap(),
            Value::from("ada")
        );
        assert_eq!(InputTransform::Trim.apply(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn email_is_normalized_or_rejected() {
        let normalized = InputTransform::NormalizeEmail
            .apply(Value::from("  Ada@Example.ORG "))
            .unwrap();
        assert_eq!(normalized, Value::from("ada@example.org"));

        let missing = InputTransform::NormalizeEmail.apply(Value::Null).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::BadRequest);
        assert_eq!(missing.message(), "Invalid Mail");

        let malformed = InputTransform::NormalizeEmail
            .apply(Value::from("not-an-address"))
            .unwrap_err();
        assert_eq!(malformed.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn constants_ignore_input() {
        assert_eq!(
            InputTransform::ConstantFalse.apply(Value::Bool(true)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            InputTransform::ConstantZero.apply(Value::Int(9)).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn default_false_only_fills_null() {
        assert_eq!(
            InputTransform::DefaultFalse.apply(Value::Null).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            InputTransform::DefaultFalse.apply(Value::Bool(true)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn generated_id_is_dashless_hex() {
        let Value::Text(id) = InputTransform::GeneratedId.apply(Value::Null).unwrap() else {
            panic!("generated id should be text");
        };
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_secret_digests_and_rejects_blank() {
        let hashed = InputTransform::HashSecret.apply(Value::from("abc")).unwrap();
        assert_eq!(
            hashed,
            Value::from("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );

        let err = InputTransform::HashSecret.apply(Value::from("  ")).unwrap_err();
        assert_eq!(err.message(), "Password is empty");
    }

    #[test]
    fn custom_transform_can_reject() {
        let positive = InputTransform::custom("positive", |value| match value {
            Value::Int(n) if n > 0 => Ok(Value::Int(n)),
            _ => Err(CrudError::bad_request("must be positive")),
        });
        assert_eq!(positive.name(), "positive");
        assert!(positive.apply(Value::Int(-1)).is_err());
    }

    #[test]
    fn step_respects_method_subset() {
        let step = TransformStep::on(InputTransform::Trim, &[Method::Post]);
        assert!(step.applies_to(Method::Post));
        assert!(!step.applies_to(Method::Put));
        assert!(TransformStep::always(InputTransform::Trim).applies_to(Method::Patch));
    }
}
