//! Caller-visible error taxonomy and response mapping.
//!
//! # Responsibility
//! - Classify every failure into one of four kinds with a stable code.
//! - Render message templates with positional `{}` substitution.
//! - Map errors to a status/status-message/body envelope for outer layers.
//!
//! # Invariants
//! - Response bodies carry the causal chain as text, never stack traces.
//! - A classified error keeps its kind when it crosses a transaction
//!   boundary; only unclassified storage failures become `Internal`.

use crate::db::DbError;
use crate::repo::RepoError;
use log::error;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result alias used by every caller-facing core API.
pub type CrudResult<T> = Result<T, CrudError>;

type BoxedSource = Box<dyn Error + Send + Sync + 'static>;

/// Failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed filter, failed coercion, or rejected input.
    BadRequest,
    /// No record for the requested id under the requested scope.
    NotFound,
    /// Transaction failure, storage failure, or broken invariant.
    Internal,
    /// Unimplemented or disabled operation.
    Unavailable,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Internal => 500,
            Self::Unavailable => 503,
        }
    }

    /// Machine-readable classification code.
    pub fn code(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
        }
    }

    pub fn status_message(self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::Internal => "Internal Server Error",
            Self::Unavailable => "Service Unavailable",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Classified error with a message template and optional cause.
///
/// Templates use `{}` placeholders that are filled, in order, by the values
/// attached with [`CrudError::with_arg`]. Surplus values are ignored and
/// missing ones leave the placeholder untouched.
#[derive(Debug)]
pub struct CrudError {
    kind: ErrorKind,
    template: String,
    args: Vec<String>,
    source: Option<BoxedSource>,
}

impl CrudError {
    pub fn new(kind: ErrorKind, template: impl Into<String>) -> Self {
        Self {
            kind,
            template: template.into(),
            args: Vec::new(),
            source: None,
        }
    }

    pub fn bad_request(template: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, template)
    }

    pub fn not_found(template: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, template)
    }

    pub fn internal(template: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, template)
    }

    pub fn unavailable(template: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, template)
    }

    /// Error returned for operations that exist in the contract but are
    /// switched off.
    pub fn unimplemented() -> Self {
        Self::unavailable("Unimplemented method or service invoked!")
    }

    /// Appends one positional substitution value.
    pub fn with_arg(mut self, value: impl Display) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Message with every available placeholder substituted.
    pub fn message(&self) -> String {
        render_template(&self.template, &self.args)
    }

    /// Causal chain, outermost cause first.
    pub fn caused_by(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.source.as_deref().map(|err| err as &(dyn Error + 'static));
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }

    /// Builds the caller-visible envelope and logs the failure server-side.
    pub fn to_response(&self) -> ErrorResponse {
        let message = self.message();
        let caused_by = self.caused_by();
        error!(
            "event=error_response module=error status=error classification={} code={} message={} caused_by={:?}",
            self.kind.code(),
            self.kind.status_code(),
            message,
            caused_by
        );

        ErrorResponse {
            status: self.kind.status_code(),
            status_message: self.kind.status_message().to_string(),
            body: ErrorBody {
                error_code: self.kind.status_code(),
                classification: self.kind,
                error_message: message,
                caused_by,
            },
        }
    }
}

impl Display for CrudError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message())
    }
}

impl Error for CrudError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

impl From<DbError> for CrudError {
    fn from(value: DbError) -> Self {
        Self::internal("storage failure").with_source(value)
    }
}

impl From<RepoError> for CrudError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { type_name, id } => {
                Self::not_found("Entity {} with id {} is not present in the database")
                    .with_arg(type_name)
                    .with_arg(id)
            }
            other => Self::internal("persistence failure").with_source(other),
        }
    }
}

/// Status envelope produced for a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub status_message: String,
    pub body: ErrorBody,
}

/// JSON body of a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: u16,
    pub classification: ErrorKind,
    pub error_message: String,
    pub caused_by: Vec<String>,
}

fn render_template(template: &str, args: &[String]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut remaining = template;
    let mut values = args.iter();

    while let Some(index) = remaining.find("{}") {
        let Some(value) = values.next() else {
            break;
        };
        rendered.push_str(&remaining[..index]);
        rendered.push_str(value);
        remaining = &remaining[index + 2..];
    }
    rendered.push_str(remaining);
    rendered
}
