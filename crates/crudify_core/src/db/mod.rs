//! SQLite storage bootstrap and schema synchronization entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the persistence provider.
//! - Derive tables and columns from registered record metadata.
//!
//! # Invariants
//! - Core code must not read/write records before schema sync succeeds.
//! - Every identifier reaching SQL text was validated as a plain identifier.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
pub mod schema;

pub use open::{open_db, open_db_in_memory, open_shared_memory, open_target, StorageTarget};
pub use schema::sync_schema;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    InvalidIdentifier(String),
    UnknownRelation {
        type_name: String,
        field: String,
        target: String,
    },
    InvalidMapping {
        type_name: String,
        field: String,
        target: String,
        mapped_by: String,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidIdentifier(name) => {
                write!(f, "`{name}` cannot be used as a SQL identifier")
            }
            Self::UnknownRelation {
                type_name,
                field,
                target,
            } => write!(
                f,
                "`{type_name}.{field}` points to unregistered record type `{target}`"
            ),
            Self::InvalidMapping {
                type_name,
                field,
                target,
                mapped_by,
            } => write!(
                f,
                "`{type_name}.{field}` is mapped by `{target}.{mapped_by}`, which is not a record field pointing back to `{type_name}`"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::InvalidIdentifier(_) | Self::UnknownRelation { .. } | Self::InvalidMapping { .. } => {
                None
            }
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Quotes a validated identifier for SQL text.
pub(crate) fn quote_ident(name: &str) -> DbResult<String> {
    if crate::metadata::is_plain_identifier(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}
