//! Persistence provider contract and its SQLite implementation.
//!
//! # Responsibility
//! - Define the transactional persistence contract the core consumes.
//! - Isolate SQL text and row decoding from query/mutation orchestration.
//!
//! # Invariants
//! - Providers only execute predicates expressed as [`QueryPlan`]s.
//! - `persist` assigns an identifier to records that have none.
//! - `flush` leaves the in-memory record equal to its stored state.

use crate::db::DbError;
use crate::metadata::RecordMetadata;
use crate::model::record::Record;
use crate::query::builder::{QueryPlan, SortColumn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite_provider;

pub use sqlite_provider::{SqliteProvider, SqliteProviderFactory};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound { type_name: String, id: i64 },
    InvalidData(String),
    Transaction(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { type_name, id } => write!(f, "{type_name} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid record data: {message}"),
            Self::Transaction(message) => write!(f, "transaction misuse: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound { .. } | Self::InvalidData(_) | Self::Transaction(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Row window of a find request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: i64,
    pub limit: i64,
}

/// Predicate plus optional ordering and window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindRequest {
    pub plan: QueryPlan,
    pub sort: Vec<SortColumn>,
    pub page: Option<PageWindow>,
}

impl FindRequest {
    pub fn new(plan: QueryPlan) -> Self {
        Self {
            plan,
            ..Self::default()
        }
    }
}

/// Transactional persistence contract.
///
/// One provider instance serves one operation; it is never shared between
/// concurrent operations.
pub trait PersistenceProvider: Send {
    fn begin(&mut self) -> RepoResult<()>;
    fn commit(&mut self) -> RepoResult<()>;
    fn rollback(&mut self) -> RepoResult<()>;
    fn in_transaction(&self) -> bool;

    fn find(&self, metadata: &RecordMetadata, request: &FindRequest) -> RepoResult<Vec<Record>>;
    fn count(&self, metadata: &RecordMetadata, plan: &QueryPlan) -> RepoResult<i64>;

    /// Inserts or updates `record`, assigning its identifier on insert.
    fn persist(&mut self, metadata: &RecordMetadata, record: &mut Record) -> RepoResult<()>;
    /// Reloads `record` from storage, relations included.
    fn flush(&self, metadata: &RecordMetadata, record: &mut Record) -> RepoResult<()>;
    /// Physically removes `record`.
    fn delete(&mut self, metadata: &RecordMetadata, record: &Record) -> RepoResult<()>;
    /// Physically removes every row matching `plan`; returns the row count.
    fn delete_where(&mut self, metadata: &RecordMetadata, plan: &QueryPlan) -> RepoResult<usize>;

    fn persist_all(&mut self, metadata: &RecordMetadata, records: &mut [Record]) -> RepoResult<()> {
        for record in records.iter_mut() {
            self.persist(metadata, record)?;
        }
        Ok(())
    }

    fn flush_all(&self, metadata: &RecordMetadata, records: &mut [Record]) -> RepoResult<()> {
        for record in records.iter_mut() {
            self.flush(metadata, record)?;
        }
        Ok(())
    }
}

/// Opens one provider per operation.
pub trait ProviderFactory: Send + Sync {
    fn open_provider(&self) -> RepoResult<Box<dyn PersistenceProvider>>;
}

/// Fluent find over a provider: `.sort(..)`, `.page(..)`, then `.list()` or
/// `.first_result()`.
pub struct Cursor<'p> {
    provider: &'p dyn PersistenceProvider,
    metadata: &'p RecordMetadata,
    request: FindRequest,
}

impl<'p> Cursor<'p> {
    pub fn new(
        provider: &'p dyn PersistenceProvider,
        metadata: &'p RecordMetadata,
        plan: QueryPlan,
    ) -> Self {
        Self {
            provider,
            metadata,
            request: FindRequest::new(plan),
        }
    }

    pub fn sort(mut self, sort: Vec<SortColumn>) -> Self {
        self.request.sort = sort;
        self
    }

    pub fn page(mut self, offset: i64, limit: i64) -> Self {
        self.request.page = Some(PageWindow { offset, limit });
        self
    }

    pub fn list(&self) -> RepoResult<Vec<Record>> {
        self.provider.find(self.metadata, &self.request)
    }

    /// First record of the current ordering, if any.
    pub fn first_result(&self) -> RepoResult<Option<Record>> {
        let mut request = self.request.clone();
        let offset = request.page.map_or(0, |page| page.offset);
        request.page = Some(PageWindow { offset, limit: 1 });
        Ok(self.provider.find(self.metadata, &request)?.into_iter().next())
    }
}
