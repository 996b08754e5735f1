//! Generic persistence and query engine for statically described record
//! types.
//!
//! Record types are declared once as [`RecordMetadata`] and registered in an
//! [`EntityRegistry`]. Every call then runs as its own operation with an
//! explicit [`ExecutionContext`], through the query builder or the
//! transactional mutation pipeline, and comes back as projected JSON.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod materialize;
pub mod metadata;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CrudConfig};
pub use context::{ContextStore, ExecutionContext, Operation, OperationId, WorkerPool};
pub use error::{CrudError, CrudResult, ErrorBody, ErrorKind, ErrorResponse};
pub use logging::{
    default_log_level, init_from_config, init_logging, logging_status, with_operation, LogSettings,
};
pub use metadata::{
    EntityRegistry, FieldDescriptor, FieldType, InputTransform, OutputRule, RecordMetadata,
};
pub use materialize::Projection;
pub use model::method::Method;
pub use model::record::Record;
pub use model::value::Value;
pub use query::{FilterExpr, Operator, QueryCriteria, QueryPlan, Scope, SortSpec};
pub use repo::{PersistenceProvider, ProviderFactory, RepoError, RepoResult, SqliteProviderFactory};
pub use service::{CrudService, EntityManager, HookContext, LifecycleHook, Phase, TransactionState};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
