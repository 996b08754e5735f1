//! Operation-scoped CRUD facade.
//!
//! # Responsibility
//! - Give every call its own operation (context + worker pool).
//! - Run the work on that pool and project the result to JSON.
//!
//! # Invariants
//! - The operation is ended on every path, success or failure.
//! - Unknown record types fail before an operation is allocated.

use crate::config::CrudConfig;
use crate::context::{ContextStore, ExecutionContext};
use crate::error::{CrudError, CrudResult};
use crate::materialize::{to_list_output, to_output, to_page_output, Projection};
use crate::metadata::EntityRegistry;
use crate::model::method::Method;
use crate::model::record::Record;
use crate::query::{QueryCriteria, Scope};
use crate::repo::{ProviderFactory, SqliteProviderFactory};
use crate::service::mutation::EntityManager;
use log::debug;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

/// Entry point used by outer layers for every record type.
pub struct CrudService {
    registry: Arc<EntityRegistry>,
    store: Arc<ContextStore>,
    config: CrudConfig,
}

impl CrudService {
    pub fn new(
        registry: Arc<EntityRegistry>,
        factory: Arc<dyn ProviderFactory>,
        config: CrudConfig,
    ) -> Self {
        let store = ContextStore::new(factory, config.pool_size);
        Self {
            registry,
            store,
            config,
        }
    }

    /// Opens the database named by `config.db_path`, or an isolated
    /// in-memory database when unset, and synchronizes its schema.
    pub fn open(registry: EntityRegistry, config: CrudConfig) -> CrudResult<Self> {
        let registry = Arc::new(registry);
        let factory = match &config.db_path {
            Some(path) => SqliteProviderFactory::file(path.clone(), Arc::clone(&registry))?,
            None => SqliteProviderFactory::in_memory(Arc::clone(&registry))?,
        };
        Ok(Self::new(registry, Arc::new(factory), config))
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CrudConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Criteria preset with the configured page size.
    pub fn criteria(&self) -> QueryCriteria {
        QueryCriteria::new().page(0, self.config.default_page_size)
    }

    /// Paged search; returns `{ "data": [...], "pages": N }`.
    pub fn query(
        &self,
        type_name: &str,
        criteria: QueryCriteria,
        projection: impl Into<Projection>,
    ) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        self.within(Method::Get, projection.into(), move |ctx| {
            let manager = EntityManager::new(&registry, ctx, &type_name)?;
            let page = manager.query(&criteria)?;
            to_page_output(&registry, &page.records, page.pages, ctx.projection())
        })
    }

    pub fn count(&self, type_name: &str, criteria: QueryCriteria) -> CrudResult<i64> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        self.within(Method::Get, Projection::default(), move |ctx| {
            EntityManager::new(&registry, ctx, &type_name)?.count(&criteria)
        })
    }

    pub fn count_pages(&self, type_name: &str, criteria: QueryCriteria) -> CrudResult<i64> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        self.within(Method::Get, Projection::default(), move |ctx| {
            EntityManager::new(&registry, ctx, &type_name)?.count_pages(&criteria)
        })
    }

    pub fn find_one(
        &self,
        type_name: &str,
        id: i64,
        scope: Scope,
        projection: impl Into<Projection>,
    ) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        self.within(Method::Get, projection.into(), move |ctx| {
            let record = EntityManager::new(&registry, ctx, &type_name)?.find_by_id(id, scope)?;
            project(&registry, ctx, &record)
        })
    }

    pub fn save(&self, type_name: &str, body: &JsonValue, projection: impl Into<Projection>) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        let input = object_body(body)?;
        self.within(Method::Post, projection.into(), move |ctx| {
            let record = EntityManager::new(&registry, ctx, &type_name)?.save(&input)?;
            project(&registry, ctx, &record)
        })
    }

    /// Saves every object of a JSON array in one transaction.
    pub fn save_all(&self, type_name: &str, body: &JsonValue, projection: impl Into<Projection>) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        let inputs = array_body(body)?;
        self.within(Method::Post, projection.into(), move |ctx| {
            let records = EntityManager::new(&registry, ctx, &type_name)?.save_all(&inputs)?;
            Ok(JsonValue::Array(to_list_output(&registry, &records, ctx.projection())?))
        })
    }

    pub fn update(
        &self,
        type_name: &str,
        id: i64,
        body: &JsonValue,
        projection: impl Into<Projection>,
    ) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        let input = object_body(body)?;
        self.within(Method::Put, projection.into(), move |ctx| {
            let record = EntityManager::new(&registry, ctx, &type_name)?.update(id, &input)?;
            project(&registry, ctx, &record)
        })
    }

    /// Replaces the stored fields of `id` with `body`; absent or null
    /// fields are written as null.
    pub fn raw_update(
        &self,
        type_name: &str,
        id: i64,
        body: &JsonValue,
        projection: impl Into<Projection>,
    ) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        let input = object_body(body)?;
        self.within(Method::Put, projection.into(), move |ctx| {
            let record = EntityManager::new(&registry, ctx, &type_name)?.raw_update(id, &input)?;
            project(&registry, ctx, &record)
        })
    }

    /// Upserts a JSON array; objects with an `id` are merged, others inserted.
    pub fn merge(&self, type_name: &str, body: &JsonValue, projection: impl Into<Projection>) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        let inputs = array_body(body)?;
        self.within(Method::Patch, projection.into(), move |ctx| {
            let records = EntityManager::new(&registry, ctx, &type_name)?.merge(&inputs)?;
            Ok(JsonValue::Array(to_list_output(&registry, &records, ctx.projection())?))
        })
    }

    pub fn soft_delete(&self, type_name: &str, id: i64) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        self.within(Method::Delete, Projection::default(), move |ctx| {
            let record = EntityManager::new(&registry, ctx, &type_name)?.soft_delete(id)?;
            project(&registry, ctx, &record)
        })
    }

    pub fn hard_delete(&self, type_name: &str, id: i64) -> CrudResult<JsonValue> {
        let registry = Arc::clone(&self.registry);
        let type_name = self.known_type(type_name)?;
        self.within(Method::Delete, Projection::default(), move |ctx| {
            let record = EntityManager::new(&registry, ctx, &type_name)?.hard_delete(id)?;
            project(&registry, ctx, &record)
        })
    }

    fn known_type(&self, type_name: &str) -> CrudResult<String> {
        self.registry.describe(type_name)?;
        Ok(type_name.to_string())
    }

    fn within<R, F>(&self, method: Method, projection: Projection, job: F) -> CrudResult<R>
    where
        F: FnOnce(&ExecutionContext) -> CrudResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut operation = self.store.begin(Uuid::new_v4(), method, projection)?;
        let outcome = operation.run(job);
        operation.end();
        if let Err(err) = &outcome {
            debug!(
                "event=operation_failed module=service status=error operation_id={} method={} kind={}",
                operation.id(),
                method,
                err.kind().code()
            );
        }
        outcome
    }
}

fn project(
    registry: &EntityRegistry,
    ctx: &ExecutionContext,
    record: &Record,
) -> CrudResult<JsonValue> {
    to_output(registry, record, ctx.output_fields(), ctx.skip_fields(), &[]).map(JsonValue::Object)
}

fn object_body(body: &JsonValue) -> CrudResult<Map<String, JsonValue>> {
    body.as_object()
        .cloned()
        .ok_or_else(|| CrudError::bad_request("Request body must be a JSON object"))
}

fn array_body(body: &JsonValue) -> CrudResult<Vec<Map<String, JsonValue>>> {
    let items = body
        .as_array()
        .ok_or_else(|| CrudError::bad_request("Request body must be a JSON array of objects"))?;
    items.iter().map(object_body).collect()
}
