//! Per-operation execution contexts.
//!
//! # Responsibility
//! - Allocate, for each logical operation, a persistence provider, an output
//!   projection, the originating method and a dedicated worker pool.
//! - Resolve an operation id back to its context from any pool thread.
//!
//! # Invariants
//! - One entry per operation id; a second `begin` with a live id fails.
//! - Lookups after `end` fail with `Internal("bad routing")`.
//! - `end` is idempotent and only ever removes its own entry.

use crate::context::pool::WorkerPool;
use crate::error::{CrudError, CrudResult};
use crate::logging;
use crate::materialize::Projection;
use crate::model::method::Method;
use crate::repo::{PersistenceProvider, ProviderFactory};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Correlation id of one logical operation.
pub type OperationId = Uuid;

/// State bag of one operation.
pub struct ExecutionContext {
    operation_id: OperationId,
    method: Method,
    projection: Projection,
    persistence: Mutex<Box<dyn PersistenceProvider>>,
}

impl ExecutionContext {
    pub fn new(
        operation_id: OperationId,
        method: Method,
        projection: impl Into<Projection>,
        persistence: Box<dyn PersistenceProvider>,
    ) -> Self {
        Self {
            operation_id,
            method,
            projection: projection.into(),
            persistence: Mutex::new(persistence),
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Requested output fields; empty means all.
    pub fn output_fields(&self) -> &[String] {
        &self.projection.fields
    }

    /// Field names left out of every projected level.
    pub fn skip_fields(&self) -> &[String] {
        &self.projection.skip
    }

    /// Locks the operation's persistence provider.
    pub fn persistence(&self) -> CrudResult<MutexGuard<'_, Box<dyn PersistenceProvider>>> {
        self.persistence.lock().map_err(|_| {
            CrudError::internal("persistence handle of operation {} is poisoned")
                .with_arg(self.operation_id)
        })
    }
}

/// Process-wide registry of live operations.
pub struct ContextStore {
    factory: Arc<dyn ProviderFactory>,
    pool_size: usize,
    entries: Mutex<HashMap<OperationId, Arc<ExecutionContext>>>,
}

impl ContextStore {
    pub fn new(factory: Arc<dyn ProviderFactory>, pool_size: usize) -> Arc<Self> {
        Arc::new(Self {
            factory,
            pool_size: pool_size.max(1),
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Opens a provider and a worker pool for `operation_id` and registers
    /// the context.
    ///
    /// # Errors
    /// - `Internal` when the id is already live, the provider cannot be
    ///   opened, or the pool cannot be spawned.
    pub fn begin(
        self: &Arc<Self>,
        operation_id: OperationId,
        method: Method,
        projection: impl Into<Projection>,
    ) -> CrudResult<Operation> {
        let provider = self.factory.open_provider()?;
        let context = Arc::new(ExecutionContext::new(
            operation_id,
            method,
            projection,
            provider,
        ));

        {
            let mut entries = self.entries()?;
            if entries.contains_key(&operation_id) {
                return Err(CrudError::internal("operation {} is already active").with_arg(operation_id));
            }
            entries.insert(operation_id, Arc::clone(&context));
        }

        let label = format!("crudify-op-{}", &operation_id.simple().to_string()[..8]);
        let pool = match WorkerPool::new(&label, self.pool_size) {
            Ok(pool) => pool,
            Err(err) => {
                self.release(operation_id, &context);
                return Err(err);
            }
        };

        info!(
            "event=operation_begin module=context status=ok operation_id={} method={} pool={}",
            operation_id,
            method,
            pool.label()
        );
        Ok(Operation {
            id: operation_id,
            store: Arc::clone(self),
            context,
            pool: Some(pool),
            ended: false,
        })
    }

    /// Resolves the context registered for `operation_id`.
    ///
    /// # Errors
    /// - `Internal("bad routing")` when no context is registered.
    pub fn current(&self, operation_id: OperationId) -> CrudResult<Arc<ExecutionContext>> {
        let entries = self.entries()?;
        entries.get(&operation_id).cloned().ok_or_else(|| {
            warn!(
                "event=context_lookup module=context status=error operation_id={} reason=bad_routing",
                operation_id
            );
            CrudError::internal("bad routing")
        })
    }

    pub fn is_active(&self, operation_id: OperationId) -> bool {
        self.entries()
            .map(|entries| entries.contains_key(&operation_id))
            .unwrap_or(false)
    }

    pub fn active_operations(&self) -> usize {
        self.entries().map(|entries| entries.len()).unwrap_or(0)
    }

    fn entries(&self) -> CrudResult<MutexGuard<'_, HashMap<OperationId, Arc<ExecutionContext>>>> {
        self.entries
            .lock()
            .map_err(|_| CrudError::internal("context store is poisoned"))
    }

    fn release(&self, operation_id: OperationId, context: &Arc<ExecutionContext>) -> bool {
        let Ok(mut entries) = self.entries() else {
            return false;
        };
        let owned = entries
            .get(&operation_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, context));
        if owned {
            entries.remove(&operation_id);
        }
        owned
    }
}

/// Handle of one live operation.
///
/// Work runs on the operation's own pool through [`Operation::run`], which
/// hands the context to the job explicitly. Dropping the handle ends the
/// operation.
pub struct Operation {
    id: OperationId,
    store: Arc<ContextStore>,
    context: Arc<ExecutionContext>,
    pool: Option<WorkerPool>,
    ended: bool,
}

impl Operation {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Runs `job` on this operation's pool with its context.
    ///
    /// The context is resolved on the pool thread, so a job submitted after
    /// teardown fails with `bad routing`.
    pub fn run<R, F>(&self, job: F) -> CrudResult<R>
    where
        F: FnOnce(&ExecutionContext) -> CrudResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = match (&self.pool, self.ended) {
            (Some(pool), false) => pool,
            _ => return Err(CrudError::internal("bad routing")),
        };
        let store = Arc::clone(&self.store);
        let id = self.id;
        pool.submit(move || {
            logging::with_operation(id, || {
                let context = store.current(id)?;
                job(&context)
            })
        })?
    }

    /// Releases the context and joins the pool. Idempotent.
    ///
    /// A transaction still open at this point is rolled back.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        if let Ok(mut provider) = self.context.persistence() {
            if provider.in_transaction() {
                warn!(
                    "event=operation_end module=context status=rollback operation_id={} reason=open_transaction",
                    self.id
                );
                let _ = provider.rollback();
            }
        }
        let released = self.store.release(self.id, &self.context);
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
        info!(
            "event=operation_end module=context status=ok operation_id={} released={}",
            self.id, released
        );
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        self.end();
    }
}
