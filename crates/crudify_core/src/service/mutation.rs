//! Transactional mutation pipeline.
//!
//! # Responsibility
//! - Wrap save/update/merge/delete in transaction boundaries.
//! - Dispatch lifecycle hooks at BEFORE, DURING and AFTER phases.
//! - Roll back on any failure inside the transaction.
//!
//! # Invariants
//! - Materialization and existence checks fail before a transaction begins.
//! - `BEFORE` hooks run before `begin`; `AFTER` hooks run after `commit`.
//! - A classified error keeps its kind across rollback.
//! - `update` never overwrites a stored value with null; `raw_update` does.

use crate::context::ExecutionContext;
use crate::error::{CrudError, CrudResult};
use crate::materialize::{from_input, InputMode};
use crate::metadata::{EntityRegistry, RecordMetadata};
use crate::model::record::{Record, ID_FIELD};
use crate::query::{self, QueryCriteria, QueryPage, QueryPlan, Scope, SortColumn};
use crate::repo::{Cursor, PersistenceProvider};
use crate::service::hooks::{dispatch, HookContext, Phase};
use log::{error, info};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Lifecycle of the most recent transaction of an [`EntityManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    InTransaction,
    Committed,
    RolledBack,
}

impl Display for TransactionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InTransaction => "in_transaction",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Persist,
    Delete,
}

/// Query and mutation entry points for one record type inside one
/// operation.
pub struct EntityManager<'a> {
    metadata: Arc<RecordMetadata>,
    context: &'a ExecutionContext,
    state: TransactionState,
}

impl<'a> EntityManager<'a> {
    /// # Errors
    /// - `NotFound` when `type_name` is not registered.
    pub fn new(
        registry: &EntityRegistry,
        context: &'a ExecutionContext,
        type_name: &str,
    ) -> CrudResult<Self> {
        Ok(Self {
            metadata: registry.describe(type_name)?,
            context,
            state: TransactionState::Pending,
        })
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn query(&self, criteria: &QueryCriteria) -> CrudResult<QueryPage> {
        let provider = self.context.persistence()?;
        query::query(&**provider, &self.metadata, criteria)
    }

    /// Counts matches of `criteria` under exactly its own scope.
    pub fn count(&self, criteria: &QueryCriteria) -> CrudResult<i64> {
        let provider = self.context.persistence()?;
        query::count(&**provider, &self.metadata, criteria)
    }

    pub fn count_pages(&self, criteria: &QueryCriteria) -> CrudResult<i64> {
        Ok(query::count_pages(self.count(criteria)?, criteria.size))
    }

    /// # Errors
    /// - `NotFound` when no record with `id` is visible under `scope`.
    pub fn find_by_id(&self, id: i64, scope: Scope) -> CrudResult<Record> {
        let provider = self.context.persistence()?;
        query::get_by_id(&**provider, &self.metadata, id, scope)
    }

    /// First record matching `plan` in the default id order, if any.
    pub fn find_where(&self, plan: &QueryPlan) -> CrudResult<Option<Record>> {
        let provider = self.context.persistence()?;
        Ok(self.by_id(&**provider, plan).first_result()?)
    }

    /// Every record matching `plan`, ordered by id.
    pub fn find_all_where(&self, plan: &QueryPlan) -> CrudResult<Vec<Record>> {
        let provider = self.context.persistence()?;
        Ok(self.by_id(&**provider, plan).list()?)
    }

    fn by_id<'p>(&'p self, provider: &'p dyn PersistenceProvider, plan: &QueryPlan) -> Cursor<'p> {
        let sort = vec![SortColumn {
            column: ID_FIELD.to_string(),
            descending: false,
        }];
        Cursor::new(provider, &self.metadata, plan.clone()).sort(sort)
    }

    /// Materializes `input` and inserts it.
    pub fn save(&mut self, input: &Map<String, JsonValue>) -> CrudResult<Record> {
        let mut records = vec![self.materialize(input, InputMode::Create)?];
        self.write(&mut records, WriteKind::Persist)?;
        Ok(records.remove(0))
    }

    /// Inserts every input in one transaction.
    pub fn save_all(&mut self, inputs: &[Map<String, JsonValue>]) -> CrudResult<Vec<Record>> {
        let mut records = inputs
            .iter()
            .map(|input| self.materialize(input, InputMode::Create))
            .collect::<CrudResult<Vec<_>>>()?;
        self.write(&mut records, WriteKind::Persist)?;
        Ok(records)
    }

    /// Copies the non-null fields of `input` onto the ACTIVE record `id`.
    ///
    /// # Errors
    /// - `NotFound` when `id` is missing or archived.
    pub fn update(&mut self, id: i64, input: &Map<String, JsonValue>) -> CrudResult<Record> {
        let patch = self.materialize(input, InputMode::Create)?;
        let mut stored = self.find_by_id(id, Scope::Active)?;
        stored.merge_non_null(&patch);

        let mut records = vec![stored];
        self.write(&mut records, WriteKind::Persist)?;
        Ok(records.remove(0))
    }

    /// Replaces every stored field of the ACTIVE record `id` with the
    /// materialized `input`, nulls included.
    ///
    /// Fields the operation's method ignores keep their stored value.
    ///
    /// # Errors
    /// - `NotFound` when `id` is missing or archived.
    pub fn raw_update(&mut self, id: i64, input: &Map<String, JsonValue>) -> CrudResult<Record> {
        let replacement = self.materialize(input, InputMode::Create)?;
        let mut stored = self.find_by_id(id, Scope::Active)?;
        let method = self.context.method();
        for field in self.metadata.column_fields() {
            if field.is_base() || field.is_ignored_for(method) {
                continue;
            }
            stored.set(field.name(), replacement.get(field.name()));
        }

        let mut records = vec![stored];
        self.write(&mut records, WriteKind::Persist)?;
        Ok(records.remove(0))
    }

    /// Upserts a batch: inputs carrying an id are merged onto the matching
    /// ACTIVE record, inputs without one are inserted.
    ///
    /// Existing records are loaded in one round trip. A matched record whose
    /// merged content equals the stored content is returned without a write.
    ///
    /// # Errors
    /// - `NotFound` when a supplied id has no ACTIVE match.
    pub fn merge(&mut self, inputs: &[Map<String, JsonValue>]) -> CrudResult<Vec<Record>> {
        let incoming = inputs
            .iter()
            .map(|input| self.materialize(input, InputMode::Merge))
            .collect::<CrudResult<Vec<_>>>()?;

        let ids: Vec<i64> = incoming.iter().filter_map(Record::id).collect();
        let mut existing: HashMap<i64, Record> = {
            let provider = self.context.persistence()?;
            query::find_by_ids(&**provider, &self.metadata, &ids, Scope::Active)?
                .into_iter()
                .filter_map(|record| record.id().map(|id| (id, record)))
                .collect()
        };

        let mut results: Vec<Option<Record>> = Vec::with_capacity(incoming.len());
        let mut pending = Vec::new();
        let mut slots = Vec::new();
        for (slot, record) in incoming.into_iter().enumerate() {
            let Some(id) = record.id() else {
                pending.push(record);
                slots.push(slot);
                results.push(None);
                continue;
            };
            let stored = existing
                .get(&id)
                .cloned()
                .ok_or_else(|| query::executor::not_found(&self.metadata, id))?;
            let mut merged = stored.clone();
            merged.merge_non_null(&record);
            if merged == stored {
                results.push(Some(stored));
            } else {
                existing.insert(id, merged.clone());
                pending.push(merged);
                slots.push(slot);
                results.push(None);
            }
        }

        if !pending.is_empty() {
            self.write(&mut pending, WriteKind::Persist)?;
        }
        for (slot, record) in slots.into_iter().zip(pending) {
            results[slot] = Some(record);
        }
        Ok(results.into_iter().flatten().collect())
    }

    /// Archives the ACTIVE record `id`; the row stays in place.
    ///
    /// # Errors
    /// - `NotFound` when `id` is missing or already archived.
    pub fn soft_delete(&mut self, id: i64) -> CrudResult<Record> {
        let mut stored = self.find_by_id(id, Scope::Active)?;
        stored.soft_delete();
        let mut records = vec![stored];
        self.write(&mut records, WriteKind::Persist)?;
        Ok(records.remove(0))
    }

    /// Physically removes record `id`, archived or not.
    ///
    /// # Errors
    /// - `NotFound` when no row with `id` exists.
    pub fn hard_delete(&mut self, id: i64) -> CrudResult<Record> {
        let stored = self.find_by_id(id, Scope::All)?;
        let mut records = vec![stored];
        self.write(&mut records, WriteKind::Delete)?;
        Ok(records.remove(0))
    }

    /// Physically removes every row matching `plan` in one transaction.
    ///
    /// Lifecycle hooks are not dispatched for rows removed this way.
    pub fn hard_delete_where(&mut self, plan: &QueryPlan) -> CrudResult<usize> {
        self.state = TransactionState::Pending;
        let removed = self.transactional(|manager, provider| {
            Ok(provider.delete_where(&manager.metadata, plan)?)
        })?;
        info!(
            "event=delete_where module=service status=ok type={} operation_id={} removed={}",
            self.metadata.type_name(),
            self.context.operation_id(),
            removed
        );
        Ok(removed)
    }

    fn materialize(&self, input: &Map<String, JsonValue>, mode: InputMode) -> CrudResult<Record> {
        from_input(&self.metadata, input, self.context.method(), mode)
    }

    fn write(&mut self, records: &mut [Record], kind: WriteKind) -> CrudResult<()> {
        self.state = TransactionState::Pending;
        self.dispatch_phase(Phase::BeforeTransaction, records)?;
        self.transactional(|manager, provider| manager.apply(provider, records, kind))?;
        self.dispatch_phase(Phase::AfterTransaction, records)
    }

    /// Runs `work` between `begin` and `commit` on the operation's provider,
    /// rolling back when either fails.
    fn transactional<R>(
        &mut self,
        work: impl FnOnce(&Self, &mut dyn PersistenceProvider) -> CrudResult<R>,
    ) -> CrudResult<R> {
        let context = self.context;
        let mut provider = context.persistence()?;
        provider.begin()?;
        self.transition(TransactionState::InTransaction);

        let outcome = work(self, &mut **provider)
            .and_then(|value| provider.commit().map(|()| value).map_err(CrudError::from));
        match outcome {
            Ok(value) => {
                self.transition(TransactionState::Committed);
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = provider.rollback() {
                    error!(
                        "event=tx_rollback module=service status=error type={} operation_id={} error={}",
                        self.metadata.type_name(),
                        context.operation_id(),
                        rollback_err
                    );
                }
                self.transition(TransactionState::RolledBack);
                Err(err)
            }
        }
    }

    fn apply(
        &self,
        provider: &mut dyn PersistenceProvider,
        records: &mut [Record],
        kind: WriteKind,
    ) -> CrudResult<()> {
        match kind {
            WriteKind::Persist => {
                provider.persist_all(&self.metadata, records)?;
                provider.flush_all(&self.metadata, records)?;
            }
            WriteKind::Delete => {
                for record in records.iter() {
                    provider.delete(&self.metadata, record)?;
                }
            }
        }

        for record in records.iter_mut() {
            let before = record.clone();
            self.dispatch_one(Phase::DuringTransaction, record)?;
            if kind == WriteKind::Persist && *record != before {
                provider.persist(&self.metadata, record)?;
                provider.flush(&self.metadata, record)?;
            }
        }
        Ok(())
    }

    fn dispatch_phase(&self, phase: Phase, records: &mut [Record]) -> CrudResult<()> {
        for record in records.iter_mut() {
            self.dispatch_one(phase, record)?;
        }
        Ok(())
    }

    fn dispatch_one(&self, phase: Phase, record: &mut Record) -> CrudResult<()> {
        if self.metadata.hooks().is_empty() {
            return Ok(());
        }
        let ctx = HookContext {
            phase,
            method: self.context.method(),
            type_name: self.metadata.type_name(),
            operation_id: self.context.operation_id(),
        };
        dispatch(self.metadata.hooks(), &ctx, record)
    }

    fn transition(&mut self, next: TransactionState) {
        info!(
            "event=tx_state module=service status=ok type={} operation_id={} from={} to={}",
            self.metadata.type_name(),
            self.context.operation_id(),
            self.state,
            next
        );
        self.state = next;
    }
}
