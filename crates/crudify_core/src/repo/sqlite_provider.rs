//! SQLite implementation of [`PersistenceProvider`].
//!
//! # Responsibility
//! - Render [`QueryPlan`]s into parameterized SQL over metadata-derived
//!   tables.
//! - Decode rows into [`Record`]s and resolve relations eagerly.
//! - Drive explicit `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK`.
//!
//! # Invariants
//! - Literals are always bound, never spliced into SQL text.
//! - Relation resolution stops when the target type is already being loaded
//!   on the current branch; such relations stay as id-only references.
//! - A nested record is loaded under ALL scope; a collection under ACTIVE
//!   scope through its `mapped_by` column, ordered by id ascending.

use crate::db::{open_target, quote_ident, DbResult, StorageTarget};
use crate::metadata::{EntityRegistry, FieldDescriptor, FieldType, RecordMetadata};
use crate::model::record::{Record, DELETED_FIELD, ID_FIELD};
use crate::model::value::Value;
use crate::query::builder::{Predicate, QueryPlan, SortColumn};
use crate::query::criteria::Scope;
use crate::repo::{FindRequest, PersistenceProvider, ProviderFactory, RepoError, RepoResult};
use log::debug;
use rusqlite::types::{ToSql, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// SQLite-backed persistence provider bound to one connection.
pub struct SqliteProvider {
    conn: Connection,
    registry: Arc<EntityRegistry>,
    in_transaction: bool,
}

impl SqliteProvider {
    pub fn new(conn: Connection, registry: Arc<EntityRegistry>) -> Self {
        Self {
            conn,
            registry,
            in_transaction: false,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn load(
        &self,
        metadata: &RecordMetadata,
        request: &FindRequest,
        visiting: &mut Vec<String>,
    ) -> RepoResult<Vec<Record>> {
        if request.page.is_some_and(|page| page.limit <= 0) {
            return Ok(Vec::new());
        }

        let (where_clause, params) = render_plan(&request.plan)?;
        let mut sql = format!(
            "{} WHERE {where_clause}",
            select_sql(metadata)?
        );
        if !request.sort.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&render_sort(&request.sort)?);
        }
        if let Some(page) = request.page {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", page.limit, page.offset.max(0)));
        }

        let mut records = {
            let mut stmt = self.conn.prepare(&sql)?;
            let bound = bind_named(&params);
            let mut rows = stmt.query(bound.as_slice())?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(decode_row(metadata, row)?);
            }
            records
        };

        visiting.push(metadata.type_name().to_string());
        for record in &mut records {
            self.resolve_relations(metadata, record, visiting)?;
        }
        visiting.pop();

        Ok(records)
    }

    fn resolve_relations(
        &self,
        metadata: &RecordMetadata,
        record: &mut Record,
        visiting: &mut Vec<String>,
    ) -> RepoResult<()> {
        for field in metadata.fields() {
            match field.field_type() {
                FieldType::Record(target) => {
                    let Some(id) = record
                        .value(field.name())
                        .and_then(Value::as_record)
                        .and_then(Record::id)
                    else {
                        continue;
                    };
                    if visiting.iter().any(|name| name == target) {
                        continue;
                    }
                    let target_meta = self.describe(target)?;
                    let loaded = self
                        .load(
                            &target_meta,
                            &FindRequest::new(QueryPlan::for_id(id, Scope::All)),
                            visiting,
                        )?
                        .into_iter()
                        .next();
                    record.set(field.name(), loaded.map_or(Value::Null, Value::from));
                }
                FieldType::Collection { target, mapped_by } => {
                    let Some(owner_id) = record.id() else {
                        continue;
                    };
                    if visiting.iter().any(|name| name == target) {
                        continue;
                    }
                    let target_meta = self.describe(target)?;
                    let column = target_meta
                        .field(mapped_by)
                        .map(|back| back.column_name().to_string())
                        .ok_or_else(|| {
                            RepoError::InvalidData(format!(
                                "`{target}` has no field `{mapped_by}`"
                            ))
                        })?;
                    let request = FindRequest {
                        plan: QueryPlan::for_column(&column, Value::Int(owner_id), Scope::Active),
                        sort: vec![SortColumn {
                            column: ID_FIELD.to_string(),
                            descending: false,
                        }],
                        page: None,
                    };
                    let children = self.load(&target_meta, &request, visiting)?;
                    record.set(field.name(), Value::List(children));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn describe(&self, type_name: &str) -> RepoResult<Arc<RecordMetadata>> {
        self.registry.describe(type_name).map_err(|_| {
            RepoError::InvalidData(format!("relation targets unregistered type `{type_name}`"))
        })
    }

    fn insert(
        &self,
        metadata: &RecordMetadata,
        record: &Record,
        explicit_id: Option<i64>,
    ) -> RepoResult<i64> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = explicit_id {
            columns.push(quote_ident(ID_FIELD)?);
            values.push(SqlValue::Integer(id));
        }
        columns.push(quote_ident(DELETED_FIELD)?);
        values.push(SqlValue::Integer(bool_to_int(record.is_deleted())));
        for field in data_columns(metadata) {
            columns.push(quote_ident(field.column_name())?);
            values.push(column_value(metadata, field, record)?);
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders});",
            quote_ident(metadata.table())?,
            columns.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(explicit_id.unwrap_or_else(|| self.conn.last_insert_rowid()))
    }

    fn update(&self, metadata: &RecordMetadata, record: &Record, id: i64) -> RepoResult<usize> {
        let mut assignments = vec![format!("{} = ?", quote_ident(DELETED_FIELD)?)];
        let mut values = vec![SqlValue::Integer(bool_to_int(record.is_deleted()))];
        for field in data_columns(metadata) {
            assignments.push(format!("{} = ?", quote_ident(field.column_name())?));
            values.push(column_value(metadata, field, record)?);
        }
        values.push(SqlValue::Integer(id));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?;",
            quote_ident(metadata.table())?,
            assignments.join(", "),
            quote_ident(ID_FIELD)?
        );
        Ok(self.conn.execute(&sql, params_from_iter(values))?)
    }
}

impl PersistenceProvider for SqliteProvider {
    fn begin(&mut self) -> RepoResult<()> {
        if self.in_transaction {
            return Err(RepoError::Transaction("transaction already active"));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.in_transaction = true;
        debug!("event=tx_begin module=repo status=ok");
        Ok(())
    }

    fn commit(&mut self) -> RepoResult<()> {
        if !self.in_transaction {
            return Err(RepoError::Transaction("no active transaction to commit"));
        }
        self.conn.execute_batch("COMMIT;")?;
        self.in_transaction = false;
        debug!("event=tx_commit module=repo status=ok");
        Ok(())
    }

    fn rollback(&mut self) -> RepoResult<()> {
        if !self.in_transaction {
            return Err(RepoError::Transaction("no active transaction to roll back"));
        }
        self.in_transaction = false;
        if self.conn.is_autocommit() {
            debug!("event=tx_rollback module=repo status=skipped reason=already_closed");
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK;")?;
        debug!("event=tx_rollback module=repo status=ok");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn find(&self, metadata: &RecordMetadata, request: &FindRequest) -> RepoResult<Vec<Record>> {
        self.load(metadata, request, &mut Vec::new())
    }

    fn count(&self, metadata: &RecordMetadata, plan: &QueryPlan) -> RepoResult<i64> {
        let (where_clause, params) = render_plan(plan)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {where_clause};",
            quote_ident(metadata.table())?
        );
        let bound = bind_named(&params);
        let total = self
            .conn
            .query_row(&sql, bound.as_slice(), |row| row.get::<_, i64>(0))?;
        Ok(total)
    }

    fn persist(&mut self, metadata: &RecordMetadata, record: &mut Record) -> RepoResult<()> {
        ensure_type(metadata, record)?;
        let id = match record.id() {
            None => self.insert(metadata, record, None)?,
            Some(id) => {
                if self.update(metadata, record, id)? == 0 {
                    self.insert(metadata, record, Some(id))?
                } else {
                    id
                }
            }
        };
        record.set_id(Some(id));
        debug!(
            "event=record_persist module=repo status=ok type={} id={}",
            metadata.type_name(),
            id
        );
        Ok(())
    }

    fn flush(&self, metadata: &RecordMetadata, record: &mut Record) -> RepoResult<()> {
        ensure_type(metadata, record)?;
        let id = record.id().ok_or_else(|| {
            RepoError::InvalidData(format!("cannot flush unsaved {}", metadata.type_name()))
        })?;
        let stored = self
            .find(metadata, &FindRequest::new(QueryPlan::for_id(id, Scope::All)))?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::NotFound {
                type_name: metadata.type_name().to_string(),
                id,
            })?;
        *record = stored;
        Ok(())
    }

    fn delete(&mut self, metadata: &RecordMetadata, record: &Record) -> RepoResult<()> {
        ensure_type(metadata, record)?;
        let id = record.id().ok_or_else(|| {
            RepoError::InvalidData(format!("cannot delete unsaved {}", metadata.type_name()))
        })?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1;",
            quote_ident(metadata.table())?,
            quote_ident(ID_FIELD)?
        );
        let changed = self.conn.execute(&sql, [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                type_name: metadata.type_name().to_string(),
                id,
            });
        }
        debug!(
            "event=record_delete module=repo status=ok type={} id={}",
            metadata.type_name(),
            id
        );
        Ok(())
    }

    fn delete_where(&mut self, metadata: &RecordMetadata, plan: &QueryPlan) -> RepoResult<usize> {
        let (where_clause, params) = render_plan(plan)?;
        let sql = format!(
            "DELETE FROM {} WHERE {where_clause};",
            quote_ident(metadata.table())?
        );
        let bound = bind_named(&params);
        let removed = self.conn.execute(&sql, bound.as_slice())?;
        debug!(
            "event=record_delete_where module=repo status=ok type={} removed={}",
            metadata.type_name(),
            removed
        );
        Ok(removed)
    }
}

/// Opens one [`SqliteProvider`] per operation against a fixed target.
///
/// Shared in-memory targets keep an idle anchor connection so the database
/// outlives individual operations.
pub struct SqliteProviderFactory {
    target: StorageTarget,
    registry: Arc<EntityRegistry>,
    _anchor: Option<Mutex<Connection>>,
}

impl SqliteProviderFactory {
    /// Synchronizes the schema of `target` and prepares the factory.
    ///
    /// A private [`StorageTarget::Memory`] target is promoted to a uniquely
    /// named shared in-memory database so every operation sees the same data.
    pub fn open(target: StorageTarget, registry: Arc<EntityRegistry>) -> DbResult<Self> {
        let target = match target {
            StorageTarget::Memory => {
                StorageTarget::SharedMemory(format!("crudify_{}", Uuid::new_v4().simple()))
            }
            other => other,
        };
        let conn = open_target(&target, &registry)?;
        let anchor = match target {
            StorageTarget::SharedMemory(_) => Some(Mutex::new(conn)),
            StorageTarget::File(_) | StorageTarget::Memory => None,
        };
        Ok(Self {
            target,
            registry,
            _anchor: anchor,
        })
    }

    pub fn file(path: impl Into<PathBuf>, registry: Arc<EntityRegistry>) -> DbResult<Self> {
        Self::open(StorageTarget::File(path.into()), registry)
    }

    pub fn shared_memory(name: &str, registry: Arc<EntityRegistry>) -> DbResult<Self> {
        Self::open(StorageTarget::SharedMemory(name.to_string()), registry)
    }

    /// Fresh isolated in-memory database.
    pub fn in_memory(registry: Arc<EntityRegistry>) -> DbResult<Self> {
        Self::open(StorageTarget::Memory, registry)
    }

    pub fn target(&self) -> &StorageTarget {
        &self.target
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }
}

impl ProviderFactory for SqliteProviderFactory {
    fn open_provider(&self) -> RepoResult<Box<dyn PersistenceProvider>> {
        let conn = self.target.connect()?;
        Ok(Box::new(SqliteProvider::new(conn, Arc::clone(&self.registry))))
    }
}

fn ensure_type(metadata: &RecordMetadata, record: &Record) -> RepoResult<()> {
    if record.type_name() == metadata.type_name() {
        return Ok(());
    }
    Err(RepoError::InvalidData(format!(
        "record of type `{}` handed to `{}` storage",
        record.type_name(),
        metadata.type_name()
    )))
}

fn data_columns(metadata: &RecordMetadata) -> impl Iterator<Item = &FieldDescriptor> {
    metadata.column_fields().filter(|field| !field.is_base())
}

fn select_sql(metadata: &RecordMetadata) -> RepoResult<String> {
    let mut columns = vec![quote_ident(ID_FIELD)?, quote_ident(DELETED_FIELD)?];
    for field in data_columns(metadata) {
        columns.push(quote_ident(field.column_name())?);
    }
    Ok(format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_ident(metadata.table())?
    ))
}

fn render_plan(plan: &QueryPlan) -> RepoResult<(String, Vec<(String, SqlValue)>)> {
    let mut clauses = Vec::with_capacity(plan.predicates().len());
    for predicate in plan.predicates() {
        let clause = match predicate {
            Predicate::Deleted(flag) => {
                format!("{} = {}", quote_ident(DELETED_FIELD)?, bool_to_int(*flag))
            }
            Predicate::Search { columns, param } => {
                let mut clause = format!("(:{param} = ''");
                for column in columns {
                    clause.push_str(&format!(
                        " OR lower({}) LIKE lower(:{param})",
                        quote_ident(column)?
                    ));
                }
                clause.push(')');
                clause
            }
            Predicate::Compare {
                column,
                operator,
                param,
            } => format!("{} {} :{param}", quote_ident(column)?, operator.as_sql()),
            Predicate::IdIn { params } if params.is_empty() => "0 = 1".to_string(),
            Predicate::IdIn { params } => {
                let list = params
                    .iter()
                    .map(|param| format!(":{param}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} IN ({list})", quote_ident(ID_FIELD)?)
            }
        };
        clauses.push(clause);
    }

    let where_clause = if clauses.is_empty() {
        "1 = 1".to_string()
    } else {
        clauses.join(" AND ")
    };

    let params = plan
        .params()
        .iter()
        .map(|(name, value)| Ok((format!(":{name}"), scalar_to_sql(value)?)))
        .collect::<RepoResult<Vec<_>>>()?;
    Ok((where_clause, params))
}

fn render_sort(sort: &[SortColumn]) -> RepoResult<String> {
    let terms = sort
        .iter()
        .map(|term| {
            let direction = if term.descending { "DESC" } else { "ASC" };
            Ok(format!("{} {direction}", quote_ident(&term.column)?))
        })
        .collect::<RepoResult<Vec<_>>>()?;
    Ok(terms.join(", "))
}

fn bind_named(params: &[(String, SqlValue)]) -> Vec<(&str, &dyn ToSql)> {
    params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

fn scalar_to_sql(value: &Value) -> RepoResult<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(flag) => Ok(SqlValue::Integer(bool_to_int(*flag))),
        Value::Int(number) => Ok(SqlValue::Integer(*number)),
        Value::Float(number) => Ok(SqlValue::Real(*number)),
        Value::Text(text) => Ok(SqlValue::Text(text.clone())),
        Value::Record(_) | Value::List(_) => Err(RepoError::InvalidData(format!(
            "{} value cannot be bound as a parameter",
            value.kind_label()
        ))),
    }
}

fn column_value(
    metadata: &RecordMetadata,
    field: &FieldDescriptor,
    record: &Record,
) -> RepoResult<SqlValue> {
    match record.get(field.name()) {
        Value::Record(nested) => nested.id().map(SqlValue::Integer).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "{}.{} references an unsaved {}",
                metadata.type_name(),
                field.name(),
                nested.type_name()
            ))
        }),
        other => scalar_to_sql(&other),
    }
}

fn decode_row(metadata: &RecordMetadata, row: &Row<'_>) -> RepoResult<Record> {
    let mut record = Record::new(metadata.type_name());
    record.set_id(Some(row.get::<_, i64>(0)?));
    record.set_deleted(int_to_bool(metadata, row.get::<_, i64>(1)?)?);

    for (offset, field) in data_columns(metadata).enumerate() {
        let raw = row.get_ref(offset + 2)?;
        let value = decode_value(metadata, field, raw)?;
        if !value.is_null() {
            record.set(field.name(), value);
        }
    }
    Ok(record)
}

fn decode_value(
    metadata: &RecordMetadata,
    field: &FieldDescriptor,
    raw: ValueRef<'_>,
) -> RepoResult<Value> {
    let decoded = match (field.field_type(), raw) {
        (_, ValueRef::Null) => Some(Value::Null),
        (FieldType::Text | FieldType::Enum(_), ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
            .ok()
            .map(|text| Value::Text(text.to_string())),
        (FieldType::Integer | FieldType::Long, ValueRef::Integer(number)) => Some(Value::Int(number)),
        (FieldType::Boolean, ValueRef::Integer(0)) => Some(Value::Bool(false)),
        (FieldType::Boolean, ValueRef::Integer(1)) => Some(Value::Bool(true)),
        (FieldType::Float | FieldType::Double, ValueRef::Real(number)) => Some(Value::Float(number)),
        (FieldType::Float | FieldType::Double, ValueRef::Integer(number)) => {
            Some(Value::Float(number as f64))
        }
        (FieldType::Record(target), ValueRef::Integer(id)) => {
            Some(Value::from(Record::reference(target.as_str(), id)))
        }
        _ => None,
    };

    decoded.ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid {} value in {}.{}",
            field.field_type().label(),
            metadata.table(),
            field.column_name()
        ))
    })
}

fn int_to_bool(metadata: &RecordMetadata, value: i64) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid deleted value `{other}` in {}.deleted",
            metadata.table()
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::{render_plan, SqliteProvider};
    use crate::db::open_db_in_memory;
    use crate::metadata::{EntityRegistry, FieldDescriptor, FieldType, RecordMetadata};
    use crate::model::record::Record;
    use crate::model::value::Value;
    use crate::query::builder::QueryPlan;
    use crate::query::criteria::Scope;
    use crate::repo::{Cursor, FindRequest, PersistenceProvider, RepoError};
    use std::sync::Arc;

    fn registry() -> Arc<EntityRegistry> {
        let team = RecordMetadata::builder("team")
            .field(FieldDescriptor::text("title"))
            .field(FieldDescriptor::new(
                "members",
                FieldType::collection("person", "team"),
            ))
            .build()
            .expect("team metadata");
        let person = RecordMetadata::builder("person")
            .field(FieldDescriptor::text("name"))
            .field(FieldDescriptor::new("team", FieldType::record("team")))
            .build()
            .expect("person metadata");
        Arc::new(
            EntityRegistry::new()
                .with(team)
                .and_then(|registry| registry.with(person))
                .expect("registry"),
        )
    }

    fn provider() -> SqliteProvider {
        let registry = registry();
        let conn = open_db_in_memory(&registry).expect("in-memory db");
        SqliteProvider::new(conn, registry)
    }

    #[test]
    fn persist_assigns_id_and_flush_round_trips() {
        let mut provider = provider();
        let registry = registry();
        let meta = registry.describe("person").unwrap();

        let mut record = Record::new("person").with("name", "Ada");
        provider.persist(&meta, &mut record).unwrap();
        let id = record.id().expect("id assigned");

        let mut reloaded = Record::stored("person", id);
        provider.flush(&meta, &mut reloaded).unwrap();
        assert_eq!(reloaded.get("name"), Value::from("Ada"));
        assert!(reloaded.is_active());
    }

    #[test]
    fn update_without_row_inserts_with_explicit_id() {
        let mut provider = provider();
        let registry = registry();
        let meta = registry.describe("person").unwrap();

        let mut record = Record::stored("person", 77).with("name", "Grace");
        provider.persist(&meta, &mut record).unwrap();
        let found = Cursor::new(&provider, &meta, QueryPlan::for_id(77, Scope::All))
            .first_result()
            .unwrap();
        assert_eq!(found.map(|r| r.get("name")), Some(Value::from("Grace")));
    }

    #[test]
    fn relations_resolve_both_directions_without_looping() {
        let mut provider = provider();
        let registry = registry();
        let team_meta = registry.describe("team").unwrap();
        let person_meta = registry.describe("person").unwrap();

        let mut team = Record::new("team").with("title", "core");
        provider.persist(&team_meta, &mut team).unwrap();
        let mut ada = Record::new("person")
            .with("name", "Ada")
            .with("team", team.clone());
        provider.persist(&person_meta, &mut ada).unwrap();

        provider.flush(&team_meta, &mut team).unwrap();
        let members = team.get("members");
        let members = members.as_list().expect("members list");
        assert_eq!(members.len(), 1);
        let back = members[0].get("team");
        assert_eq!(back.as_record().and_then(Record::id), team.id());

        provider.flush(&person_meta, &mut ada).unwrap();
        let nested = ada.get("team");
        assert_eq!(
            nested.as_record().map(|r| r.get("title")),
            Some(Value::from("core"))
        );
    }

    #[test]
    fn delete_missing_row_is_not_found() {
        let mut provider = provider();
        let registry = registry();
        let meta = registry.describe("person").unwrap();
        let err = provider
            .delete(&meta, &Record::stored("person", 404))
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound { id: 404, .. }));
    }

    #[test]
    fn rollback_discards_writes() {
        let mut provider = provider();
        let registry = registry();
        let meta = registry.describe("person").unwrap();

        provider.begin().unwrap();
        let mut record = Record::new("person").with("name", "Temp");
        provider.persist(&meta, &mut record).unwrap();
        provider.rollback().unwrap();

        let total = provider.count(&meta, &QueryPlan::scoped(Scope::All)).unwrap();
        assert_eq!(total, 0);
        assert!(!provider.in_transaction());
    }

    #[test]
    fn nested_begin_is_rejected() {
        let mut provider = provider();
        provider.begin().unwrap();
        assert!(matches!(provider.begin(), Err(RepoError::Transaction(_))));
        provider.rollback().unwrap();
    }

    #[test]
    fn empty_id_list_matches_nothing() {
        let provider = provider();
        let registry = registry();
        let meta = registry.describe("person").unwrap();
        let (clause, params) = render_plan(&QueryPlan::for_ids(&[], Scope::All)).unwrap();
        assert_eq!(clause, "0 = 1");
        assert!(params.is_empty());
        let found = provider
            .find(&meta, &FindRequest::new(QueryPlan::for_ids(&[], Scope::All)))
            .unwrap();
        assert!(found.is_empty());
    }
}
