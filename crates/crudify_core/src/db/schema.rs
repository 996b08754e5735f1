//! Schema derivation from record metadata.
//!
//! # Responsibility
//! - Create one table per registered record type.
//! - Add columns declared after the table was first created.
//!
//! # Invariants
//! - Sync is additive: existing columns and rows are never dropped.
//! - Relations are validated before any DDL runs.
//! - All DDL of one sync runs in a single transaction.

use super::{quote_ident, DbError, DbResult};
use crate::metadata::{EntityRegistry, FieldType, RecordMetadata};
use log::info;
use rusqlite::Connection;
use std::collections::HashSet;

/// Brings the database schema in line with every registered record type.
pub fn sync_schema(conn: &mut Connection, registry: &EntityRegistry) -> DbResult<()> {
    for metadata in registry.iter() {
        validate_relations(metadata, registry)?;
    }

    let tx = conn.transaction()?;
    let mut columns_added = 0usize;
    for metadata in registry.iter() {
        columns_added += sync_table(&tx, metadata)?;
    }
    tx.commit()?;

    info!(
        "event=schema_sync module=db status=ok tables={} columns_added={}",
        registry.len(),
        columns_added
    );
    Ok(())
}

fn validate_relations(metadata: &RecordMetadata, registry: &EntityRegistry) -> DbResult<()> {
    for field in metadata.fields() {
        let Some(target) = field.field_type().relation_target() else {
            continue;
        };
        let Ok(target_meta) = registry.describe(target) else {
            return Err(DbError::UnknownRelation {
                type_name: metadata.type_name().to_string(),
                field: field.name().to_string(),
                target: target.to_string(),
            });
        };

        if let FieldType::Collection { mapped_by, .. } = field.field_type() {
            let points_back = target_meta.field(mapped_by).is_some_and(|back| {
                matches!(back.field_type(), FieldType::Record(owner) if owner == metadata.type_name())
            });
            if !points_back {
                return Err(DbError::InvalidMapping {
                    type_name: metadata.type_name().to_string(),
                    field: field.name().to_string(),
                    target: target.to_string(),
                    mapped_by: mapped_by.clone(),
                });
            }
        }
    }
    Ok(())
}

fn sync_table(conn: &Connection, metadata: &RecordMetadata) -> DbResult<usize> {
    let table = quote_ident(metadata.table())?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,
            \"deleted\" INTEGER NOT NULL DEFAULT 0
        );"
    ))?;

    let existing = existing_columns(conn, &table)?;
    let mut added = 0usize;
    for field in metadata.column_fields().filter(|field| !field.is_base()) {
        if existing.contains(field.column_name()) {
            continue;
        }
        let Some(sql_type) = field.field_type().sql_type() else {
            continue;
        };
        let column = quote_ident(field.column_name())?;
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type};"))?;
        added += 1;
    }
    Ok(added)
}

fn existing_columns(conn: &Connection, table: &str) -> DbResult<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}
