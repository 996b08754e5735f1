//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file, private in-memory, or named shared in-memory connections.
//! - Configure connection pragmas required by core behavior.
//! - Synchronize the schema before handing out the first connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - Shared in-memory connections never share a page cache.
//! - `open_*` connections have every registered record table in place.

use super::schema::sync_schema;
use super::{DbError, DbResult};
use crate::metadata::{is_plain_identifier, EntityRegistry};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Where a connection points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    File(PathBuf),
    /// Private database, gone when its connection closes.
    Memory,
    /// Named database shared by every connection of this process that uses
    /// the same name; it lives while at least one connection is open.
    ///
    /// Backed by the `memdb` VFS, so connections lock the whole database
    /// like a file and a contended writer waits out the busy timeout.
    SharedMemory(String),
}

impl StorageTarget {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
            Self::SharedMemory(_) => "shared_memory",
        }
    }

    /// Opens and configures a connection without touching the schema.
    pub fn connect(&self) -> DbResult<Connection> {
        let conn = match self {
            Self::File(path) => Connection::open(path)?,
            Self::Memory => Connection::open_in_memory()?,
            Self::SharedMemory(name) => {
                if !is_plain_identifier(name) {
                    return Err(DbError::InvalidIdentifier(name.clone()));
                }
                Connection::open_with_flags(
                    format!("file:/{name}?vfs=memdb"),
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                        | OpenFlags::SQLITE_OPEN_CREATE
                        | OpenFlags::SQLITE_OPEN_URI
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?
            }
        };
        configure(&conn)?;
        Ok(conn)
    }
}

/// Opens a SQLite database file and synchronizes the registered schema.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, registry: &EntityRegistry) -> DbResult<Connection> {
    open_target(&StorageTarget::File(path.as_ref().to_path_buf()), registry)
}

/// Opens a private in-memory SQLite database and synchronizes the schema.
pub fn open_db_in_memory(registry: &EntityRegistry) -> DbResult<Connection> {
    open_target(&StorageTarget::Memory, registry)
}

/// Opens the named shared in-memory database and synchronizes the schema.
pub fn open_shared_memory(name: &str, registry: &EntityRegistry) -> DbResult<Connection> {
    open_target(&StorageTarget::SharedMemory(name.to_string()), registry)
}

/// Connects to `target` and synchronizes the registered schema.
pub fn open_target(target: &StorageTarget, registry: &EntityRegistry) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = target.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match target.connect() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }
    };

    match sync_schema(&mut conn, registry) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn configure(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}
