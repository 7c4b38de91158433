//! SQLite schema and typed data-access primitives.
//!
//! One file per entity family, each exposing plain functions over a
//! `&Connection` or `&Transaction` rather than an actor/service object —
//! the Store itself does not own concurrency, the Gateway
//! (`crate::gateway`) does.

pub mod heartbeat_state;
pub mod history;
pub mod memory;
pub mod profiles;
pub mod runs;
pub mod schedules;
pub mod seen_items;
pub mod summary_jobs;
pub mod task_state;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Opens the database at `db_path`, creating parent directories as needed,
/// and tunes the connection: WAL journal mode plus a busy timeout, with
/// foreign keys enabled on top since the schema here relies on
/// `ON DELETE CASCADE`/`SET NULL`.
pub fn open(db_path: &Path, busy_timeout_ms: u64) -> shared::Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                shared::CoreError::Database(format!(
                    "creating data directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
    }

    let conn = Connection::open(db_path).map_err(|e| {
        shared::CoreError::Database(format!("opening {}: {e}", db_path.display()))
    })?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| shared::CoreError::Database(format!("enabling WAL: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| shared::CoreError::Database(format!("enabling foreign keys: {e}")))?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
        .map_err(|e| shared::CoreError::Database(format!("setting busy timeout: {e}")))?;

    debug!(path = %db_path.display(), "opened store connection");
    Ok(conn)
}

/// Creates every table and index if absent. Idempotent, safe to call on
/// every startup.
pub fn initialize(conn: &Connection) -> shared::Result<()> {
    info!("initializing store schema");

    profiles::create_tables(conn)?;
    schedules::create_tables(conn)?;
    runs::create_tables(conn)?;
    history::create_tables(conn)?;
    seen_items::create_tables(conn)?;
    task_state::create_tables(conn)?;
    memory::create_tables(conn)?;
    summary_jobs::create_tables(conn)?;
    heartbeat_state::create_tables(conn)?;

    info!("store schema ready");
    Ok(())
}

/// Maps a `rusqlite::Error` into the shared error taxonomy, preserving the
/// underlying message for logs.
pub(crate) fn db_err(context: &str, e: rusqlite::Error) -> anyhow::Error {
    shared::CoreError::Database(format!("{context}: {e}")).into()
}

#[cfg(test)]
#[path = "tests/store_mod_tests.rs"]
mod tests;
