//! Singleton `HeartbeatState` row (`'main'`).

use super::db_err;
use crate::sqltime::{from_text, to_text};
use rusqlite::{params, Connection};
use shared::model::HeartbeatState;

const SINGLETON_ID: &str = "main";

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS heartbeat_state (
            id                   TEXT PRIMARY KEY,
            last_start_at        TEXT,
            last_finish_at       TEXT,
            last_enqueued_count  INTEGER NOT NULL DEFAULT 0,
            last_heartbeat_error TEXT
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating heartbeat_state", e))?;
    Ok(())
}

pub fn upsert(conn: &Connection, state: &HeartbeatState) -> shared::Result<()> {
    conn.execute(
        r#"
        INSERT INTO heartbeat_state (id, last_start_at, last_finish_at, last_enqueued_count, last_heartbeat_error)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET
            last_start_at = excluded.last_start_at,
            last_finish_at = excluded.last_finish_at,
            last_enqueued_count = excluded.last_enqueued_count,
            last_heartbeat_error = excluded.last_heartbeat_error
        "#,
        params![
            SINGLETON_ID,
            state.last_start_at.map(to_text),
            state.last_finish_at.map(to_text),
            state.last_enqueued_count as i64,
            state.last_heartbeat_error,
        ],
    )
    .map_err(|e| db_err("upserting heartbeat state", e))?;
    Ok(())
}

/// Reads the singleton row, defaulting to a fresh `HeartbeatState` before
/// the first tick has ever run.
pub fn get(conn: &Connection) -> shared::Result<HeartbeatState> {
    use rusqlite::OptionalExtension;

    let row = conn
        .query_row(
            "SELECT last_start_at, last_finish_at, last_enqueued_count, last_heartbeat_error
             FROM heartbeat_state WHERE id = ?1",
            params![SINGLETON_ID],
            |row| {
                let start_str: Option<String> = row.get(0)?;
                let finish_str: Option<String> = row.get(1)?;
                Ok(HeartbeatState {
                    last_start_at: start_str
                        .map(|s| from_text(&s))
                        .transpose()
                        .map_err(|e| {
                            rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
                        })?,
                    last_finish_at: finish_str
                        .map(|s| from_text(&s))
                        .transpose()
                        .map_err(|e| {
                            rusqlite::Error::InvalidColumnType(1, e.to_string(), rusqlite::types::Type::Text)
                        })?,
                    last_enqueued_count: row.get::<_, i64>(2)? as u64,
                    last_heartbeat_error: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| db_err("reading heartbeat state", e))?;
    Ok(row.unwrap_or_default())
}

#[cfg(test)]
#[path = "tests/heartbeat_state_tests.rs"]
mod tests;
