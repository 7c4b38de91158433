//! `TaskStateKV` — atomic per-task checkpoint/cursor values.

use super::db_err;
use crate::sqltime::{from_text, to_text};
use rusqlite::{params, Connection, OptionalExtension};
use shared::model::TaskStateEntry;

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_state (
            task_id    TEXT NOT NULL,
            state_key  TEXT NOT NULL,
            value_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (task_id, state_key)
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating task_state", e))?;
    Ok(())
}

pub fn upsert(conn: &Connection, task_id: &str, state_key: &str, value_json: &str) -> shared::Result<()> {
    conn.execute(
        r#"
        INSERT INTO task_state (task_id, state_key, value_json, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(task_id, state_key) DO UPDATE SET
            value_json = excluded.value_json,
            updated_at = excluded.updated_at
        "#,
        params![task_id, state_key, value_json, to_text(shared::utils::now())],
    )
    .map_err(|e| db_err("upserting task state", e))?;
    Ok(())
}

pub fn get(conn: &Connection, task_id: &str, state_key: &str) -> shared::Result<Option<TaskStateEntry>> {
    conn.query_row(
        "SELECT task_id, state_key, value_json, updated_at FROM task_state
         WHERE task_id = ?1 AND state_key = ?2",
        params![task_id, state_key],
        |row| {
            let updated_str: String = row.get(3)?;
            Ok(TaskStateEntry {
                task_id: row.get(0)?,
                state_key: row.get(1)?,
                value_json: row.get(2)?,
                updated_at: from_text(&updated_str).map_err(|e| {
                    rusqlite::Error::InvalidColumnType(3, e.to_string(), rusqlite::types::Type::Text)
                })?,
            })
        },
    )
    .optional()
    .map_err(|e| db_err("reading task state", e))
}

#[cfg(test)]
#[path = "tests/task_state_tests.rs"]
mod tests;
