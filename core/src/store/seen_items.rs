//! `TaskSeenItem` idempotency ledger.

use super::db_err;
use crate::sqltime::{from_text, to_text};
use rusqlite::{params, Connection, OptionalExtension};
use shared::model::TaskSeenItem;

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_seen_items (
            task_id       TEXT NOT NULL,
            provider      TEXT NOT NULL,
            item_key      TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            last_seen_at  TEXT NOT NULL,
            seen_count    INTEGER NOT NULL DEFAULT 1,
            metadata_json TEXT,
            PRIMARY KEY (task_id, provider, item_key)
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating task_seen_items", e))?;
    Ok(())
}

/// Marks an item seen: inserts on first observation, otherwise bumps
/// `last_seen_at`/`seen_count`.
pub fn mark(
    conn: &Connection,
    task_id: &str,
    provider: &str,
    item_key: &str,
    metadata_json: Option<&str>,
) -> shared::Result<()> {
    let now = to_text(shared::utils::now());
    conn.execute(
        r#"
        INSERT INTO task_seen_items (task_id, provider, item_key, first_seen_at, last_seen_at, seen_count, metadata_json)
        VALUES (?1, ?2, ?3, ?4, ?4, 1, ?5)
        ON CONFLICT(task_id, provider, item_key) DO UPDATE SET
            last_seen_at = ?4,
            seen_count = seen_count + 1,
            metadata_json = COALESCE(?5, task_seen_items.metadata_json)
        "#,
        params![task_id, provider, item_key, now, metadata_json],
    )
    .map_err(|e| db_err("marking seen item", e))?;
    Ok(())
}

pub fn has(conn: &Connection, task_id: &str, provider: &str, item_key: &str) -> shared::Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM task_seen_items WHERE task_id = ?1 AND provider = ?2 AND item_key = ?3",
            params![task_id, provider, item_key],
            |row| row.get(0),
        )
        .map_err(|e| db_err("checking seen item", e))?;
    Ok(count > 0)
}

pub fn get(
    conn: &Connection,
    task_id: &str,
    provider: &str,
    item_key: &str,
) -> shared::Result<Option<TaskSeenItem>> {
    conn.query_row(
        "SELECT task_id, provider, item_key, first_seen_at, last_seen_at, seen_count, metadata_json
         FROM task_seen_items WHERE task_id = ?1 AND provider = ?2 AND item_key = ?3",
        params![task_id, provider, item_key],
        row_to_item,
    )
    .optional()
    .map_err(|e| db_err("reading seen item", e))
}

/// Recency-ordered preload of a task's recently seen items, per provider.
/// Ordered by `last_seen_at DESC` — the "most recently *re*-observed"
/// variant (see DESIGN.md for why this was chosen over `first_seen_at`).
pub fn list_recent(
    conn: &Connection,
    task_id: &str,
    provider: &str,
    limit: u64,
) -> shared::Result<Vec<TaskSeenItem>> {
    let mut stmt = conn
        .prepare(
            "SELECT task_id, provider, item_key, first_seen_at, last_seen_at, seen_count, metadata_json
             FROM task_seen_items WHERE task_id = ?1 AND provider = ?2
             ORDER BY last_seen_at DESC LIMIT ?3",
        )
        .map_err(|e| db_err("preparing recent seen items", e))?;
    let rows = stmt
        .query_map(params![task_id, provider, limit as i64], row_to_item)
        .map_err(|e| db_err("listing recent seen items", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading seen item row", e))?);
    }
    Ok(out)
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskSeenItem> {
    let first_seen_str: String = row.get(3)?;
    let last_seen_str: String = row.get(4)?;
    Ok(TaskSeenItem {
        task_id: row.get(0)?,
        provider: row.get(1)?,
        item_key: row.get(2)?,
        first_seen_at: from_text(&first_seen_str)
            .map_err(|e| rusqlite::Error::InvalidColumnType(3, e.to_string(), rusqlite::types::Type::Text))?,
        last_seen_at: from_text(&last_seen_str)
            .map_err(|e| rusqlite::Error::InvalidColumnType(4, e.to_string(), rusqlite::types::Type::Text))?,
        seen_count: row.get::<_, i64>(5)? as u64,
        metadata_json: row.get(6)?,
    })
}

#[cfg(test)]
#[path = "tests/seen_items_tests.rs"]
mod tests;
