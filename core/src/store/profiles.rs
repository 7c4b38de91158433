//! `TaskProfile` CRUD.

use super::db_err;
use rusqlite::{params, Connection, OptionalExtension};
use shared::model::{RetryPolicy, TaskKind, TaskProfile};

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_profiles (
            task_id      TEXT PRIMARY KEY,
            kind         TEXT NOT NULL,
            entrypoint   TEXT NOT NULL,
            queue_group  TEXT,
            timeout_sec  INTEGER NOT NULL,
            max_attempts INTEGER NOT NULL DEFAULT 1,
            enabled      INTEGER NOT NULL DEFAULT 1
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating task_profiles", e))?;
    Ok(())
}

pub fn upsert(conn: &Connection, profile: &TaskProfile) -> shared::Result<()> {
    conn.execute(
        r#"
        INSERT INTO task_profiles (task_id, kind, entrypoint, queue_group, timeout_sec, max_attempts, enabled)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(task_id) DO UPDATE SET
            kind = excluded.kind,
            entrypoint = excluded.entrypoint,
            queue_group = excluded.queue_group,
            timeout_sec = excluded.timeout_sec,
            max_attempts = excluded.max_attempts,
            enabled = excluded.enabled
        "#,
        params![
            profile.task_id,
            profile.kind.to_string(),
            profile.entrypoint,
            profile.queue_group,
            profile.timeout_sec as i64,
            profile.retry_policy.max_attempts as i64,
            profile.enabled,
        ],
    )
    .map_err(|e| db_err("upserting task_profile", e))?;
    Ok(())
}

pub fn delete(conn: &Connection, task_id: &str) -> shared::Result<bool> {
    let affected = conn
        .execute("DELETE FROM task_profiles WHERE task_id = ?1", params![task_id])
        .map_err(|e| db_err("deleting task_profile", e))?;
    Ok(affected > 0)
}

pub fn get(conn: &Connection, task_id: &str) -> shared::Result<Option<TaskProfile>> {
    conn.query_row(
        "SELECT task_id, kind, entrypoint, queue_group, timeout_sec, max_attempts, enabled
         FROM task_profiles WHERE task_id = ?1",
        params![task_id],
        row_to_profile,
    )
    .optional()
    .map_err(|e| db_err("reading task_profile", e))
}

pub fn list(conn: &Connection) -> shared::Result<Vec<TaskProfile>> {
    let mut stmt = conn
        .prepare(
            "SELECT task_id, kind, entrypoint, queue_group, timeout_sec, max_attempts, enabled
             FROM task_profiles ORDER BY task_id",
        )
        .map_err(|e| db_err("preparing task_profiles list", e))?;
    let rows = stmt
        .query_map([], row_to_profile)
        .map_err(|e| db_err("listing task_profiles", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading task_profile row", e))?);
    }
    Ok(out)
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskProfile> {
    let kind_str: String = row.get(1)?;
    let kind = parse_kind(&kind_str)?;
    Ok(TaskProfile {
        task_id: row.get(0)?,
        kind,
        entrypoint: row.get(2)?,
        queue_group: row.get(3)?,
        timeout_sec: row.get::<_, i64>(4)? as u64,
        retry_policy: RetryPolicy {
            max_attempts: row.get::<_, i64>(5)? as u32,
        },
        enabled: row.get(6)?,
    })
}

fn parse_kind(s: &str) -> rusqlite::Result<TaskKind> {
    match s {
        "script" => Ok(TaskKind::Script),
        "agentic" => Ok(TaskKind::Agentic),
        "interactive_wrapper" => Ok(TaskKind::InteractiveWrapper),
        other => Err(rusqlite::Error::InvalidColumnType(
            1,
            format!("unknown task kind '{other}'"),
            rusqlite::types::Type::Text,
        )),
    }
}

#[cfg(test)]
#[path = "tests/profiles_tests.rs"]
mod tests;
