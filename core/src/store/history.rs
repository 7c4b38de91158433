//! Bounded `RunHistory` archive: terminal snapshots, pruned by age and row
//! cap.

use super::db_err;
use crate::sqltime::{from_text, to_text};
use rusqlite::{params, Connection};
use shared::model::{Run, RunHistoryEntry, RunStatus};
use std::str::FromStr;

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS run_history (
            run_id         TEXT PRIMARY KEY,
            schedule_id    TEXT,
            profile_id     TEXT NOT NULL,
            status         TEXT NOT NULL,
            planned_fire_at TEXT,
            queued_at      TEXT NOT NULL,
            started_at     TEXT,
            finished_at    TEXT NOT NULL,
            summary        TEXT,
            error          TEXT
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating run_history", e))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_run_history_finished ON run_history(finished_at)",
        [],
    )
    .map_err(|e| db_err("creating idx_run_history_finished", e))?;

    Ok(())
}

/// Archives a just-terminated Run. Requires `run.finished_at` to be set.
pub fn archive(conn: &Connection, run: &Run) -> shared::Result<()> {
    let finished_at = run
        .finished_at
        .ok_or_else(|| shared::CoreError::Validation("archived run missing finished_at".into()))?;

    conn.execute(
        r#"
        INSERT INTO run_history (run_id, schedule_id, profile_id, status, planned_fire_at,
                                  queued_at, started_at, finished_at, summary, error)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(run_id) DO UPDATE SET
            status = excluded.status,
            finished_at = excluded.finished_at,
            summary = excluded.summary,
            error = excluded.error
        "#,
        params![
            run.run_id,
            run.schedule_id,
            run.profile_id,
            run.status.to_string(),
            run.planned_fire_at.map(to_text),
            to_text(run.queued_at),
            run.started_at.map(to_text),
            to_text(finished_at),
            run.summary,
            run.error,
        ],
    )
    .map_err(|e| db_err("archiving run to history", e))?;
    Ok(())
}

/// Deletes the live `runs` row for a just-archived terminal Run, matching
/// the data model's "the row is removed" lifecycle note for Run.
pub fn remove_live_run(conn: &Connection, run_id: &str) -> shared::Result<()> {
    conn.execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])
        .map_err(|e| db_err("removing live run after archive", e))?;
    Ok(())
}

/// Deletes history rows older than `retention_days`, then trims down to
/// `max_rows` newest-first if still over cap.
pub fn prune(conn: &Connection, retention_days: u32, max_rows: u64) -> shared::Result<u64> {
    let cutoff = shared::utils::now() - chrono::Duration::days(retention_days as i64);
    let by_age = conn
        .execute(
            "DELETE FROM run_history WHERE finished_at < ?1",
            params![to_text(cutoff)],
        )
        .map_err(|e| db_err("pruning history by age", e))? as u64;

    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM run_history", [], |row| row.get(0))
        .map_err(|e| db_err("counting history rows", e))?;

    let mut by_cap = 0u64;
    if (total as u64) > max_rows {
        let excess = total as u64 - max_rows;
        by_cap = conn
            .execute(
                r#"
                DELETE FROM run_history WHERE run_id IN (
                    SELECT run_id FROM run_history ORDER BY finished_at ASC LIMIT ?1
                )
                "#,
                params![excess as i64],
            )
            .map_err(|e| db_err("pruning history by cap", e))? as u64;
    }

    Ok(by_age + by_cap)
}

pub fn list_recent(conn: &Connection, limit: u64) -> shared::Result<Vec<RunHistoryEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT run_id, schedule_id, profile_id, status, planned_fire_at, queued_at,
                    started_at, finished_at, summary, error
             FROM run_history ORDER BY finished_at DESC LIMIT ?1",
        )
        .map_err(|e| db_err("preparing recent history", e))?;
    let rows = stmt
        .query_map(params![limit as i64], row_to_entry)
        .map_err(|e| db_err("listing recent history", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading history row", e))?);
    }
    Ok(out)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunHistoryEntry> {
    let status_str: String = row.get(3)?;
    let planned_fire_str: Option<String> = row.get(4)?;
    let queued_at_str: String = row.get(5)?;
    let started_at_str: Option<String> = row.get(6)?;
    let finished_at_str: String = row.get(7)?;

    Ok(RunHistoryEntry {
        run_id: row.get(0)?,
        schedule_id: row.get(1)?,
        profile_id: row.get(2)?,
        status: RunStatus::from_str(&status_str).map_err(to_sql_err)?,
        planned_fire_at: planned_fire_str
            .map(|s| from_text(&s))
            .transpose()
            .map_err(|e| to_sql_err(format!("{e}")))?,
        queued_at: from_text(&queued_at_str).map_err(|e| to_sql_err(format!("{e}")))?,
        started_at: started_at_str
            .map(|s| from_text(&s))
            .transpose()
            .map_err(|e| to_sql_err(format!("{e}")))?,
        finished_at: from_text(&finished_at_str).map_err(|e| to_sql_err(format!("{e}")))?,
        summary: row.get(8)?,
        error: row.get(9)?,
    })
}

fn to_sql_err(e: impl ToString) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
