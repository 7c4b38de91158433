//! `Run` lifecycle rows: enqueue, claim, transition, and the no-overlap
//! check that both the Heartbeat and the Dispatcher rely on.

use super::db_err;
use crate::sqltime::{from_text, to_text};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use shared::model::{Run, RunStatus};
use std::str::FromStr;

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id         TEXT PRIMARY KEY,
            schedule_id    TEXT REFERENCES schedules(schedule_id) ON DELETE SET NULL,
            profile_id     TEXT NOT NULL REFERENCES task_profiles(task_id) ON DELETE CASCADE,
            status         TEXT NOT NULL,
            planned_fire_at TEXT,
            queued_at      TEXT NOT NULL,
            started_at     TEXT,
            finished_at    TEXT,
            summary        TEXT,
            error          TEXT,
            payload_json   TEXT
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating runs", e))?;

    conn.execute(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_schedule_fire
        ON runs(schedule_id, planned_fire_at)
        WHERE schedule_id IS NOT NULL AND planned_fire_at IS NOT NULL
        "#,
        [],
    )
    .map_err(|e| db_err("creating idx_runs_schedule_fire", e))?;

    conn.execute(
        r#"
        CREATE INDEX IF NOT EXISTS idx_runs_profile_live
        ON runs(profile_id)
        WHERE status IN ('queued', 'running', 'waiting_for_user')
        "#,
        [],
    )
    .map_err(|e| db_err("creating idx_runs_profile_live", e))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_queued_at ON runs(queued_at) WHERE status = 'queued'",
        [],
    )
    .map_err(|e| db_err("creating idx_runs_queued_at", e))?;

    Ok(())
}

/// Whether `profile_id` already has a live Run (`queued`/`running`/
/// `waiting_for_user`) — the no-overlap check used at both enqueue and
/// claim time.
pub fn has_live_run(conn: &Connection, profile_id: &str) -> shared::Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM runs WHERE profile_id = ?1
             AND status IN ('queued', 'running', 'waiting_for_user')",
            params![profile_id],
            |row| row.get(0),
        )
        .map_err(|e| db_err("checking no-overlap", e))?;
    Ok(count > 0)
}

/// Inserts a queued Run inside the caller's transaction. Returns the new
/// `run_id`. Violates the unique partial index (and so fails) if the
/// `(schedule_id, planned_fire_at)` pair was already enqueued.
pub fn insert_queued(
    tx: &Transaction<'_>,
    schedule_id: Option<&str>,
    profile_id: &str,
    planned_fire_at: Option<DateTime<Utc>>,
    payload_json: Option<&str>,
) -> shared::Result<String> {
    let run_id = shared::utils::new_id();
    let queued_at = shared::utils::now();
    tx.execute(
        r#"
        INSERT INTO runs (run_id, schedule_id, profile_id, status, planned_fire_at, queued_at, payload_json)
        VALUES (?1, ?2, ?3, 'queued', ?4, ?5, ?6)
        "#,
        params![
            run_id,
            schedule_id,
            profile_id,
            planned_fire_at.map(to_text),
            to_text(queued_at),
            payload_json,
        ],
    )
    .map_err(|e| db_err("inserting queued run", e))?;
    Ok(run_id)
}

/// Same as [`insert_queued`] but outside a caller-managed transaction, used
/// by manual triggers and the agentic-enqueue endpoint which do not need a
/// cursor update alongside the insert.
pub fn enqueue(
    conn: &Connection,
    schedule_id: Option<&str>,
    profile_id: &str,
    planned_fire_at: Option<DateTime<Utc>>,
    payload_json: Option<&str>,
) -> shared::Result<String> {
    let run_id = shared::utils::new_id();
    let queued_at = shared::utils::now();
    conn.execute(
        r#"
        INSERT INTO runs (run_id, schedule_id, profile_id, status, planned_fire_at, queued_at, payload_json)
        VALUES (?1, ?2, ?3, 'queued', ?4, ?5, ?6)
        "#,
        params![
            run_id,
            schedule_id,
            profile_id,
            planned_fire_at.map(to_text),
            to_text(queued_at),
            payload_json,
        ],
    )
    .map_err(|e| db_err("enqueuing run", e))?;
    Ok(run_id)
}

/// Atomically claims the oldest `queued` Run (FIFO by `queued_at`) whose
/// profile has no other live Run, transitioning it to `running`. A
/// correlated `NOT EXISTS` subquery does the no-overlap re-check and the
/// claim in one statement, so the race described in the data model's
/// Dispatcher step 2 cannot actually manifest under the Gateway's
/// single-writer serialization — see DESIGN.md.
pub fn claim_next_queued(conn: &Connection) -> shared::Result<Option<Run>> {
    let started_at = shared::utils::now();
    let affected_run_id: Option<String> = conn
        .query_row(
            r#"
            UPDATE runs SET status = 'running', started_at = ?1
            WHERE run_id = (
                SELECT r.run_id FROM runs r
                WHERE r.status = 'queued'
                AND NOT EXISTS (
                    SELECT 1 FROM runs o
                    WHERE o.profile_id = r.profile_id
                    AND o.run_id != r.run_id
                    AND o.status IN ('running', 'waiting_for_user')
                )
                ORDER BY r.queued_at ASC
                LIMIT 1
            )
            RETURNING run_id
            "#,
            params![to_text(started_at)],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| db_err("claiming next queued run", e))?;

    match affected_run_id {
        Some(run_id) => get(conn, &run_id),
        None => Ok(None),
    }
}

pub fn get(conn: &Connection, run_id: &str) -> shared::Result<Option<Run>> {
    conn.query_row(
        "SELECT run_id, schedule_id, profile_id, status, planned_fire_at, queued_at,
                started_at, finished_at, summary, error, payload_json
         FROM runs WHERE run_id = ?1",
        params![run_id],
        row_to_run,
    )
    .optional()
    .map_err(|e| db_err("reading run", e))
}

pub fn list_active(conn: &Connection) -> shared::Result<Vec<Run>> {
    let mut stmt = conn
        .prepare(
            "SELECT run_id, schedule_id, profile_id, status, planned_fire_at, queued_at,
                    started_at, finished_at, summary, error, payload_json
             FROM runs WHERE status IN ('queued', 'running', 'waiting_for_user')
             ORDER BY queued_at",
        )
        .map_err(|e| db_err("preparing active runs", e))?;
    let rows = stmt
        .query_map([], row_to_run)
        .map_err(|e| db_err("listing active runs", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading active run row", e))?);
    }
    Ok(out)
}

pub fn list_waiting(conn: &Connection) -> shared::Result<Vec<Run>> {
    let mut stmt = conn
        .prepare(
            "SELECT run_id, schedule_id, profile_id, status, planned_fire_at, queued_at,
                    started_at, finished_at, summary, error, payload_json
             FROM runs WHERE status = 'waiting_for_user'
             ORDER BY queued_at",
        )
        .map_err(|e| db_err("preparing waiting runs", e))?;
    let rows = stmt
        .query_map([], row_to_run)
        .map_err(|e| db_err("listing waiting runs", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading waiting run row", e))?);
    }
    Ok(out)
}

/// Active Runs for one profile — used by the no-overlap check at enqueue
/// time and by `GET /api/central/runs` previews.
pub fn list_active_by_profile(conn: &Connection, profile_id: &str) -> shared::Result<Vec<Run>> {
    let mut stmt = conn
        .prepare(
            "SELECT run_id, schedule_id, profile_id, status, planned_fire_at, queued_at,
                    started_at, finished_at, summary, error, payload_json
             FROM runs WHERE profile_id = ?1
             AND status IN ('queued', 'running', 'waiting_for_user')
             ORDER BY queued_at",
        )
        .map_err(|e| db_err("preparing active runs by profile", e))?;
    let rows = stmt
        .query_map(params![profile_id], row_to_run)
        .map_err(|e| db_err("listing active runs by profile", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading active run by profile row", e))?);
    }
    Ok(out)
}

/// Transitions a Run to a terminal status (`done`/`failed`/`blocked`),
/// stamping `finished_at`.
pub fn finish(
    conn: &Connection,
    run_id: &str,
    status: RunStatus,
    summary: Option<&str>,
    error: Option<&str>,
) -> shared::Result<()> {
    let finished_at = shared::utils::now();
    conn.execute(
        "UPDATE runs SET status = ?1, finished_at = ?2, summary = ?3, error = ?4 WHERE run_id = ?5",
        params![status.to_string(), to_text(finished_at), summary, error, run_id],
    )
    .map_err(|e| db_err("finishing run", e))?;
    Ok(())
}

/// Marks a Run `waiting_for_user`, persisting the serialized
/// `WaitingContract` into `payload_json`.
pub fn mark_waiting(conn: &Connection, run_id: &str, payload_json: &str) -> shared::Result<()> {
    conn.execute(
        "UPDATE runs SET status = 'waiting_for_user', payload_json = ?1 WHERE run_id = ?2",
        params![payload_json, run_id],
    )
    .map_err(|e| db_err("marking run waiting", e))?;
    Ok(())
}

/// Resumes a waiting Run back to `queued`, merging the user's response
/// into `payload_json` (the caller has already produced the merged JSON).
pub fn resume_to_queued(conn: &Connection, run_id: &str, payload_json: &str) -> shared::Result<()> {
    conn.execute(
        "UPDATE runs SET status = 'queued', payload_json = ?1 WHERE run_id = ?2",
        params![payload_json, run_id],
    )
    .map_err(|e| db_err("resuming run", e))?;
    Ok(())
}

/// Direct transition of a queued Run to `blocked` — the kill path for
/// runs that never started.
pub fn kill_queued(conn: &Connection, run_id: &str, error_marker: &str) -> shared::Result<bool> {
    let affected = conn
        .execute(
            "UPDATE runs SET status = 'blocked', finished_at = ?1, error = ?2
             WHERE run_id = ?3 AND status = 'queued'",
            params![to_text(shared::utils::now()), error_marker, run_id],
        )
        .map_err(|e| db_err("killing queued run", e))?;
    Ok(affected > 0)
}

/// Expires a `waiting_for_user` Run whose contract's `expires_at` has
/// passed, to `blocked` with the timeout marker.
pub fn expire_waiting(conn: &Connection, run_id: &str) -> shared::Result<()> {
    finish(
        conn,
        run_id,
        RunStatus::Blocked,
        None,
        Some(shared::model::error_markers::WAITING_FOR_USER_TIMEOUT),
    )
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let status_str: String = row.get(3)?;
    let planned_fire_str: Option<String> = row.get(4)?;
    let queued_at_str: String = row.get(5)?;
    let started_at_str: Option<String> = row.get(6)?;
    let finished_at_str: Option<String> = row.get(7)?;

    Ok(Run {
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
        finished_at: finished_at_str
            .map(|s| from_text(&s))
            .transpose()
            .map_err(|e| to_sql_err(format!("{e}")))?,
        summary: row.get(8)?,
        error: row.get(9)?,
        payload_json: row.get(10)?,
    })
}

fn to_sql_err(e: impl ToString) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
}

#[cfg(test)]
#[path = "tests/runs_tests.rs"]
mod tests;
