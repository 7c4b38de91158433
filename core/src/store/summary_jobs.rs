//! Deduped per-day `SummaryJob` queue.

use super::db_err;
use rusqlite::{params, Connection, OptionalExtension};
use shared::model::{SummaryJob, SummaryJobStatus};
use std::str::FromStr;

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS summary_jobs (
            job_id        TEXT PRIMARY KEY,
            day           TEXT NOT NULL,
            status        TEXT NOT NULL,
            reason        TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating summary_jobs", e))?;

    conn.execute(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_summary_jobs_active_day
        ON summary_jobs(day) WHERE status IN ('queued', 'running')
        "#,
        [],
    )
    .map_err(|e| db_err("creating idx_summary_jobs_active_day", e))?;

    Ok(())
}

/// Enqueues a job for `day` unless one is already `queued`/`running` — the
/// partial unique index makes the insert a silent no-op collision rather
/// than an error path the caller needs to branch on.
pub fn enqueue(conn: &Connection, day: &str, reason: &str) -> shared::Result<Option<String>> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT job_id FROM summary_jobs WHERE day = ?1 AND status IN ('queued', 'running')",
            params![day],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| db_err("checking active summary job", e))?;
    if existing.is_some() {
        return Ok(None);
    }

    let job_id = shared::utils::new_id();
    conn.execute(
        "INSERT INTO summary_jobs (job_id, day, status, reason, attempt_count) VALUES (?1, ?2, 'queued', ?3, 0)",
        params![job_id, day, reason],
    )
    .map_err(|e| db_err("enqueuing summary job", e))?;
    Ok(Some(job_id))
}

/// Claims up to `limit` queued jobs, transitioning each to `running`.
pub fn claim_batch(conn: &Connection, limit: u32) -> shared::Result<Vec<SummaryJob>> {
    let mut stmt = conn
        .prepare("SELECT job_id FROM summary_jobs WHERE status = 'queued' ORDER BY job_id LIMIT ?1")
        .map_err(|e| db_err("preparing summary job claim", e))?;
    let job_ids: Vec<String> = stmt
        .query_map(params![limit as i64], |row| row.get(0))
        .map_err(|e| db_err("selecting summary job claim", e))?
        .collect::<Result<_, _>>()
        .map_err(|e| db_err("reading summary job claim row", e))?;
    drop(stmt);

    let mut claimed = Vec::new();
    for job_id in job_ids {
        conn.execute(
            "UPDATE summary_jobs SET status = 'running' WHERE job_id = ?1 AND status = 'queued'",
            params![job_id],
        )
        .map_err(|e| db_err("claiming summary job", e))?;
        if let Some(job) = get(conn, &job_id)? {
            claimed.push(job);
        }
    }
    Ok(claimed)
}

pub fn finish(conn: &Connection, job_id: &str, status: SummaryJobStatus) -> shared::Result<()> {
    conn.execute(
        "UPDATE summary_jobs SET status = ?1, attempt_count = attempt_count + 1 WHERE job_id = ?2",
        params![status.to_string(), job_id],
    )
    .map_err(|e| db_err("finishing summary job", e))?;
    Ok(())
}

pub fn get(conn: &Connection, job_id: &str) -> shared::Result<Option<SummaryJob>> {
    conn.query_row(
        "SELECT job_id, day, status, reason, attempt_count FROM summary_jobs WHERE job_id = ?1",
        params![job_id],
        row_to_job,
    )
    .optional()
    .map_err(|e| db_err("reading summary job", e))
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<SummaryJob> {
    let status_str: String = row.get(2)?;
    Ok(SummaryJob {
        job_id: row.get(0)?,
        day: row.get(1)?,
        status: SummaryJobStatus::from_str(&status_str).map_err(|e| {
            rusqlite::Error::InvalidColumnType(2, e.to_string(), rusqlite::types::Type::Text)
        })?,
        reason: row.get(3)?,
        attempt_count: row.get::<_, i64>(4)? as u32,
    })
}

#[cfg(test)]
#[path = "tests/summary_jobs_tests.rs"]
mod tests;
