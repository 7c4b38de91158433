//! `Schedule` CRUD, including the calendar-mode child rows and the cursor
//! fields the Heartbeat advances transactionally.

use super::db_err;
use crate::sqltime::{from_text, to_text};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use shared::model::{CalendarEntry, MisfirePolicy, RunStatus, Schedule, ScheduleMode};
use std::str::FromStr;

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            schedule_id         TEXT PRIMARY KEY,
            profile_id          TEXT NOT NULL REFERENCES task_profiles(task_id) ON DELETE CASCADE,
            enabled             INTEGER NOT NULL DEFAULT 1,
            mode                TEXT NOT NULL,
            run_frequency_minutes INTEGER,
            timezone            TEXT NOT NULL DEFAULT 'UTC',
            misfire_policy      TEXT NOT NULL,
            execution_order     INTEGER NOT NULL DEFAULT 0,
            next_run_at         TEXT NOT NULL,
            last_planned_run_at TEXT,
            last_run_summary    TEXT,
            last_run_status     TEXT
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating schedules", e))?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schedule_calendar_entries (
            schedule_id  TEXT NOT NULL REFERENCES schedules(schedule_id) ON DELETE CASCADE,
            time_of_day  TEXT NOT NULL,
            day_of_week  INTEGER NOT NULL,
            PRIMARY KEY (schedule_id, time_of_day, day_of_week)
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating schedule_calendar_entries", e))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules(next_run_at) WHERE enabled = 1",
        [],
    )
    .map_err(|e| db_err("creating idx_schedules_due", e))?;

    Ok(())
}

pub fn upsert(conn: &Connection, schedule: &Schedule) -> shared::Result<()> {
    conn.execute(
        r#"
        INSERT INTO schedules (
            schedule_id, profile_id, enabled, mode, run_frequency_minutes,
            timezone, misfire_policy, execution_order, next_run_at,
            last_planned_run_at, last_run_summary, last_run_status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(schedule_id) DO UPDATE SET
            profile_id = excluded.profile_id,
            enabled = excluded.enabled,
            mode = excluded.mode,
            run_frequency_minutes = excluded.run_frequency_minutes,
            timezone = excluded.timezone,
            misfire_policy = excluded.misfire_policy,
            execution_order = excluded.execution_order,
            next_run_at = excluded.next_run_at,
            last_planned_run_at = excluded.last_planned_run_at,
            last_run_summary = excluded.last_run_summary,
            last_run_status = excluded.last_run_status
        "#,
        params![
            schedule.schedule_id,
            schedule.profile_id,
            schedule.enabled,
            schedule.mode.to_string(),
            schedule.run_frequency_minutes,
            schedule.timezone,
            schedule.misfire_policy.to_string(),
            schedule.execution_order,
            to_text(schedule.next_run_at),
            schedule.last_planned_run_at.map(to_text),
            schedule.last_run_summary,
            schedule.last_run_status.map(|s| s.to_string()),
        ],
    )
    .map_err(|e| db_err("upserting schedule", e))?;

    conn.execute(
        "DELETE FROM schedule_calendar_entries WHERE schedule_id = ?1",
        params![schedule.schedule_id],
    )
    .map_err(|e| db_err("clearing calendar entries", e))?;

    for entry in &schedule.calendar_entries {
        conn.execute(
            "INSERT INTO schedule_calendar_entries (schedule_id, time_of_day, day_of_week) VALUES (?1, ?2, ?3)",
            params![schedule.schedule_id, entry.time_of_day, entry.day_of_week],
        )
        .map_err(|e| db_err("inserting calendar entry", e))?;
    }

    Ok(())
}

pub fn delete(conn: &Connection, schedule_id: &str) -> shared::Result<bool> {
    let affected = conn
        .execute(
            "DELETE FROM schedules WHERE schedule_id = ?1",
            params![schedule_id],
        )
        .map_err(|e| db_err("deleting schedule", e))?;
    Ok(affected > 0)
}

pub fn get(conn: &Connection, schedule_id: &str) -> shared::Result<Option<Schedule>> {
    let base = conn
        .query_row(
            "SELECT schedule_id, profile_id, enabled, mode, run_frequency_minutes,
                    timezone, misfire_policy, execution_order, next_run_at,
                    last_planned_run_at, last_run_summary, last_run_status
             FROM schedules WHERE schedule_id = ?1",
            params![schedule_id],
            row_to_schedule,
        )
        .optional()
        .map_err(|e| db_err("reading schedule", e))?;

    match base {
        Some(mut schedule) => {
            schedule.calendar_entries = calendar_entries(conn, schedule_id)?;
            Ok(Some(schedule))
        }
        None => Ok(None),
    }
}

pub fn list(conn: &Connection) -> shared::Result<Vec<Schedule>> {
    let mut stmt = conn
        .prepare(
            "SELECT schedule_id, profile_id, enabled, mode, run_frequency_minutes,
                    timezone, misfire_policy, execution_order, next_run_at,
                    last_planned_run_at, last_run_summary, last_run_status
             FROM schedules ORDER BY execution_order, schedule_id",
        )
        .map_err(|e| db_err("preparing schedules list", e))?;
    let rows = stmt
        .query_map([], row_to_schedule)
        .map_err(|e| db_err("listing schedules", e))?;
    let mut out = Vec::new();
    for row in rows {
        let mut schedule = row.map_err(|e| db_err("reading schedule row", e))?;
        schedule.calendar_entries = calendar_entries(conn, &schedule.schedule_id)?;
        out.push(schedule);
    }
    Ok(out)
}

/// Schedules due for a tick: enabled and `next_run_at <= now`, ordered by
/// `(execution_order, schedule_id)` per the Heartbeat's read algorithm.
pub fn list_due(conn: &Connection, now: DateTime<Utc>) -> shared::Result<Vec<Schedule>> {
    let mut stmt = conn
        .prepare(
            "SELECT schedule_id, profile_id, enabled, mode, run_frequency_minutes,
                    timezone, misfire_policy, execution_order, next_run_at,
                    last_planned_run_at, last_run_summary, last_run_status
             FROM schedules
             WHERE enabled = 1 AND next_run_at <= ?1
             ORDER BY execution_order, schedule_id",
        )
        .map_err(|e| db_err("preparing due schedules", e))?;
    let rows = stmt
        .query_map(params![to_text(now)], row_to_schedule)
        .map_err(|e| db_err("listing due schedules", e))?;
    let mut out = Vec::new();
    for row in rows {
        let mut schedule = row.map_err(|e| db_err("reading due schedule row", e))?;
        schedule.calendar_entries = calendar_entries(conn, &schedule.schedule_id)?;
        out.push(schedule);
    }
    Ok(out)
}

fn calendar_entries(conn: &Connection, schedule_id: &str) -> shared::Result<Vec<CalendarEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT time_of_day, day_of_week FROM schedule_calendar_entries
             WHERE schedule_id = ?1 ORDER BY day_of_week, time_of_day",
        )
        .map_err(|e| db_err("preparing calendar entries", e))?;
    let rows = stmt
        .query_map(params![schedule_id], |row| {
            Ok(CalendarEntry {
                time_of_day: row.get(0)?,
                day_of_week: row.get::<_, i64>(1)? as u8,
            })
        })
        .map_err(|e| db_err("listing calendar entries", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading calendar entry row", e))?);
    }
    Ok(out)
}

/// Advances a schedule's cursor and last-run metadata inside the
/// Heartbeat's tick transaction (§4.3 step 5).
pub fn advance_cursor(
    tx: &Transaction<'_>,
    schedule_id: &str,
    next_run_at: DateTime<Utc>,
    last_planned_run_at: DateTime<Utc>,
) -> shared::Result<()> {
    tx.execute(
        "UPDATE schedules SET next_run_at = ?1, last_planned_run_at = ?2 WHERE schedule_id = ?3",
        params![to_text(next_run_at), to_text(last_planned_run_at), schedule_id],
    )
    .map_err(|e| db_err("advancing schedule cursor", e))?;
    Ok(())
}

/// Records the outcome of the schedule's most recently finished Run,
/// independent of cursor advancement.
pub fn record_last_run(
    conn: &Connection,
    schedule_id: &str,
    status: RunStatus,
    summary: Option<&str>,
) -> shared::Result<()> {
    conn.execute(
        "UPDATE schedules SET last_run_status = ?1, last_run_summary = ?2 WHERE schedule_id = ?3",
        params![status.to_string(), summary, schedule_id],
    )
    .map_err(|e| db_err("recording schedule last-run metadata", e))?;
    Ok(())
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let mode_str: String = row.get(3)?;
    let misfire_str: String = row.get(6)?;
    let last_status_str: Option<String> = row.get(11)?;
    let last_planned_str: Option<String> = row.get(9)?;
    let next_run_str: String = row.get(8)?;

    Ok(Schedule {
        schedule_id: row.get(0)?,
        profile_id: row.get(1)?,
        enabled: row.get(2)?,
        mode: ScheduleMode::from_str(&mode_str).map_err(to_sql_err)?,
        run_frequency_minutes: row.get::<_, Option<i64>>(4)?.map(|v| v as u32),
        calendar_entries: Vec::new(),
        timezone: row.get(5)?,
        misfire_policy: MisfirePolicy::from_str(&misfire_str).map_err(to_sql_err)?,
        execution_order: row.get(7)?,
        next_run_at: from_text(&next_run_str).map_err(|e| to_sql_err(format!("{e}")))?,
        last_planned_run_at: last_planned_str
            .map(|s| from_text(&s))
            .transpose()
            .map_err(|e| to_sql_err(format!("{e}")))?,
        last_run_summary: row.get(10)?,
        last_run_status: last_status_str
            .map(|s| RunStatus::from_str(&s))
            .transpose()
            .map_err(to_sql_err)?,
    })
}

fn to_sql_err(e: impl ToString) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
}

#[cfg(test)]
#[path = "tests/schedules_tests.rs"]
mod tests;
