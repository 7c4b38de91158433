//! Day-memory event log and per-day status counters.

use super::db_err;
use crate::sqltime::{from_text, to_text};
use rusqlite::{params, Connection, OptionalExtension};
use shared::model::{DayMemoryEvent, DayMemoryStatus, MemoryEventKind, MemoryLayer};
use std::str::FromStr;

pub fn create_tables(conn: &Connection) -> shared::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS day_memory_events (
            event_id   TEXT PRIMARY KEY,
            day        TEXT NOT NULL,
            event_time TEXT NOT NULL,
            session_id TEXT,
            kind       TEXT NOT NULL,
            text       TEXT NOT NULL,
            layer      TEXT NOT NULL
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating day_memory_events", e))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_day_memory_events_day ON day_memory_events(day, event_time)",
        [],
    )
    .map_err(|e| db_err("creating idx_day_memory_events_day", e))?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS day_memory_status (
            day                         TEXT PRIMARY KEY,
            total_messages              INTEGER NOT NULL DEFAULT 0,
            last_summarized_total       INTEGER NOT NULL DEFAULT 0,
            messages_since_last_summary INTEGER NOT NULL DEFAULT 0,
            summaries_count             INTEGER NOT NULL DEFAULT 0,
            is_finalized                INTEGER NOT NULL DEFAULT 0,
            last_event_at               TEXT,
            last_summary_at             TEXT
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating day_memory_status", e))?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS day_summaries (
            day        TEXT PRIMARY KEY,
            text       TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        [],
    )
    .map_err(|e| db_err("creating day_summaries", e))?;

    Ok(())
}

/// Appends one event and increments the day's status counters. Only
/// `user`/`main_agent`/milestone `task_agent_event` kinds should reach
/// this — the allowlist is enforced by the caller (§9 design note).
pub fn append_event(conn: &Connection, event: &DayMemoryEvent) -> shared::Result<()> {
    conn.execute(
        r#"
        INSERT INTO day_memory_events (event_id, day, event_time, session_id, kind, text, layer)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            event.event_id,
            event.day,
            to_text(event.event_time),
            event.session_id,
            event.kind.to_string(),
            event.text,
            event.layer.to_string(),
        ],
    )
    .map_err(|e| db_err("appending day memory event", e))?;

    conn.execute(
        r#"
        INSERT INTO day_memory_status (day, total_messages, messages_since_last_summary, last_event_at)
        VALUES (?1, 1, 1, ?2)
        ON CONFLICT(day) DO UPDATE SET
            total_messages = total_messages + 1,
            messages_since_last_summary = messages_since_last_summary + 1,
            last_event_at = ?2
        "#,
        params![event.day, to_text(event.event_time)],
    )
    .map_err(|e| db_err("updating day memory status", e))?;

    Ok(())
}

pub fn get_status(conn: &Connection, day: &str) -> shared::Result<Option<DayMemoryStatus>> {
    conn.query_row(
        "SELECT day, total_messages, last_summarized_total, messages_since_last_summary,
                summaries_count, is_finalized, last_event_at, last_summary_at
         FROM day_memory_status WHERE day = ?1",
        params![day],
        row_to_status,
    )
    .optional()
    .map_err(|e| db_err("reading day memory status", e))
}

/// Days with unsummarized messages that are not yet finalized — the sweep
/// candidate set (§4.7 Sweeps).
pub fn list_unswept_days(conn: &Connection, today: &str) -> shared::Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT day FROM day_memory_status
            WHERE is_finalized = 0 AND day < ?1 AND total_messages > last_summarized_total
            ORDER BY day
            "#,
        )
        .map_err(|e| db_err("preparing unswept days", e))?;
    let rows = stmt
        .query_map(params![today], |row| row.get::<_, String>(0))
        .map_err(|e| db_err("listing unswept days", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading unswept day row", e))?);
    }
    Ok(out)
}

pub fn raw_transcript(conn: &Connection, day: &str) -> shared::Result<Vec<DayMemoryEvent>> {
    let mut stmt = conn
        .prepare(
            "SELECT event_id, day, event_time, session_id, kind, text, layer
             FROM day_memory_events WHERE day = ?1 AND layer = 'raw'
             ORDER BY event_time ASC",
        )
        .map_err(|e| db_err("preparing raw transcript", e))?;
    let rows = stmt
        .query_map(params![day], row_to_event)
        .map_err(|e| db_err("listing raw transcript", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| db_err("reading raw transcript row", e))?);
    }
    Ok(out)
}

/// Replaces `DaySummary[day]` and resets the status counters in one
/// transaction, finalizing the day if it is strictly prior to `today`.
pub fn record_summary(
    conn: &Connection,
    day: &str,
    text: &str,
    today: &str,
) -> shared::Result<()> {
    let now = to_text(shared::utils::now());
    conn.execute(
        r#"
        INSERT INTO day_summaries (day, text, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(day) DO UPDATE SET text = excluded.text, updated_at = excluded.updated_at
        "#,
        params![day, text, now],
    )
    .map_err(|e| db_err("recording day summary", e))?;

    let finalize = if day < today { 1 } else { 0 };
    conn.execute(
        r#"
        UPDATE day_memory_status SET
            last_summarized_total = total_messages,
            messages_since_last_summary = 0,
            summaries_count = summaries_count + 1,
            last_summary_at = ?1,
            is_finalized = CASE WHEN ?2 = 1 THEN 1 ELSE is_finalized END
        WHERE day = ?3
        "#,
        params![now, finalize, day],
    )
    .map_err(|e| db_err("resetting day memory status", e))?;

    Ok(())
}

fn row_to_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<DayMemoryStatus> {
    let last_event_str: Option<String> = row.get(6)?;
    let last_summary_str: Option<String> = row.get(7)?;
    Ok(DayMemoryStatus {
        day: row.get(0)?,
        total_messages: row.get::<_, i64>(1)? as u64,
        last_summarized_total: row.get::<_, i64>(2)? as u64,
        messages_since_last_summary: row.get::<_, i64>(3)? as u64,
        summaries_count: row.get::<_, i64>(4)? as u64,
        is_finalized: row.get(5)?,
        last_event_at: last_event_str
            .map(|s| from_text(&s))
            .transpose()
            .map_err(|e| to_sql_err(format!("{e}")))?,
        last_summary_at: last_summary_str
            .map(|s| from_text(&s))
            .transpose()
            .map_err(|e| to_sql_err(format!("{e}")))?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<DayMemoryEvent> {
    let event_time_str: String = row.get(2)?;
    let kind_str: String = row.get(4)?;
    let layer_str: String = row.get(6)?;
    Ok(DayMemoryEvent {
        event_id: row.get(0)?,
        day: row.get(1)?,
        event_time: from_text(&event_time_str).map_err(|e| to_sql_err(format!("{e}")))?,
        session_id: row.get(3)?,
        kind: MemoryEventKind::from_str(&kind_str).map_err(to_sql_err)?,
        text: row.get(5)?,
        layer: match layer_str.as_str() {
            "raw" => MemoryLayer::Raw,
            "summary" => MemoryLayer::Summary,
            other => return Err(to_sql_err(format!("unknown memory layer '{other}'"))),
        },
    })
}

fn to_sql_err(e: impl ToString) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
