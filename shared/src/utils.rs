//! Small helpers shared by the store, scheduler, and provider-queue code:
//! id generation, day-string handling, and backoff arithmetic.

use chrono::{DateTime, NaiveDate, Utc};

/// Generates a fresh UUID v4 string, used for every primary key in the data
/// model (`task_id`, `schedule_id`, `run_id`, `job_id`, `event_id`).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The current instant in UTC. A thin wrapper so call sites read
/// `utils::now()` alongside `utils::new_id()` rather than mixing in a direct
/// `chrono::Utc::now()` import.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Formats a UTC day as the `YYYY-MM-DD` string used for `DayMemoryEvent.day`
/// and `SummaryJob.day`.
pub fn day_string(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// The current day string, i.e. `day_string(now())`.
pub fn today_string() -> String {
    day_string(Utc::now())
}

/// Parses a `YYYY-MM-DD` day string back into a date, for sweep comparisons
/// against "today".
pub fn parse_day(day: &str) -> crate::Result<NaiveDate> {
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| crate::CoreError::Validation(format!("invalid day '{day}': {e}")).into())
}

/// Whether `day` is strictly before the current UTC day — the condition for
/// finalizing a summary.
pub fn is_prior_day(day: &str) -> bool {
    match parse_day(day) {
        Ok(d) => d < Utc::now().date_naive(),
        Err(_) => false,
    }
}

/// Linear backoff used by provider queues: `base * attempt`.
pub fn linear_backoff_sec(base_sec: f64, attempt: u32) -> f64 {
    base_sec * attempt.max(1) as f64
}

/// Validates a task/schedule identifier: non-empty, reasonable length,
/// restricted charset. Used at the Control API boundary before a write ever
/// reaches the store.
pub fn validate_identifier(kind: &str, id: &str) -> crate::Result<()> {
    if id.is_empty() {
        return Err(crate::CoreError::Validation(format!("{kind} id cannot be empty")).into());
    }
    if id.len() > 128 {
        return Err(
            crate::CoreError::Validation(format!("{kind} id cannot exceed 128 characters")).into(),
        );
    }
    if !id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(crate::CoreError::Validation(format!(
            "{kind} id can only contain alphanumeric characters, hyphens, and underscores"
        ))
        .into());
    }
    Ok(())
}

/// Truncates a string to at most `max_len` bytes, appending an ellipsis —
/// used when logging/echoing task summaries that might be unbounded.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

/// Formats a duration for log lines (`"12.3ms"`, `"1.5s"`, `"2.0m"`).
pub fn format_duration(duration_ms: f64) -> String {
    if duration_ms < 1000.0 {
        format!("{duration_ms:.1}ms")
    } else if duration_ms < 60_000.0 {
        format!("{:.1}s", duration_ms / 1000.0)
    } else {
        format!("{:.1}m", duration_ms / 60_000.0)
    }
}

#[cfg(test)]
#[path = "tests/utils_tests.rs"]
mod tests;
