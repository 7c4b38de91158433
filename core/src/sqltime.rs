//! Conversions between `chrono::DateTime<Utc>` and the ISO-8601 `TEXT`
//! columns every timestamp is stored as.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Wraps a `DateTime<Utc>` so it can be bound as a rusqlite parameter and
/// read back from a row without every call site spelling out
/// `to_rfc3339()`/`parse_from_rfc3339()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SqlTime(pub DateTime<Utc>);

impl From<DateTime<Utc>> for SqlTime {
    fn from(dt: DateTime<Utc>) -> Self {
        SqlTime(dt)
    }
}

impl From<SqlTime> for DateTime<Utc> {
    fn from(t: SqlTime) -> Self {
        t.0
    }
}

impl ToSql for SqlTime {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.to_rfc3339()))
    }
}

impl FromSql for SqlTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        DateTime::parse_from_rfc3339(s)
            .map(|dt| SqlTime(dt.with_timezone(&Utc)))
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Formats for direct binding when a plain `&str` parameter is more
/// convenient than a `SqlTime` wrapper value.
pub fn to_text(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parses a stored ISO-8601 string back into a `DateTime<Utc>`.
pub fn from_text(s: &str) -> shared::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| shared::CoreError::Database(format!("invalid timestamp '{s}': {e}")).into())
}

#[cfg(test)]
#[path = "tests/sqltime_tests.rs"]
mod tests;
