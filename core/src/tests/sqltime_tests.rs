use super::*;
use chrono::TimeZone;

#[test]
fn to_text_then_from_text_round_trips() {
    let dt = Utc.with_ymd_and_hms(2026, 7, 28, 12, 30, 0).unwrap();
    let text = to_text(dt);
    let parsed = from_text(&text).unwrap();
    assert_eq!(parsed, dt);
}

#[test]
fn from_text_rejects_malformed_input() {
    assert!(from_text("not-a-timestamp").is_err());
}

#[test]
fn sqltime_to_sql_and_from_sql_round_trip_through_sqlite() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute("CREATE TABLE t (ts TEXT NOT NULL)", []).unwrap();

    let dt = Utc.with_ymd_and_hms(2026, 7, 28, 8, 0, 0).unwrap();
    conn.execute("INSERT INTO t (ts) VALUES (?1)", rusqlite::params![SqlTime(dt)])
        .unwrap();

    let fetched: SqlTime = conn.query_row("SELECT ts FROM t", [], |row| row.get(0)).unwrap();
    assert_eq!(DateTime::<Utc>::from(fetched), dt);
}
