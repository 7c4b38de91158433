use super::*;
use tempfile::TempDir;

fn setup() -> (TempDir, Connection) {
    let temp_dir = TempDir::new().unwrap();
    let conn = crate::store::open(&temp_dir.path().join("zubot.db"), 5_000).unwrap();
    create_tables(&conn).unwrap();
    (temp_dir, conn)
}

#[test]
fn upsert_then_get_round_trips() {
    let (_dir, conn) = setup();
    upsert(&conn, "task-1", "cursor", "\"abc123\"").unwrap();

    let entry = get(&conn, "task-1", "cursor").unwrap().unwrap();
    assert_eq!(entry.task_id, "task-1");
    assert_eq!(entry.state_key, "cursor");
    assert_eq!(entry.value_json, "\"abc123\"");
}

#[test]
fn upsert_overwrites_value_and_updated_at() {
    let (_dir, conn) = setup();
    upsert(&conn, "task-1", "cursor", "\"first\"").unwrap();
    let first = get(&conn, "task-1", "cursor").unwrap().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(2));
    upsert(&conn, "task-1", "cursor", "\"second\"").unwrap();
    let second = get(&conn, "task-1", "cursor").unwrap().unwrap();

    assert_eq!(second.value_json, "\"second\"");
    assert!(second.updated_at >= first.updated_at);
}

#[test]
fn distinct_state_keys_are_independent() {
    let (_dir, conn) = setup();
    upsert(&conn, "task-1", "cursor", "\"a\"").unwrap();
    upsert(&conn, "task-1", "last_error", "\"none\"").unwrap();

    assert_eq!(get(&conn, "task-1", "cursor").unwrap().unwrap().value_json, "\"a\"");
    assert_eq!(
        get(&conn, "task-1", "last_error").unwrap().unwrap().value_json,
        "\"none\""
    );
}

#[test]
fn get_missing_returns_none() {
    let (_dir, conn) = setup();
    assert!(get(&conn, "task-1", "missing").unwrap().is_none());
}
