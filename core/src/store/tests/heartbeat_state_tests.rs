use super::*;
use tempfile::TempDir;

fn setup() -> (TempDir, Connection) {
    let temp_dir = TempDir::new().unwrap();
    let conn = crate::store::open(&temp_dir.path().join("zubot.db"), 5_000).unwrap();
    create_tables(&conn).unwrap();
    (temp_dir, conn)
}

#[test]
fn get_defaults_before_first_tick() {
    let (_dir, conn) = setup();
    let state = get(&conn).unwrap();
    assert_eq!(state, HeartbeatState::default());
}

#[test]
fn upsert_then_get_round_trips() {
    let (_dir, conn) = setup();
    let now = shared::utils::now();
    let state = HeartbeatState {
        last_start_at: Some(now),
        last_finish_at: Some(now),
        last_enqueued_count: 3,
        last_heartbeat_error: None,
    };
    upsert(&conn, &state).unwrap();

    let fetched = get(&conn).unwrap();
    assert_eq!(fetched, state);
}

#[test]
fn upsert_overwrites_singleton_row() {
    let (_dir, conn) = setup();
    let now = shared::utils::now();
    upsert(
        &conn,
        &HeartbeatState {
            last_start_at: Some(now),
            last_finish_at: None,
            last_enqueued_count: 1,
            last_heartbeat_error: Some("boom".to_string()),
        },
    )
    .unwrap();

    upsert(
        &conn,
        &HeartbeatState {
            last_start_at: Some(now),
            last_finish_at: Some(now),
            last_enqueued_count: 2,
            last_heartbeat_error: None,
        },
    )
    .unwrap();

    let fetched = get(&conn).unwrap();
    assert_eq!(fetched.last_enqueued_count, 2);
    assert_eq!(fetched.last_heartbeat_error, None);

    let row_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM heartbeat_state", [], |row| row.get(0))
        .unwrap();
    assert_eq!(row_count, 1);
}
