use super::*;
use tempfile::TempDir;

fn setup() -> (TempDir, Connection) {
    let temp_dir = TempDir::new().unwrap();
    let conn = crate::store::open(&temp_dir.path().join("zubot.db"), 5_000).unwrap();
    create_tables(&conn).unwrap();
    (temp_dir, conn)
}

fn finished_run(run_id: &str, finished_at: DateTime<Utc>) -> Run {
    Run {
        run_id: run_id.to_string(),
        schedule_id: None,
        profile_id: "task-1".to_string(),
        status: RunStatus::Done,
        planned_fire_at: None,
        queued_at: finished_at - chrono::Duration::seconds(5),
        started_at: Some(finished_at - chrono::Duration::seconds(3)),
        finished_at: Some(finished_at),
        summary: Some("ok".to_string()),
        error: None,
        payload_json: None,
    }
}

#[test]
fn archive_requires_finished_at() {
    let (_dir, conn) = setup();
    let mut run = finished_run("run-1", shared::utils::now());
    run.finished_at = None;

    let result = archive(&conn, &run);
    assert!(result.is_err());
}

#[test]
fn archive_then_list_recent_round_trips() {
    let (_dir, conn) = setup();
    let run = finished_run("run-1", shared::utils::now());
    archive(&conn, &run).unwrap();

    let recent = list_recent(&conn, 10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].run_id, "run-1");
    assert_eq!(recent[0].status, RunStatus::Done);
}

#[test]
fn list_recent_orders_newest_first() {
    let (_dir, conn) = setup();
    let now = shared::utils::now();
    archive(&conn, &finished_run("run-old", now - chrono::Duration::hours(2))).unwrap();
    archive(&conn, &finished_run("run-new", now)).unwrap();

    let recent = list_recent(&conn, 10).unwrap();
    let ids: Vec<String> = recent.into_iter().map(|r| r.run_id).collect();
    assert_eq!(ids, vec!["run-new", "run-old"]);
}

#[test]
fn prune_deletes_rows_older_than_retention() {
    let (_dir, conn) = setup();
    let now = shared::utils::now();
    archive(&conn, &finished_run("run-old", now - chrono::Duration::days(40))).unwrap();
    archive(&conn, &finished_run("run-new", now)).unwrap();

    let deleted = prune(&conn, 30, 1_000).unwrap();
    assert_eq!(deleted, 1);

    let recent = list_recent(&conn, 10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].run_id, "run-new");
}

#[test]
fn prune_trims_down_to_max_rows_oldest_first() {
    let (_dir, conn) = setup();
    let now = shared::utils::now();
    for i in 0..5 {
        archive(
            &conn,
            &finished_run(&format!("run-{i}"), now - chrono::Duration::minutes(5 - i)),
        )
        .unwrap();
    }

    let deleted = prune(&conn, 365, 3).unwrap();
    assert_eq!(deleted, 2);

    let recent = list_recent(&conn, 10).unwrap();
    assert_eq!(recent.len(), 3);
    let ids: Vec<String> = recent.into_iter().map(|r| r.run_id).collect();
    assert_eq!(ids, vec!["run-4", "run-3", "run-2"]);
}

#[test]
fn remove_live_run_deletes_from_runs_table() {
    let (_dir, conn) = setup();
    conn.execute(
        "CREATE TABLE runs (run_id TEXT PRIMARY KEY, status TEXT NOT NULL, profile_id TEXT NOT NULL, queued_at TEXT NOT NULL)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO runs (run_id, status, profile_id, queued_at) VALUES ('run-1', 'done', 'task-1', '2026-01-01T00:00:00Z')",
        [],
    )
    .unwrap();

    remove_live_run(&conn, "run-1").unwrap();

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM runs WHERE run_id = 'run-1'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}
