use super::*;
use crate::store::{profiles, schedules};
use shared::model::{CalendarEntry, MisfirePolicy, RetryPolicy, Schedule, ScheduleMode, TaskKind, TaskProfile};
use tempfile::TempDir;

fn setup() -> (TempDir, Connection) {
    let temp_dir = TempDir::new().unwrap();
    let conn = crate::store::open(&temp_dir.path().join("zubot.db"), 5_000).unwrap();
    profiles::create_tables(&conn).unwrap();
    schedules::create_tables(&conn).unwrap();
    create_tables(&conn).unwrap();

    for task_id in ["task-1", "task-2"] {
        profiles::upsert(
            &conn,
            &TaskProfile {
                task_id: task_id.to_string(),
                kind: TaskKind::Script,
                entrypoint: "scripts/check.sh".to_string(),
                queue_group: None,
                timeout_sec: 30,
                retry_policy: RetryPolicy { max_attempts: 1 },
                enabled: true,
            },
        )
        .unwrap();
    }

    schedules::upsert(
        &conn,
        &Schedule {
            schedule_id: "sched-1".to_string(),
            profile_id: "task-1".to_string(),
            enabled: true,
            mode: ScheduleMode::Frequency,
            run_frequency_minutes: Some(15),
            calendar_entries: Vec::<CalendarEntry>::new(),
            timezone: "UTC".to_string(),
            misfire_policy: MisfirePolicy::QueueLatest,
            execution_order: 0,
            next_run_at: shared::utils::now(),
            last_planned_run_at: None,
            last_run_summary: None,
            last_run_status: None,
        },
    )
    .unwrap();

    (temp_dir, conn)
}

#[test]
fn enqueue_then_get_round_trips() {
    let (_dir, conn) = setup();
    let run_id = enqueue(&conn, Some("sched-1"), "task-1", None, None).unwrap();

    let run = get(&conn, &run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.profile_id, "task-1");
    assert_eq!(run.schedule_id.as_deref(), Some("sched-1"));
}

#[test]
fn has_live_run_reflects_queued_and_running() {
    let (_dir, conn) = setup();
    assert!(!has_live_run(&conn, "task-1").unwrap());

    let run_id = enqueue(&conn, None, "task-1", None, None).unwrap();
    assert!(has_live_run(&conn, "task-1").unwrap());

    finish(&conn, &run_id, RunStatus::Done, Some("ok"), None).unwrap();
    assert!(!has_live_run(&conn, "task-1").unwrap());
}

#[test]
fn insert_queued_rejects_duplicate_schedule_fire_pair() {
    let (_dir, mut conn) = setup();
    let fire_at = shared::utils::now();

    let tx = conn.transaction().unwrap();
    insert_queued(&tx, Some("sched-1"), "task-1", Some(fire_at), None).unwrap();
    tx.commit().unwrap();

    let tx = conn.transaction().unwrap();
    let result = insert_queued(&tx, Some("sched-1"), "task-1", Some(fire_at), None);
    assert!(result.is_err());
}

#[test]
fn claim_next_queued_picks_oldest_and_skips_live_profile() {
    let (_dir, conn) = setup();

    let first = enqueue(&conn, None, "task-1", None, None).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let _second = enqueue(&conn, None, "task-1", None, None).unwrap();

    let claimed = claim_next_queued(&conn).unwrap().unwrap();
    assert_eq!(claimed.run_id, first);
    assert_eq!(claimed.status, RunStatus::Running);

    // task-1 now has a running run, so its second queued run must not be claimable.
    let none = claim_next_queued(&conn).unwrap();
    assert!(none.is_none());
}

#[test]
fn claim_next_queued_returns_none_when_empty() {
    let (_dir, conn) = setup();
    assert!(claim_next_queued(&conn).unwrap().is_none());
}

#[test]
fn claim_next_queued_respects_per_profile_independence() {
    let (_dir, conn) = setup();
    let run_a = enqueue(&conn, None, "task-1", None, None).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let run_b = enqueue(&conn, None, "task-2", None, None).unwrap();

    let first = claim_next_queued(&conn).unwrap().unwrap();
    assert_eq!(first.run_id, run_a);
    let second = claim_next_queued(&conn).unwrap().unwrap();
    assert_eq!(second.run_id, run_b);
}

#[test]
fn mark_waiting_then_resume_to_queued() {
    let (_dir, conn) = setup();
    let run_id = enqueue(&conn, None, "task-1", None, None).unwrap();
    claim_next_queued(&conn).unwrap();

    mark_waiting(&conn, &run_id, r#"{"request_id":"r1"}"#).unwrap();
    let waiting = get(&conn, &run_id).unwrap().unwrap();
    assert_eq!(waiting.status, RunStatus::WaitingForUser);

    resume_to_queued(&conn, &run_id, r#"{"request_id":"r1","response":"yes"}"#).unwrap();
    let resumed = get(&conn, &run_id).unwrap().unwrap();
    assert_eq!(resumed.status, RunStatus::Queued);
    assert!(resumed.payload_json.unwrap().contains("yes"));
}

#[test]
fn kill_queued_only_affects_queued_runs() {
    let (_dir, conn) = setup();
    let run_id = enqueue(&conn, None, "task-1", None, None).unwrap();

    assert!(kill_queued(&conn, &run_id, shared::model::error_markers::KILLED).unwrap());
    let run = get(&conn, &run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Blocked);
    assert_eq!(run.error.as_deref(), Some(shared::model::error_markers::KILLED));

    assert!(!kill_queued(&conn, &run_id, shared::model::error_markers::KILLED).unwrap());
}

#[test]
fn expire_waiting_sets_blocked_with_timeout_marker() {
    let (_dir, conn) = setup();
    let run_id = enqueue(&conn, None, "task-1", None, None).unwrap();
    claim_next_queued(&conn).unwrap();
    mark_waiting(&conn, &run_id, "{}").unwrap();

    expire_waiting(&conn, &run_id).unwrap();
    let run = get(&conn, &run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Blocked);
    assert_eq!(
        run.error.as_deref(),
        Some(shared::model::error_markers::WAITING_FOR_USER_TIMEOUT)
    );
}

#[test]
fn list_active_and_list_waiting_filter_by_status() {
    let (_dir, conn) = setup();
    let run_a = enqueue(&conn, None, "task-1", None, None).unwrap();
    let run_b = enqueue(&conn, None, "task-2", None, None).unwrap();
    claim_next_queued(&conn).unwrap();
    mark_waiting(&conn, &run_a, "{}").unwrap();

    let active = list_active(&conn).unwrap();
    assert_eq!(active.len(), 2);

    let waiting = list_waiting(&conn).unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].run_id, run_a);

    let by_profile = list_active_by_profile(&conn, "task-2").unwrap();
    assert_eq!(by_profile.len(), 1);
    assert_eq!(by_profile[0].run_id, run_b);
}

#[test]
fn deleting_schedule_sets_run_schedule_id_null() {
    let (_dir, conn) = setup();
    let run_id = enqueue(&conn, Some("sched-1"), "task-1", None, None).unwrap();

    schedules::delete(&conn, "sched-1").unwrap();

    let run = get(&conn, &run_id).unwrap().unwrap();
    assert_eq!(run.schedule_id, None);
}
