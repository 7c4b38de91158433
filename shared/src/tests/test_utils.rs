//! Fixture builders shared across the crate's test modules.
//!
//! These are only used in tests and are not part of the public API.

use crate::model::{
    MisfirePolicy, RetryPolicy, RunStatus, Schedule, ScheduleMode, TaskKind, TaskProfile,
};
use crate::utils::{new_id, now};

pub fn sample_task_profile() -> TaskProfile {
    TaskProfile {
        task_id: new_id(),
        kind: TaskKind::Script,
        entrypoint: "scripts/echo.sh".to_string(),
        queue_group: None,
        timeout_sec: 30,
        retry_policy: RetryPolicy { max_attempts: 1 },
        enabled: true,
    }
}

pub fn sample_schedule(profile_id: &str) -> Schedule {
    Schedule {
        schedule_id: new_id(),
        profile_id: profile_id.to_string(),
        enabled: true,
        mode: ScheduleMode::Frequency,
        run_frequency_minutes: Some(5),
        calendar_entries: Vec::new(),
        timezone: "UTC".to_string(),
        misfire_policy: MisfirePolicy::QueueLatest,
        execution_order: 0,
        next_run_at: now(),
        last_planned_run_at: None,
        last_run_summary: None,
        last_run_status: None,
    }
}

pub fn assert_live_status(status: RunStatus) {
    assert!(status.is_live(), "expected a live status, got {status}");
}
