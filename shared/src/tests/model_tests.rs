//! Tests for the domain model's status/enum semantics.

use crate::model::{MisfirePolicy, RunStatus, ScheduleMode};
use std::str::FromStr;

#[test]
fn live_statuses_match_the_no_overlap_set() {
    assert!(RunStatus::Queued.is_live());
    assert!(RunStatus::Running.is_live());
    assert!(RunStatus::WaitingForUser.is_live());
    assert!(!RunStatus::Done.is_live());
    assert!(!RunStatus::Failed.is_live());
    assert!(!RunStatus::Blocked.is_live());
}

#[test]
fn terminal_statuses_are_exactly_done_failed_blocked() {
    assert!(RunStatus::Done.is_terminal());
    assert!(RunStatus::Failed.is_terminal());
    assert!(RunStatus::Blocked.is_terminal());
    assert!(!RunStatus::Queued.is_terminal());
    assert!(!RunStatus::WaitingForUser.is_terminal());
}

#[test]
fn run_status_display_and_from_str_round_trip() {
    for status in [
        RunStatus::Queued,
        RunStatus::Running,
        RunStatus::WaitingForUser,
        RunStatus::Done,
        RunStatus::Failed,
        RunStatus::Blocked,
    ] {
        let s = status.to_string();
        assert_eq!(RunStatus::from_str(&s).unwrap(), status);
    }
}

#[test]
fn run_status_from_str_rejects_unknown() {
    assert!(RunStatus::from_str("not_a_status").is_err());
}

#[test]
fn misfire_policy_round_trips() {
    for p in [
        MisfirePolicy::QueueAll,
        MisfirePolicy::QueueLatest,
        MisfirePolicy::Skip,
    ] {
        assert_eq!(MisfirePolicy::from_str(&p.to_string()).unwrap(), p);
    }
}

#[test]
fn schedule_mode_serializes_snake_case() {
    let json = serde_json::to_string(&ScheduleMode::Calendar).unwrap();
    assert_eq!(json, "\"calendar\"");
}
