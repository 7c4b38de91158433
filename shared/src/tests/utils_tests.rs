//! Tests for shared helper functions.

use crate::utils::{
    day_string, format_duration, is_prior_day, linear_backoff_sec, new_id, parse_day,
    truncate_string, validate_identifier,
};
use chrono::{TimeZone, Utc};

#[test]
fn new_id_produces_unique_uuids() {
    let a = new_id();
    let b = new_id();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn day_string_formats_as_iso_date() {
    let dt = Utc.with_ymd_and_hms(2026, 3, 5, 13, 0, 0).unwrap();
    assert_eq!(day_string(dt), "2026-03-05");
}

#[test]
fn parse_day_round_trips() {
    let parsed = parse_day("2026-03-05").unwrap();
    assert_eq!(parsed.to_string(), "2026-03-05");
}

#[test]
fn parse_day_rejects_garbage() {
    assert!(parse_day("not-a-day").is_err());
}

#[test]
fn is_prior_day_is_false_for_garbage_input() {
    assert!(!is_prior_day("not-a-day"));
}

#[test]
fn linear_backoff_scales_with_attempt() {
    assert_eq!(linear_backoff_sec(5.0, 1), 5.0);
    assert_eq!(linear_backoff_sec(5.0, 3), 15.0);
    // attempt 0 is treated as attempt 1, never a zero-wait retry.
    assert_eq!(linear_backoff_sec(5.0, 0), 5.0);
}

#[test]
fn validate_identifier_rejects_empty_and_oversized() {
    assert!(validate_identifier("task", "").is_err());
    assert!(validate_identifier("task", &"a".repeat(200)).is_err());
    assert!(validate_identifier("task", "job-search_01").is_ok());
}

#[test]
fn validate_identifier_rejects_bad_characters() {
    assert!(validate_identifier("task", "has space").is_err());
    assert!(validate_identifier("task", "has/slash").is_err());
}

#[test]
fn truncate_string_appends_ellipsis() {
    assert_eq!(truncate_string("hello", 10), "hello");
    assert_eq!(truncate_string("hello world", 8), "hello...");
}

#[test]
fn format_duration_picks_the_right_unit() {
    assert_eq!(format_duration(12.3), "12.3ms");
    assert_eq!(format_duration(1500.0), "1.5s");
    assert_eq!(format_duration(120_000.0), "2.0m");
}
