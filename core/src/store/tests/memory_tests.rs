use super::*;
use tempfile::TempDir;

fn setup() -> (TempDir, Connection) {
    let temp_dir = TempDir::new().unwrap();
    let conn = crate::store::open(&temp_dir.path().join("zubot.db"), 5_000).unwrap();
    create_tables(&conn).unwrap();
    (temp_dir, conn)
}

fn event(event_id: &str, day: &str, kind: MemoryEventKind, layer: MemoryLayer) -> DayMemoryEvent {
    DayMemoryEvent {
        event_id: event_id.to_string(),
        day: day.to_string(),
        event_time: shared::utils::now(),
        session_id: Some("session-1".to_string()),
        kind,
        text: "hello".to_string(),
        layer,
    }
}

#[test]
fn append_event_creates_status_row_and_counters() {
    let (_dir, conn) = setup();
    append_event(&conn, &event("evt-1", "2026-07-28", MemoryEventKind::User, MemoryLayer::Raw)).unwrap();

    let status = get_status(&conn, "2026-07-28").unwrap().unwrap();
    assert_eq!(status.total_messages, 1);
    assert_eq!(status.messages_since_last_summary, 1);
    assert!(!status.is_finalized);
}

#[test]
fn append_event_accumulates_counters_across_calls() {
    let (_dir, conn) = setup();
    append_event(&conn, &event("evt-1", "2026-07-28", MemoryEventKind::User, MemoryLayer::Raw)).unwrap();
    append_event(&conn, &event("evt-2", "2026-07-28", MemoryEventKind::MainAgent, MemoryLayer::Raw)).unwrap();

    let status = get_status(&conn, "2026-07-28").unwrap().unwrap();
    assert_eq!(status.total_messages, 2);
    assert_eq!(status.messages_since_last_summary, 2);
}

#[test]
fn record_summary_resets_counters_and_does_not_finalize_today() {
    let (_dir, conn) = setup();
    append_event(&conn, &event("evt-1", "2026-07-28", MemoryEventKind::User, MemoryLayer::Raw)).unwrap();

    record_summary(&conn, "2026-07-28", "summary text", "2026-07-28").unwrap();

    let status = get_status(&conn, "2026-07-28").unwrap().unwrap();
    assert_eq!(status.messages_since_last_summary, 0);
    assert_eq!(status.last_summarized_total, 1);
    assert_eq!(status.summaries_count, 1);
    assert!(!status.is_finalized);
}

#[test]
fn record_summary_finalizes_past_days() {
    let (_dir, conn) = setup();
    append_event(&conn, &event("evt-1", "2026-07-27", MemoryEventKind::User, MemoryLayer::Raw)).unwrap();

    record_summary(&conn, "2026-07-27", "summary text", "2026-07-28").unwrap();

    let status = get_status(&conn, "2026-07-27").unwrap().unwrap();
    assert!(status.is_finalized);
}

#[test]
fn list_unswept_days_excludes_finalized_and_today() {
    let (_dir, conn) = setup();
    append_event(&conn, &event("evt-1", "2026-07-26", MemoryEventKind::User, MemoryLayer::Raw)).unwrap();
    append_event(&conn, &event("evt-2", "2026-07-27", MemoryEventKind::User, MemoryLayer::Raw)).unwrap();
    append_event(&conn, &event("evt-3", "2026-07-28", MemoryEventKind::User, MemoryLayer::Raw)).unwrap();

    record_summary(&conn, "2026-07-26", "already summarized", "2026-07-28").unwrap();

    let unswept = list_unswept_days(&conn, "2026-07-28").unwrap();
    assert_eq!(unswept, vec!["2026-07-27".to_string()]);
}

#[test]
fn raw_transcript_excludes_summary_layer_events() {
    let (_dir, conn) = setup();
    append_event(&conn, &event("evt-1", "2026-07-28", MemoryEventKind::User, MemoryLayer::Raw)).unwrap();
    append_event(
        &conn,
        &event("evt-2", "2026-07-28", MemoryEventKind::MainAgent, MemoryLayer::Summary),
    )
    .unwrap();

    let transcript = raw_transcript(&conn, "2026-07-28").unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].event_id, "evt-1");
}
