//! Tests for Control API DTOs.

use crate::api::{endpoints, SqlRequest, TaskProfileRequest, TriggerRequest};
use crate::model::TaskKind;

#[test]
fn trigger_request_defaults_to_no_payload() {
    let req: TriggerRequest = serde_json::from_str("{}").unwrap();
    assert_eq!(req.payload_json, None);
}

#[test]
fn sql_request_defaults_to_read_only() {
    let req: SqlRequest = serde_json::from_str(r#"{"sql": "select 1"}"#).unwrap();
    assert!(req.read_only);
    assert!(req.params.is_empty());
    assert_eq!(req.max_rows, None);
}

#[test]
fn sql_request_allows_explicit_write_opt_in() {
    let req: SqlRequest =
        serde_json::from_str(r#"{"sql": "update x set y=1", "read_only": false}"#).unwrap();
    assert!(!req.read_only);
}

#[test]
fn task_profile_request_round_trips_kind() {
    let req = TaskProfileRequest {
        task_id: "task-1".to_string(),
        kind: TaskKind::Agentic,
        entrypoint: "agentic::job_search".to_string(),
        queue_group: Some("job_board".to_string()),
        timeout_sec: 120,
        retry_policy: Default::default(),
        enabled: true,
    };
    let json = serde_json::to_string(&req).unwrap();
    let back: TaskProfileRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(req, back);
    assert!(json.contains("\"agentic\""));
}

#[test]
fn endpoint_paths_match_the_external_interface_table() {
    assert_eq!(endpoints::STATUS, "/api/central/status");
    assert_eq!(endpoints::TRIGGER, "/api/central/trigger/:task_id");
    assert_eq!(endpoints::RUN_RESUME, "/api/central/runs/:run_id/resume");
    assert_eq!(endpoints::SQL, "/api/central/sql");
}
