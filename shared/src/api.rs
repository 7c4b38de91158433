//! Request/response DTOs for the Control API, plus the path constants the
//! axum router and any client share so the two cannot drift apart.

use crate::model::{RunOutcome, RunStatus, Schedule, TaskProfile, WaitingContract};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control API endpoint paths. Every path named in the external-interfaces
/// table has a constant here.
pub mod endpoints {
    pub const STATUS: &str = "/api/central/status";
    pub const START: &str = "/api/central/start";
    pub const STOP: &str = "/api/central/stop";
    pub const METRICS: &str = "/api/central/metrics";
    pub const TASKS: &str = "/api/central/tasks";
    pub const TASK_BY_ID: &str = "/api/central/tasks/{task_id}";
    pub const SCHEDULES: &str = "/api/central/schedules";
    pub const SCHEDULE_BY_ID: &str = "/api/central/schedules/{schedule_id}";
    pub const RUNS: &str = "/api/central/runs";
    pub const RUNS_WAITING: &str = "/api/central/runs/waiting";
    pub const TRIGGER: &str = "/api/central/trigger/{task_id}";
    pub const AGENTIC_ENQUEUE: &str = "/api/central/agentic/enqueue";
    pub const RUN_KILL: &str = "/api/central/runs/{run_id}/kill";
    pub const RUN_RESUME: &str = "/api/central/runs/{run_id}/resume";
    pub const SQL: &str = "/api/central/sql";
    pub const TASK_STATE_UPSERT: &str = "/api/central/task-state/upsert";
    pub const TASK_STATE_GET: &str = "/api/central/task-state/get";
    pub const TASK_SEEN_MARK: &str = "/api/central/task-seen/mark";
    pub const TASK_SEEN_HAS: &str = "/api/central/task-seen/has";
}

/// `POST /api/central/trigger/{task_id}` request body. Empty today, kept as
/// a struct so adding fields later (e.g. an inline payload) is non-breaking.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TriggerRequest {
    #[serde(default)]
    pub payload_json: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerResponse {
    pub run_id: String,
}

/// `POST /api/central/agentic/enqueue` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgenticEnqueueRequest {
    pub instructions: String,
    #[serde(default)]
    pub queue_group: Option<String>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgenticEnqueueResponse {
    pub run_id: String,
}

/// `POST /api/central/runs/{run_id}/resume` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeRequest {
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeResponse {
    pub run_id: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KillResponse {
    pub run_id: String,
    pub status: RunStatus,
}

/// `GET /api/central/runs/waiting` response entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingRun {
    pub run_id: String,
    pub task_id: String,
    pub contract: WaitingContract,
}

/// `POST /api/central/sql` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SqlRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default = "default_read_only")]
    pub read_only: bool,
    #[serde(default)]
    pub max_rows: Option<u64>,
}

fn default_read_only() -> bool {
    true
}

/// `POST /api/central/sql` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SqlResponse {
    pub rows: Vec<Vec<Value>>,
    pub columns: Vec<String>,
    pub row_count: u64,
    pub truncated: bool,
}

/// `POST /api/central/task-state/upsert` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStateUpsertRequest {
    pub task_id: String,
    pub state_key: String,
    pub value_json: Value,
}

/// `POST /api/central/task-state/get` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStateGetRequest {
    pub task_id: String,
    pub state_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStateGetResponse {
    pub value_json: Option<Value>,
}

/// `POST /api/central/task-seen/mark` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSeenMarkRequest {
    pub task_id: String,
    pub provider: String,
    pub item_key: String,
    #[serde(default)]
    pub metadata_json: Option<Value>,
}

/// `POST /api/central/task-seen/has` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSeenHasRequest {
    pub task_id: String,
    pub provider: String,
    pub item_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSeenHasResponse {
    pub seen: bool,
}

/// `POST /api/central/tasks` request body (create) and update body;
/// `task_id` is ignored on create and implied by the path on update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskProfileRequest {
    pub task_id: String,
    pub kind: crate::model::TaskKind,
    pub entrypoint: String,
    #[serde(default)]
    pub queue_group: Option<String>,
    pub timeout_sec: u64,
    #[serde(default)]
    pub retry_policy: crate::model::RetryPolicy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskProfilesResponse {
    pub tasks: Vec<TaskProfile>,
}

/// `POST /api/central/schedules` request body (create/update).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub schedule_id: Option<String>,
    pub profile_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub mode: crate::model::ScheduleMode,
    #[serde(default)]
    pub run_frequency_minutes: Option<u32>,
    #[serde(default)]
    pub calendar_entries: Vec<crate::model::CalendarEntry>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub misfire_policy: crate::model::MisfirePolicy,
    #[serde(default)]
    pub execution_order: i64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulesResponse {
    pub schedules: Vec<Schedule>,
}

/// Generic error body returned for every non-2xx Control API response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub details: Option<String>,
}

/// Shared shape for a Runner's terminal payload, used when the HTTP layer
/// needs to report what a just-finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutcomeView {
    pub run_id: String,
    pub outcome: RunOutcome,
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
