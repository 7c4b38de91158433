//! Core domain types shared by the store, the scheduler/dispatcher runtime,
//! and the control API.
//!
//! These mirror the entities of the data model one-to-one: a `TaskProfile`
//! describes an executable task, a `Schedule` binds a recurring cadence to
//! one, and a `Run` is one lifecycle instance of executing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a task's body is executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Script,
    Agentic,
    InteractiveWrapper,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Script => "script",
            TaskKind::Agentic => "agentic",
            TaskKind::InteractiveWrapper => "interactive_wrapper",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a Run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    WaitingForUser,
    Done,
    Failed,
    Blocked,
}

impl RunStatus {
    /// The statuses that count toward the no-overlap-per-task invariant.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            RunStatus::Queued | RunStatus::Running | RunStatus::WaitingForUser
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed | RunStatus::Blocked)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::WaitingForUser => "waiting_for_user",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => RunStatus::Queued,
            "running" => RunStatus::Running,
            "waiting_for_user" => RunStatus::WaitingForUser,
            "done" => RunStatus::Done,
            "failed" => RunStatus::Failed,
            "blocked" => RunStatus::Blocked,
            other => {
                return Err(crate::CoreError::Validation(format!(
                    "unknown run status '{other}'"
                )))
            }
        })
    }
}

/// How the scheduler handles fires it missed while the daemon was down or busy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    QueueAll,
    QueueLatest,
    Skip,
}

impl fmt::Display for MisfirePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MisfirePolicy::QueueAll => "queue_all",
            MisfirePolicy::QueueLatest => "queue_latest",
            MisfirePolicy::Skip => "skip",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MisfirePolicy {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queue_all" => MisfirePolicy::QueueAll,
            "queue_latest" => MisfirePolicy::QueueLatest,
            "skip" => MisfirePolicy::Skip,
            other => {
                return Err(crate::CoreError::Validation(format!(
                    "unknown misfire policy '{other}'"
                )))
            }
        })
    }
}

/// Recurrence shape of a Schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    Frequency,
    Calendar,
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleMode::Frequency => "frequency",
            ScheduleMode::Calendar => "calendar",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ScheduleMode {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "frequency" => ScheduleMode::Frequency,
            "calendar" => ScheduleMode::Calendar,
            other => {
                return Err(crate::CoreError::Validation(format!(
                    "unknown schedule mode '{other}'"
                )))
            }
        })
    }
}

/// One `time_of_day` (local to the schedule's timezone) x `day_of_week`
/// entry of a calendar-mode schedule. Calendar schedules fire at the
/// cross-product of these child rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEntry {
    /// `HH:MM` in the schedule's `timezone`.
    pub time_of_day: String,
    /// 0 = Sunday .. 6 = Saturday, matching `chrono::Weekday::num_days_from_sunday`.
    pub day_of_week: u8,
}

/// Declares an executable task. Mirrors the `TaskProfile` entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskProfile {
    pub task_id: String,
    pub kind: TaskKind,
    /// Path to a script entrypoint (`kind = script`) or an in-process
    /// module identifier (`kind = agentic` / `interactive_wrapper`).
    pub entrypoint: String,
    pub queue_group: Option<String>,
    pub timeout_sec: u64,
    pub retry_policy: RetryPolicy,
    pub enabled: bool,
}

/// Retry behavior a TaskProfile declares for its own failures. Distinct from
/// provider-queue retries, which govern outbound calls rather than the run
/// itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

/// Recurring binding of a task. Mirrors the `Schedule` entity, including its
/// cursor fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub schedule_id: String,
    pub profile_id: String,
    pub enabled: bool,
    pub mode: ScheduleMode,
    /// Required when `mode == Frequency`.
    pub run_frequency_minutes: Option<u32>,
    /// Required when `mode == Calendar`.
    pub calendar_entries: Vec<CalendarEntry>,
    /// IANA timezone name used to interpret `calendar_entries`.
    pub timezone: String,
    pub misfire_policy: MisfirePolicy,
    pub execution_order: i64,
    pub next_run_at: DateTime<Utc>,
    pub last_planned_run_at: Option<DateTime<Utc>>,
    pub last_run_summary: Option<String>,
    pub last_run_status: Option<RunStatus>,
}

/// Active lifecycle record. Mirrors the `Run` entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: String,
    pub schedule_id: Option<String>,
    pub profile_id: String,
    pub status: RunStatus,
    pub planned_fire_at: Option<DateTime<Utc>>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub payload_json: Option<String>,
}

/// Terminal-error markers written into `Run.error`. Not exhaustive — a
/// Runner may surface its own message — but these are the markers the core
/// itself assigns.
pub mod error_markers {
    pub const TIMEOUT: &str = "timeout";
    pub const KILLED: &str = "killed";
    pub const REQUEUED_RACE: &str = "requeued_race";
    pub const WAITING_FOR_USER_TIMEOUT: &str = "waiting_for_user_timeout";
}

/// Result a Runner hands back to the Dispatcher slot on completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub artifacts: Option<serde_json::Value>,
    pub waiting_contract: Option<WaitingContract>,
}

/// The persisted tuple attached to an interactive Run while it awaits user
/// input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingContract {
    pub request_id: String,
    pub question: String,
    pub context: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
}

/// Terminal snapshot row for bounded history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunHistoryEntry {
    pub run_id: String,
    pub schedule_id: Option<String>,
    pub profile_id: String,
    pub status: RunStatus,
    pub planned_fire_at: Option<DateTime<Utc>>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// Idempotency ledger row of an externally discovered item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSeenItem {
    pub task_id: String,
    pub provider: String,
    pub item_key: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub seen_count: u64,
    pub metadata_json: Option<String>,
}

/// Atomic per-task checkpoint/cursor value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStateEntry {
    pub task_id: String,
    pub state_key: String,
    pub value_json: String,
    pub updated_at: DateTime<Utc>,
}

/// Kind of a DayMemoryEvent. `TaskAgentEvent` carries an opaque sub-kind
/// string since task bodies are pluggable and outside this crate's scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryEventKind {
    User,
    MainAgent,
    TaskAgentEvent,
}

impl fmt::Display for MemoryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryEventKind::User => "user",
            MemoryEventKind::MainAgent => "main_agent",
            MemoryEventKind::TaskAgentEvent => "task_agent_event",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MemoryEventKind {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "user" => MemoryEventKind::User,
            "main_agent" => MemoryEventKind::MainAgent,
            "task_agent_event" => MemoryEventKind::TaskAgentEvent,
            other => {
                return Err(crate::CoreError::Validation(format!(
                    "unknown memory event kind '{other}'"
                )))
            }
        })
    }
}

/// Whether a memory event is raw transcript or a produced summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    Raw,
    Summary,
}

impl fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryLayer::Raw => "raw",
            MemoryLayer::Summary => "summary",
        };
        f.write_str(s)
    }
}

/// Append-only event log row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayMemoryEvent {
    pub event_id: String,
    pub day: String,
    pub event_time: DateTime<Utc>,
    pub session_id: Option<String>,
    pub kind: MemoryEventKind,
    pub text: String,
    pub layer: MemoryLayer,
}

/// Per-day counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayMemoryStatus {
    pub day: String,
    pub total_messages: u64,
    pub last_summarized_total: u64,
    pub messages_since_last_summary: u64,
    pub summaries_count: u64,
    pub is_finalized: bool,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_summary_at: Option<DateTime<Utc>>,
}

/// Status of a SummaryJob.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummaryJobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl fmt::Display for SummaryJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SummaryJobStatus::Queued => "queued",
            SummaryJobStatus::Running => "running",
            SummaryJobStatus::Done => "done",
            SummaryJobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SummaryJobStatus {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => SummaryJobStatus::Queued,
            "running" => SummaryJobStatus::Running,
            "done" => SummaryJobStatus::Done,
            "failed" => SummaryJobStatus::Failed,
            other => {
                return Err(crate::CoreError::Validation(format!(
                    "unknown summary job status '{other}'"
                )))
            }
        })
    }
}

/// Per-day summarization work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryJob {
    pub job_id: String,
    pub day: String,
    pub status: SummaryJobStatus,
    pub reason: String,
    pub attempt_count: u32,
}

/// Materialized narrative summary for one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaySummary {
    pub day: String,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

/// Singleton heartbeat status row (`'main'`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatState {
    pub last_start_at: Option<DateTime<Utc>>,
    pub last_finish_at: Option<DateTime<Utc>>,
    pub last_enqueued_count: u64,
    pub last_heartbeat_error: Option<String>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        HeartbeatState {
            last_start_at: None,
            last_finish_at: None,
            last_enqueued_count: 0,
            last_heartbeat_error: None,
        }
    }
}

/// Observability snapshot of one dispatcher slot, exposed via `GET
/// /api/central/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotSnapshot {
    pub slot_id: usize,
    pub busy: bool,
    pub run_id: Option<String>,
    pub task_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_result: Option<RunStatus>,
}

/// Observability counters for one provider queue group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueueGroupStats {
    pub pending: usize,
    pub calls_total: u64,
    pub calls_success: u64,
    pub calls_failed: u64,
    pub wait_sec_last: f64,
    pub wait_sec_avg: f64,
    pub wait_sec_max: f64,
}

#[cfg(test)]
#[path = "tests/model_tests.rs"]
mod tests;
