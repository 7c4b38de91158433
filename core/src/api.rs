//! Control API: an `axum` router exposing every endpoint named in the
//! external-interfaces table, with a typed `AppState`, a typed `ApiError`
//! with `IntoResponse`, and a `DefaultBodyLimit` layer in front of it.

use crate::daemon::DaemonHandles;
use crate::dispatcher::DispatcherControl;
use crate::gateway::GatewayHandle;
use crate::provider_queue::ProviderQueues;
use crate::scheduler::HeartbeatControl;
use axum::{
    extract::{DefaultBodyLimit, Path as AxumPath, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::api::{
    endpoints, AgenticEnqueueRequest, AgenticEnqueueResponse, KillResponse, ResumeRequest, ResumeResponse,
    ScheduleRequest, SchedulesResponse, SqlRequest, TaskProfileRequest, TaskProfilesResponse, TaskSeenHasRequest,
    TaskSeenHasResponse, TaskSeenMarkRequest, TaskStateGetRequest, TaskStateGetResponse, TaskStateUpsertRequest,
    TriggerRequest, TriggerResponse, WaitingRun,
};
use shared::config::DaemonConfig;
use shared::metrics::{CentralMetrics, CentralStatus, RunSummary};
use shared::model::{RunStatus, WaitingContract};
use std::sync::Arc;

/// Maximum Control API request body size. Local callers only, but the cap
/// keeps a misbehaving client (or a large `sql` passthrough body) from
/// growing the process unbounded.
const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: GatewayHandle,
    pub dispatcher: DispatcherControl,
    pub heartbeat: HeartbeatControl,
    pub provider_queues: Arc<ProviderQueues>,
    pub config: Arc<DaemonConfig>,
}

impl AppState {
    pub fn new(handles: DaemonHandles) -> Self {
        AppState {
            gateway: handles.gateway,
            dispatcher: handles.dispatcher,
            heartbeat: handles.heartbeat,
            provider_queues: handles.provider_queues,
            config: handles.config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::STATUS, get(get_status))
        .route(endpoints::START, post(post_start))
        .route(endpoints::STOP, post(post_stop))
        .route(endpoints::METRICS, get(get_metrics))
        .route(endpoints::TASKS, get(list_tasks).post(create_task))
        .route(
            endpoints::TASK_BY_ID,
            get(get_task).put(update_task).delete(delete_task),
        )
        .route(endpoints::SCHEDULES, get(list_schedules).post(create_schedule))
        .route(
            endpoints::SCHEDULE_BY_ID,
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route(endpoints::RUNS, get(list_runs))
        .route(endpoints::RUNS_WAITING, get(list_waiting_runs))
        .route(endpoints::TRIGGER, post(trigger_task))
        .route(endpoints::AGENTIC_ENQUEUE, post(agentic_enqueue))
        .route(endpoints::RUN_KILL, post(kill_run))
        .route(endpoints::RUN_RESUME, post(resume_run))
        .route(endpoints::SQL, post(run_sql))
        .route(endpoints::TASK_STATE_UPSERT, post(task_state_upsert))
        .route(endpoints::TASK_STATE_GET, post(task_state_get))
        .route(endpoints::TASK_SEEN_MARK, post(task_seen_mark))
        .route(endpoints::TASK_SEEN_HAS, post(task_seen_has))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .with_state(state)
}

// --- status / lifecycle / metrics ---------------------------------------

async fn get_status(State(state): State<AppState>) -> Result<Json<CentralStatus>, ApiError> {
    let slots = state.dispatcher.snapshot().await;
    let heartbeat_state = state.gateway.with_connection(|conn| crate::store::heartbeat_state::get(conn)).await?;

    let mut warnings = Vec::new();
    let active = state.gateway.with_connection(|conn| crate::store::runs::list_active(conn)).await?;
    let queue_depth = active.iter().filter(|r| r.status == RunStatus::Queued).count();
    if queue_depth as u64 > state.config.queue_warning_threshold {
        warnings.push(format!(
            "queue depth {queue_depth} exceeds warning threshold {}",
            state.config.queue_warning_threshold
        ));
    }
    if let Some(oldest_running) = oldest_running_age_sec(&active) {
        if oldest_running > state.config.running_age_warning_sec as f64 {
            warnings.push(format!(
                "a running run has been active for {oldest_running:.0}s, past warning threshold {}",
                state.config.running_age_warning_sec
            ));
        }
    }

    Ok(Json(CentralStatus {
        running: state.heartbeat.is_running(),
        slots,
        heartbeat_last_start_at: heartbeat_state.last_start_at,
        heartbeat_last_finish_at: heartbeat_state.last_finish_at,
        heartbeat_last_enqueued_count: heartbeat_state.last_enqueued_count,
        heartbeat_last_error: heartbeat_state.last_heartbeat_error,
        warnings,
    }))
}

async fn post_start(State(state): State<AppState>) -> impl IntoResponse {
    state.heartbeat.start();
    Json(json!({ "running": true }))
}

async fn post_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.heartbeat.stop();
    Json(json!({ "running": false }))
}

async fn get_metrics(State(state): State<AppState>) -> Result<Json<CentralMetrics>, ApiError> {
    let active = state.gateway.with_connection(|conn| crate::store::runs::list_active(conn)).await?;
    let waiting = state.gateway.with_connection(|conn| crate::store::runs::list_waiting(conn)).await?;
    let now = shared::utils::now();

    let queued: Vec<_> = active.iter().filter(|r| r.status == RunStatus::Queued).collect();
    let queue_depth = queued.len();
    let oldest_queued_age_sec = queued
        .iter()
        .map(|r| (now - r.queued_at).num_milliseconds() as f64 / 1000.0)
        .fold(None, max_opt);
    let longest_running_age_sec = oldest_running_age_sec(&active);

    Ok(Json(CentralMetrics {
        queue_depth,
        oldest_queued_age_sec,
        longest_running_age_sec,
        waiting_count: waiting.len(),
        queue_depth_warning: queue_depth as u64 > state.config.queue_warning_threshold,
        running_age_warning: longest_running_age_sec
            .map(|age| age > state.config.running_age_warning_sec as f64)
            .unwrap_or(false),
        provider_queues: state.provider_queues.stats(),
    }))
}

fn oldest_running_age_sec(active: &[shared::model::Run]) -> Option<f64> {
    let now = shared::utils::now();
    active
        .iter()
        .filter(|r| r.status == RunStatus::Running)
        .filter_map(|r| r.started_at)
        .map(|started_at| (now - started_at).num_milliseconds() as f64 / 1000.0)
        .fold(None, max_opt)
}

fn max_opt(acc: Option<f64>, value: f64) -> Option<f64> {
    Some(acc.map_or(value, |a| a.max(value)))
}

// --- task profiles -------------------------------------------------------

async fn list_tasks(State(state): State<AppState>) -> Result<Json<TaskProfilesResponse>, ApiError> {
    let tasks = state.gateway.with_connection(|conn| crate::store::profiles::list(conn)).await?;
    Ok(Json(TaskProfilesResponse { tasks }))
}

async fn get_task(
    State(state): State<AppState>,
    AxumPath(task_id): AxumPath<String>,
) -> Result<Json<shared::model::TaskProfile>, ApiError> {
    let task_id_for_err = task_id.clone();
    let profile = state
        .gateway
        .with_connection(move |conn| crate::store::profiles::get(conn, &task_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task '{task_id_for_err}'")))?;
    Ok(Json(profile))
}

async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<TaskProfileRequest>,
) -> Result<Json<shared::model::TaskProfile>, ApiError> {
    let profile = shared::model::TaskProfile {
        task_id: shared::utils::new_id(),
        kind: request.kind,
        entrypoint: request.entrypoint,
        queue_group: request.queue_group,
        timeout_sec: request.timeout_sec,
        retry_policy: request.retry_policy,
        enabled: request.enabled,
    };
    state
        .gateway
        .with_connection({
            let profile = profile.clone();
            move |conn| crate::store::profiles::upsert(conn, &profile)
        })
        .await?;
    Ok(Json(profile))
}

async fn update_task(
    State(state): State<AppState>,
    AxumPath(task_id): AxumPath<String>,
    Json(request): Json<TaskProfileRequest>,
) -> Result<Json<shared::model::TaskProfile>, ApiError> {
    let profile = shared::model::TaskProfile {
        task_id,
        kind: request.kind,
        entrypoint: request.entrypoint,
        queue_group: request.queue_group,
        timeout_sec: request.timeout_sec,
        retry_policy: request.retry_policy,
        enabled: request.enabled,
    };
    state
        .gateway
        .with_connection({
            let profile = profile.clone();
            move |conn| crate::store::profiles::upsert(conn, &profile)
        })
        .await?;
    Ok(Json(profile))
}

async fn delete_task(
    State(state): State<AppState>,
    AxumPath(task_id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .gateway
        .with_connection(move |conn| crate::store::profiles::delete(conn, &task_id))
        .await?;
    Ok(Json(json!({ "deleted": deleted })))
}

// --- schedules -------------------------------------------------------

async fn list_schedules(State(state): State<AppState>) -> Result<Json<SchedulesResponse>, ApiError> {
    let schedules = state.gateway.with_connection(|conn| crate::store::schedules::list(conn)).await?;
    Ok(Json(SchedulesResponse { schedules }))
}

async fn get_schedule(
    State(state): State<AppState>,
    AxumPath(schedule_id): AxumPath<String>,
) -> Result<Json<shared::model::Schedule>, ApiError> {
    let schedule_id_for_err = schedule_id.clone();
    let schedule = state
        .gateway
        .with_connection(move |conn| crate::store::schedules::get(conn, &schedule_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("schedule '{schedule_id_for_err}'")))?;
    Ok(Json(schedule))
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<shared::model::Schedule>, ApiError> {
    let schedule_id = request.schedule_id.clone().unwrap_or_else(shared::utils::new_id);
    let schedule = build_schedule(schedule_id, request)?;
    state
        .gateway
        .with_connection({
            let schedule = schedule.clone();
            move |conn| crate::store::schedules::upsert(conn, &schedule)
        })
        .await?;
    Ok(Json(schedule))
}

async fn update_schedule(
    State(state): State<AppState>,
    AxumPath(schedule_id): AxumPath<String>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<shared::model::Schedule>, ApiError> {
    let schedule = build_schedule(schedule_id, request)?;
    state
        .gateway
        .with_connection({
            let schedule = schedule.clone();
            move |conn| crate::store::schedules::upsert(conn, &schedule)
        })
        .await?;
    Ok(Json(schedule))
}

/// Builds a `Schedule` from a request body, seeding `next_run_at` from the
/// schedule's own definition rather than accepting it from the client —
/// the cursor is the scheduler's to own from the moment the schedule exists.
fn build_schedule(schedule_id: String, request: ScheduleRequest) -> Result<shared::model::Schedule, ApiError> {
    let now = shared::utils::now();
    let mut schedule = shared::model::Schedule {
        schedule_id,
        profile_id: request.profile_id,
        enabled: request.enabled,
        mode: request.mode,
        run_frequency_minutes: request.run_frequency_minutes,
        calendar_entries: request.calendar_entries,
        timezone: request.timezone,
        misfire_policy: request.misfire_policy,
        execution_order: request.execution_order,
        next_run_at: now,
        last_planned_run_at: None,
        last_run_summary: None,
        last_run_status: None,
    };
    schedule.next_run_at = crate::scheduler::next_fire_instant_after(&schedule, now)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(schedule)
}

async fn delete_schedule(
    State(state): State<AppState>,
    AxumPath(schedule_id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .gateway
        .with_connection(move |conn| crate::store::schedules::delete(conn, &schedule_id))
        .await?;
    Ok(Json(json!({ "deleted": deleted })))
}

// --- runs -------------------------------------------------------

async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<RunSummary>>, ApiError> {
    let active = state.gateway.with_connection(|conn| crate::store::runs::list_active(conn)).await?;
    Ok(Json(
        active
            .into_iter()
            .map(|r| RunSummary {
                run_id: r.run_id,
                task_id: r.profile_id,
                status: r.status,
                queued_at: r.queued_at,
                started_at: r.started_at,
            })
            .collect(),
    ))
}

async fn list_waiting_runs(State(state): State<AppState>) -> Result<Json<Vec<WaitingRun>>, ApiError> {
    let waiting = state.gateway.with_connection(|conn| crate::store::runs::list_waiting(conn)).await?;
    let out = waiting
        .into_iter()
        .filter_map(|r| {
            let contract = r.payload_json.as_deref().and_then(|s| serde_json::from_str::<WaitingContract>(s).ok())?;
            Some(WaitingRun {
                run_id: r.run_id,
                task_id: r.profile_id,
                contract,
            })
        })
        .collect();
    Ok(Json(out))
}

async fn trigger_task(
    State(state): State<AppState>,
    AxumPath(task_id): AxumPath<String>,
    Json(request): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let task_id_for_err = task_id.clone();
    let profile = state
        .gateway
        .with_connection({
            let task_id = task_id.clone();
            move |conn| crate::store::profiles::get(conn, &task_id)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task '{task_id_for_err}'")))?;
    if !profile.enabled {
        return Err(ApiError::Conflict(format!("task '{task_id}' is disabled")));
    }

    let payload_json = request.payload_json.map(|v| v.to_string());
    let run_id = state
        .gateway
        .with_connection(move |conn| {
            if crate::store::runs::has_live_run(conn, &task_id)? {
                return Err(shared::CoreError::Conflict(format!("task '{task_id}' already has a live run")).into());
            }
            crate::store::runs::enqueue(conn, None, &task_id, None, payload_json.as_deref())
        })
        .await?;
    state.dispatcher.trigger();
    Ok(Json(TriggerResponse { run_id }))
}

/// Entrypoint registered (by the caller embedding this core) for one-off
/// agentic runs submitted through the Control API rather than a standing
/// `TaskProfile`.
const ADHOC_AGENTIC_ENTRYPOINT: &str = "agentic:adhoc";

async fn agentic_enqueue(
    State(state): State<AppState>,
    Json(request): Json<AgenticEnqueueRequest>,
) -> Result<Json<AgenticEnqueueResponse>, ApiError> {
    let task_id = shared::utils::new_id();
    let profile = shared::model::TaskProfile {
        task_id: task_id.clone(),
        kind: shared::model::TaskKind::Agentic,
        entrypoint: ADHOC_AGENTIC_ENTRYPOINT.to_string(),
        queue_group: request.queue_group,
        timeout_sec: request.timeout_sec.unwrap_or(state.config.waiting_for_user_timeout_sec),
        retry_policy: shared::model::RetryPolicy::default(),
        enabled: true,
    };
    let payload = json!({ "instructions": request.instructions }).to_string();

    let run_id = state
        .gateway
        .with_connection({
            let profile = profile.clone();
            let task_id = task_id.clone();
            move |conn| {
                crate::store::profiles::upsert(conn, &profile)?;
                crate::store::runs::enqueue(conn, None, &task_id, None, Some(&payload))
            }
        })
        .await?;
    state.dispatcher.trigger();
    Ok(Json(AgenticEnqueueResponse { run_id }))
}

async fn kill_run(
    State(state): State<AppState>,
    AxumPath(run_id): AxumPath<String>,
) -> Result<Json<KillResponse>, ApiError> {
    let killed = state.dispatcher.kill(&run_id).await?;
    if !killed {
        return Err(ApiError::NotFound(format!("run '{run_id}' not killable (not queued or running)")));
    }
    Ok(Json(KillResponse {
        run_id,
        status: RunStatus::Blocked,
    }))
}

async fn resume_run(
    State(state): State<AppState>,
    AxumPath(run_id): AxumPath<String>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<ResumeResponse>, ApiError> {
    let resumed = state.dispatcher.resume(&run_id, request.response).await?;
    if !resumed {
        return Err(ApiError::NotFound(format!("run '{run_id}' not waiting for user")));
    }
    Ok(Json(ResumeResponse {
        run_id,
        status: RunStatus::Queued,
    }))
}

// --- SQL passthrough / task-state / task-seen ----------------------------

async fn run_sql(
    State(state): State<AppState>,
    Json(request): Json<SqlRequest>,
) -> Result<Json<shared::api::SqlResponse>, ApiError> {
    let response = state.gateway.execute_sql(request).await?;
    Ok(Json(response))
}

async fn task_state_upsert(State(state): State<AppState>, Json(request): Json<TaskStateUpsertRequest>) -> Result<Json<Value>, ApiError> {
    let value_json = request.value_json.to_string();
    state
        .gateway
        .with_connection(move |conn| {
            crate::store::task_state::upsert(conn, &request.task_id, &request.state_key, &value_json)
        })
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn task_state_get(
    State(state): State<AppState>,
    Json(request): Json<TaskStateGetRequest>,
) -> Result<Json<TaskStateGetResponse>, ApiError> {
    let entry = state
        .gateway
        .with_connection(move |conn| crate::store::task_state::get(conn, &request.task_id, &request.state_key))
        .await?;
    let value_json = entry.and_then(|e| serde_json::from_str(&e.value_json).ok());
    Ok(Json(TaskStateGetResponse { value_json }))
}

async fn task_seen_mark(
    State(state): State<AppState>,
    Json(request): Json<TaskSeenMarkRequest>,
) -> Result<Json<Value>, ApiError> {
    let metadata_json = request.metadata_json.map(|v| v.to_string());
    state
        .gateway
        .with_connection(move |conn| {
            crate::store::seen_items::mark(
                conn,
                &request.task_id,
                &request.provider,
                &request.item_key,
                metadata_json.as_deref(),
            )
        })
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn task_seen_has(
    State(state): State<AppState>,
    Json(request): Json<TaskSeenHasRequest>,
) -> Result<Json<TaskSeenHasResponse>, ApiError> {
    let seen = state
        .gateway
        .with_connection(move |conn| crate::store::seen_items::has(conn, &request.task_id, &request.provider, &request.item_key))
        .await?;
    Ok(Json(TaskSeenHasResponse { seen }))
}

// --- errors -------------------------------------------------------

/// Maps the store/gateway/validation error taxonomy onto HTTP status codes,
/// with a consistent `{"error": ..., "details": ...}` body for every
/// non-2xx response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<shared::CoreError>() {
            Some(shared::CoreError::NotFound(msg)) => ApiError::NotFound(msg.clone()),
            Some(shared::CoreError::Validation(msg)) => ApiError::Validation(msg.clone()),
            Some(shared::CoreError::Conflict(msg)) => ApiError::Conflict(msg.clone()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ApiError::Validation(_) => axum::http::StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => axum::http::StatusCode::CONFLICT,
            ApiError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.to_string(),
            "details": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
