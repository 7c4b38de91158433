//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the configuration
//! structures. These functions are used by serde when deserializing configuration
//! files that don't specify certain optional fields.

// Core service defaults

/// Default autostart flag for the core service
pub fn default_central_service_enabled() -> bool {
    true
}

/// Default heartbeat tick interval (5 seconds)
pub fn default_heartbeat_poll_interval_sec() -> u64 {
    5
}

/// Default dispatcher slot count
pub fn default_task_runner_concurrency() -> usize {
    3
}

/// Default SQLite database path
pub fn default_scheduler_db_path() -> String {
    "memory/central/zubot_core.db".to_string()
}

// History and gateway defaults

/// Default run history retention window (30 days)
pub fn default_run_history_retention_days() -> u32 {
    30
}

/// Default run history row cap
pub fn default_run_history_max_rows() -> u64 {
    10_000
}

/// Default SQLite busy timeout for the gateway connection (5000 ms)
pub fn default_db_queue_busy_timeout_ms() -> u64 {
    5_000
}

/// Default row cap for SQL gateway results
pub fn default_db_queue_default_max_rows() -> u64 {
    1_000
}

// Observability thresholds

/// Default queue-depth warning threshold
pub fn default_queue_warning_threshold() -> u64 {
    50
}

/// Default age after which a running Run is flagged as stuck (600 seconds)
pub fn default_running_age_warning_sec() -> u64 {
    600
}

// Interactive run defaults

/// Default interactive waiting-hold timeout (3600 seconds / 1 hour)
pub fn default_waiting_for_user_timeout_sec() -> u64 {
    3_600
}

// Memory / summary pipeline defaults

/// Default periodic summary sweep interval (600 seconds / 10 minutes)
pub fn default_memory_manager_sweep_interval_sec() -> u64 {
    600
}

/// Default debounce after run completion before a summary sweep (30 seconds)
pub fn default_memory_manager_completion_debounce_sec() -> u64 {
    30
}

/// Default number of prior days' summaries preloaded into memory context
pub fn default_autoload_summary_days() -> u32 {
    3
}

/// Default message-count threshold that triggers a realtime summary
pub fn default_realtime_summary_turn_threshold() -> u64 {
    20
}

/// Default summary worker poll interval (10 seconds)
pub fn default_summary_worker_poll_sec() -> u64 {
    10
}

/// Default max summary jobs claimed per worker tick
pub fn default_summary_worker_max_jobs_per_tick() -> u32 {
    2
}

/// Default flag for model-backed (vs. deterministic concatenative) day summaries
pub fn default_daily_summary_use_model() -> bool {
    false
}

// Provider queue defaults

/// Default minimum interval between provider-queue dispatches (2 seconds)
pub fn default_queue_min_interval_sec() -> f64 {
    2.0
}

/// Default jitter applied around `queue_min_interval_sec` (0.5 seconds)
pub fn default_queue_jitter_sec() -> f64 {
    0.5
}

/// Default max retries for a transient provider-queue failure
pub fn default_queue_max_retries() -> u32 {
    3
}

/// Default linear backoff unit between provider-queue retries (5 seconds)
pub fn default_queue_retry_backoff_sec() -> f64 {
    5.0
}

// Control API defaults

/// Default HTTP control API bind address
pub fn default_control_api_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

/// Default graceful shutdown timeout for the daemon (30 seconds)
pub fn default_graceful_shutdown_timeout_sec() -> u64 {
    30
}
