//! Observability DTOs returned by the Control API's status/metrics endpoints.
//!
//! These are plain snapshot structs — nothing here mutates state, it only
//! describes it for `GET /api/central/status` and `GET /api/central/metrics`.

use crate::model::{QueueGroupStats, RunStatus, SlotSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot returned by `GET /api/central/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CentralMetrics {
    /// Number of Runs currently `queued`.
    pub queue_depth: usize,
    /// Age in seconds of the oldest still-`queued` Run, if any.
    pub oldest_queued_age_sec: Option<f64>,
    /// Age in seconds of the longest-`running` Run, if any.
    pub longest_running_age_sec: Option<f64>,
    /// Number of Runs currently `waiting_for_user`.
    pub waiting_count: usize,
    /// Whether `queue_depth` has crossed `queue_warning_threshold`.
    pub queue_depth_warning: bool,
    /// Whether any running Run has crossed `running_age_warning_sec`.
    pub running_age_warning: bool,
    /// Per-provider-queue-group observability counters.
    pub provider_queues: HashMap<String, QueueGroupStats>,
}

/// Snapshot returned by `GET /api/central/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CentralStatus {
    pub running: bool,
    pub slots: Vec<SlotSnapshot>,
    pub heartbeat_last_start_at: Option<DateTime<Utc>>,
    pub heartbeat_last_finish_at: Option<DateTime<Utc>>,
    pub heartbeat_last_enqueued_count: u64,
    pub heartbeat_last_error: Option<String>,
    pub warnings: Vec<String>,
}

/// One entry of `GET /api/central/runs` — an active run or a queued preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub task_id: String,
    pub status: RunStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[path = "tests/metrics_tests.rs"]
mod tests;
