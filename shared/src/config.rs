//! Configuration types and validation for the zubot core daemon
//!
//! This module defines `DaemonConfig`, the typed TOML-backed configuration
//! covering every key in the Control API / configuration table, and
//! `ConfigManager`, which owns loading it from disk and persisting CLI
//! overrides back.

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-`queue_group` provider rate-limit policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueGroupConfig {
    #[serde(default = "default_queue_min_interval_sec")]
    pub queue_min_interval_sec: f64,
    #[serde(default = "default_queue_jitter_sec")]
    pub queue_jitter_sec: f64,
    #[serde(default = "default_queue_max_retries")]
    pub queue_max_retries: u32,
    #[serde(default = "default_queue_retry_backoff_sec")]
    pub queue_retry_backoff_sec: f64,
}

impl Default for QueueGroupConfig {
    fn default() -> Self {
        QueueGroupConfig {
            queue_min_interval_sec: default_queue_min_interval_sec(),
            queue_jitter_sec: default_queue_jitter_sec(),
            queue_max_retries: default_queue_max_retries(),
            queue_retry_backoff_sec: default_queue_retry_backoff_sec(),
        }
    }
}

/// Top-level daemon configuration, loaded from `zubot_core.toml`.
///
/// Every field mirrors a key named in the Control API / configuration
/// table; optional fields carry a `shared::defaults` function so a mostly
/// empty file still produces a complete, valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    #[serde(default = "default_central_service_enabled")]
    pub central_service_enabled: bool,

    #[serde(default = "default_heartbeat_poll_interval_sec")]
    pub heartbeat_poll_interval_sec: u64,

    #[serde(default = "default_task_runner_concurrency")]
    pub task_runner_concurrency: usize,

    #[serde(default = "default_scheduler_db_path")]
    pub scheduler_db_path: String,

    #[serde(default = "default_run_history_retention_days")]
    pub run_history_retention_days: u32,

    #[serde(default = "default_run_history_max_rows")]
    pub run_history_max_rows: u64,

    #[serde(default = "default_db_queue_busy_timeout_ms")]
    pub db_queue_busy_timeout_ms: u64,

    #[serde(default = "default_db_queue_default_max_rows")]
    pub db_queue_default_max_rows: u64,

    #[serde(default = "default_queue_warning_threshold")]
    pub queue_warning_threshold: u64,

    #[serde(default = "default_running_age_warning_sec")]
    pub running_age_warning_sec: u64,

    #[serde(default = "default_waiting_for_user_timeout_sec")]
    pub waiting_for_user_timeout_sec: u64,

    #[serde(default = "default_memory_manager_sweep_interval_sec")]
    pub memory_manager_sweep_interval_sec: u64,

    #[serde(default = "default_memory_manager_completion_debounce_sec")]
    pub memory_manager_completion_debounce_sec: u64,

    #[serde(default = "default_autoload_summary_days")]
    pub autoload_summary_days: u32,

    #[serde(default = "default_realtime_summary_turn_threshold")]
    pub realtime_summary_turn_threshold: u64,

    #[serde(default = "default_summary_worker_poll_sec")]
    pub summary_worker_poll_sec: u64,

    #[serde(default = "default_summary_worker_max_jobs_per_tick")]
    pub summary_worker_max_jobs_per_tick: u32,

    #[serde(default = "default_daily_summary_use_model")]
    pub daily_summary_use_model: bool,

    #[serde(default = "default_control_api_bind_addr")]
    pub control_api_bind_addr: String,

    #[serde(default = "default_graceful_shutdown_timeout_sec")]
    pub graceful_shutdown_timeout_sec: u64,

    /// Queue-group configs keyed by `queue_group` name. Groups not listed
    /// here fall back to `QueueGroupConfig::default()` when first used.
    #[serde(default)]
    pub provider_queues: HashMap<String, QueueGroupConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            central_service_enabled: default_central_service_enabled(),
            heartbeat_poll_interval_sec: default_heartbeat_poll_interval_sec(),
            task_runner_concurrency: default_task_runner_concurrency(),
            scheduler_db_path: default_scheduler_db_path(),
            run_history_retention_days: default_run_history_retention_days(),
            run_history_max_rows: default_run_history_max_rows(),
            db_queue_busy_timeout_ms: default_db_queue_busy_timeout_ms(),
            db_queue_default_max_rows: default_db_queue_default_max_rows(),
            queue_warning_threshold: default_queue_warning_threshold(),
            running_age_warning_sec: default_running_age_warning_sec(),
            waiting_for_user_timeout_sec: default_waiting_for_user_timeout_sec(),
            memory_manager_sweep_interval_sec: default_memory_manager_sweep_interval_sec(),
            memory_manager_completion_debounce_sec:
                default_memory_manager_completion_debounce_sec(),
            autoload_summary_days: default_autoload_summary_days(),
            realtime_summary_turn_threshold: default_realtime_summary_turn_threshold(),
            summary_worker_poll_sec: default_summary_worker_poll_sec(),
            summary_worker_max_jobs_per_tick: default_summary_worker_max_jobs_per_tick(),
            daily_summary_use_model: default_daily_summary_use_model(),
            control_api_bind_addr: default_control_api_bind_addr(),
            graceful_shutdown_timeout_sec: default_graceful_shutdown_timeout_sec(),
            provider_queues: HashMap::new(),
        }
    }
}

impl DaemonConfig {
    /// Semantic validation beyond what serde's `#[serde(default)]` machinery
    /// can express.
    pub fn validate(&self) -> crate::Result<()> {
        if self.task_runner_concurrency == 0 {
            return Err(
                crate::CoreError::Config("task_runner_concurrency must be >= 1".to_string())
                    .into(),
            );
        }
        if self.heartbeat_poll_interval_sec == 0 {
            return Err(crate::CoreError::Config(
                "heartbeat_poll_interval_sec must be >= 1".to_string(),
            )
            .into());
        }
        if self.scheduler_db_path.trim().is_empty() {
            return Err(
                crate::CoreError::Config("scheduler_db_path must not be empty".to_string())
                    .into(),
            );
        }
        for (group, cfg) in &self.provider_queues {
            if cfg.queue_min_interval_sec < 0.0 {
                return Err(crate::CoreError::Config(format!(
                    "provider_queues.{group}.queue_min_interval_sec must be >= 0"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// The effective policy for a queue group, falling back to defaults for
    /// groups not explicitly configured.
    pub fn queue_group_config(&self, group: &str) -> QueueGroupConfig {
        self.provider_queues
            .get(group)
            .cloned()
            .unwrap_or_default()
    }
}

const DAEMON_CONFIG_FILE: &str = "zubot_core.toml";

/// Owns the lifecycle of the on-disk config: initial load (or
/// default-and-create when absent), validation, and persisting
/// CLI-provided overrides back to the file so a restart picks them up.
pub struct ConfigManager {
    pub config_path: PathBuf,
    pub config: DaemonConfig,
}

impl ConfigManager {
    /// Creates a new manager, loading `config_path` (or the default file
    /// name inside it, if it names a directory). Unlike a network agent
    /// talking to a remote server, a missing config file here is not fatal:
    /// the daemon is local-first and should start with defaults on first
    /// run, persisting them so the file exists going forward.
    pub fn new(config_path: PathBuf) -> crate::Result<Self> {
        let config_path = if config_path.is_dir() {
            config_path.join(DAEMON_CONFIG_FILE)
        } else {
            config_path
        };

        let config = if config_path.exists() {
            Self::read_from(&config_path)?
        } else {
            DaemonConfig::default()
        };
        config.validate()?;

        let mut manager = ConfigManager {
            config_path,
            config,
        };
        if !manager.config_path.exists() {
            manager.save()?;
        }
        Ok(manager)
    }

    fn read_from(path: &Path) -> crate::Result<DaemonConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::CoreError::Config(format!("reading {}: {e}", path.display())))?;
        let config: DaemonConfig = toml::from_str(&content)
            .map_err(|e| crate::CoreError::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Reloads from disk, replacing the in-memory config if the file still
    /// parses and validates. Returns whether the config actually changed.
    pub fn reload(&mut self) -> crate::Result<bool> {
        if !self.config_path.exists() {
            return Ok(false);
        }
        let reloaded = Self::read_from(&self.config_path)?;
        reloaded.validate()?;
        let changed = reloaded != self.config;
        self.config = reloaded;
        Ok(changed)
    }

    /// Persists the current in-memory config back to `config_path`,
    /// creating parent directories as needed.
    pub fn save(&self) -> crate::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| crate::CoreError::Config(format!("creating {}: {e}", parent.display())))?;
            }
        }
        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| crate::CoreError::Config(format!("serializing config: {e}")))?;
        std::fs::write(&self.config_path, content).map_err(|e| {
            crate::CoreError::Config(format!("writing {}: {e}", self.config_path.display()))
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
