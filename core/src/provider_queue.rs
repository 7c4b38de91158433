//! Provider Queues: one FIFO-with-pacing lane per `queue_group`, spacing
//! outbound calls by `queue_min_interval_sec` +/- jitter and retrying
//! transient failures with linear backoff.
//!
//! Unlike the store-backed components, these queues are per-process and
//! in-memory only — a restart drops whatever was pending, same as the
//! teacher's metric buffer but without the buffer's own disk fallback,
//! since provider calls here are not telemetry that must survive a crash.

use futures_util::future::BoxFuture;
use rand::Rng;
use shared::config::QueueGroupConfig;
use shared::model::QueueGroupStats;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Why a call failed. Transient failures are retried per the group's
/// `queue_max_retries`; permanent ones are not.
#[derive(Debug, Clone)]
pub enum CallError {
    Transient(String),
    Permanent(String),
}

impl CallError {
    fn message(&self) -> &str {
        match self {
            CallError::Transient(m) | CallError::Permanent(m) => m,
        }
    }
}

pub type CallResult = Result<serde_json::Value, CallError>;
/// `Fn`, not `FnOnce`: a call may need to run again across retries, so the
/// closure must be safe to invoke more than once.
pub type QueuedFn = Arc<dyn Fn() -> BoxFuture<'static, CallResult> + Send + Sync>;

/// What a submitter gets back once its call has run (successfully or not,
/// retries exhausted or not).
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub result: Result<serde_json::Value, String>,
    pub attempts: u32,
    pub wait_sec: f64,
}

struct QueuedCall {
    call: QueuedFn,
    reply: oneshot::Sender<CallOutcome>,
    label: String,
}

/// Manages one consumer task per `queue_group`, created lazily on first
/// submission so groups that are never used never spawn anything.
pub struct ProviderQueues {
    groups: Mutex<HashMap<String, GroupHandle>>,
    configs: Arc<HashMap<String, QueueGroupConfig>>,
    default_config: QueueGroupConfig,
}

struct GroupHandle {
    sender: mpsc::Sender<QueuedCall>,
    stats: Arc<RwLock<QueueGroupStats>>,
}

impl ProviderQueues {
    pub fn new(configs: HashMap<String, QueueGroupConfig>) -> Arc<Self> {
        Arc::new(ProviderQueues {
            groups: Mutex::new(HashMap::new()),
            configs: Arc::new(configs),
            default_config: QueueGroupConfig::default(),
        })
    }

    fn config_for(&self, group: &str) -> QueueGroupConfig {
        self.configs.get(group).cloned().unwrap_or_else(|| self.default_config.clone())
    }

    /// Submits a call to `group`'s lane, spawning the lane's consumer task
    /// on first use. Awaits the call's eventual outcome (after pacing and
    /// any retries) — the caller's own task is the one suspended, not the
    /// lane, so a slow submitter cannot stall other groups.
    pub async fn submit(
        self: &Arc<Self>,
        group: &str,
        label: impl Into<String>,
        call: QueuedFn,
    ) -> shared::Result<CallOutcome> {
        let (sender, stats) = self.handle_for(group);
        stats.write().unwrap().pending += 1;
        let (reply, rx) = oneshot::channel();
        sender
            .send(QueuedCall {
                call,
                reply,
                label: label.into(),
            })
            .await
            .map_err(|_| shared::CoreError::Internal("provider queue consumer stopped".into()))?;
        rx.await
            .map_err(|_| shared::CoreError::Internal("provider queue dropped reply".into()).into())
    }

    fn handle_for(self: &Arc<Self>, group: &str) -> (mpsc::Sender<QueuedCall>, Arc<RwLock<QueueGroupStats>>) {
        let mut groups = self.groups.lock().unwrap();
        if let Some(handle) = groups.get(group) {
            return (handle.sender.clone(), handle.stats.clone());
        }

        let (sender, receiver) = mpsc::channel(256);
        let stats = Arc::new(RwLock::new(QueueGroupStats::default()));
        let cfg = self.config_for(group);
        let group_name = group.to_string();
        tokio::spawn(run_group(group_name, cfg, receiver, stats.clone()));
        groups.insert(
            group.to_string(),
            GroupHandle {
                sender: sender.clone(),
                stats: stats.clone(),
            },
        );
        (sender, stats)
    }

    /// Observability snapshot for `GET /api/central/metrics`. Groups that
    /// have never received a call are omitted rather than fabricated.
    pub fn stats(&self) -> HashMap<String, QueueGroupStats> {
        let groups = self.groups.lock().unwrap();
        groups
            .iter()
            .map(|(name, handle)| (name.clone(), handle.stats.read().unwrap().clone()))
            .collect()
    }
}

/// The consumer loop for one queue group: drains calls FIFO, spacing
/// successive dispatches by `queue_min_interval_sec` +/- jitter and
/// retrying transient failures with `linear_backoff_sec` up to
/// `queue_max_retries` times.
async fn run_group(
    group: String,
    cfg: QueueGroupConfig,
    mut receiver: mpsc::Receiver<QueuedCall>,
    stats: Arc<RwLock<QueueGroupStats>>,
) {
    info!(group = %group, min_interval_sec = cfg.queue_min_interval_sec, "provider queue started");

    while let Some(queued) = receiver.recv().await {
        {
            let mut s = stats.write().unwrap();
            s.pending = s.pending.saturating_sub(1);
        }

        let wait_start = shared::utils::now();
        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt += 1;
            let call_result = (queued.call)().await;
            match call_result {
                Ok(value) => break Ok(value),
                Err(CallError::Permanent(msg)) => {
                    warn!(group = %group, label = %queued.label, error = %msg, "provider call failed permanently");
                    break Err(msg);
                }
                Err(CallError::Transient(msg)) => {
                    if attempt > cfg.queue_max_retries {
                        warn!(group = %group, label = %queued.label, attempts = attempt, error = %msg, "provider call exhausted retries");
                        break Err(msg);
                    }
                    let backoff = shared::utils::linear_backoff_sec(cfg.queue_retry_backoff_sec, attempt);
                    debug!(group = %group, label = %queued.label, attempt, backoff_sec = backoff, error = %msg, "retrying provider call");
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                }
            }
        };

        let wait_sec = (shared::utils::now() - wait_start).num_milliseconds() as f64 / 1000.0;
        update_stats(&stats, outcome.is_ok(), wait_sec);

        let _ = queued.reply.send(CallOutcome {
            result: outcome,
            attempts: attempt,
            wait_sec,
        });

        if cfg.queue_min_interval_sec > 0.0 || cfg.queue_jitter_sec > 0.0 {
            let jitter = if cfg.queue_jitter_sec > 0.0 {
                rand::rng().random_range(-cfg.queue_jitter_sec..=cfg.queue_jitter_sec)
            } else {
                0.0
            };
            let pace = (cfg.queue_min_interval_sec + jitter).max(0.0);
            if pace > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(pace)).await;
            }
        }
    }

    info!(group = %group, "provider queue stopped (all senders dropped)");
}

fn update_stats(stats: &Arc<RwLock<QueueGroupStats>>, success: bool, wait_sec: f64) {
    let mut s = stats.write().unwrap();
    s.calls_total += 1;
    if success {
        s.calls_success += 1;
    } else {
        s.calls_failed += 1;
    }
    s.wait_sec_last = wait_sec;
    let n = s.calls_total as f64;
    s.wait_sec_avg = ((s.wait_sec_avg * (n - 1.0)) + wait_sec) / n;
    if wait_sec > s.wait_sec_max {
        s.wait_sec_max = wait_sec;
    }
}

/// Convenience for submitters that never fail transiently and don't need
/// the raw `CallError` distinction — wraps an `anyhow`-style result as
/// permanent.
pub fn permanent_err(e: impl std::fmt::Display) -> CallError {
    CallError::Permanent(e.to_string())
}

pub fn transient_err(e: impl std::fmt::Display) -> CallError {
    CallError::Transient(e.to_string())
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
#[path = "tests/provider_queue_tests.rs"]
mod tests;
