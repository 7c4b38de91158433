//! Daemon: constructs every component and wires them into one runnable
//! process (construct, run, shutdown) covering the
//! heartbeat/dispatcher/summary/provider-queue/control-API set.

use crate::dispatcher::{Dispatcher, DispatcherControl};
use crate::gateway::{self, GatewayHandle};
use crate::provider_queue::ProviderQueues;
use crate::runner::{AgenticRegistry, Runner};
use crate::scheduler::{Heartbeat, HeartbeatControl};
use crate::summary::{ConcatenativeSummarizer, MemoryIngest, ModelSummarizer, SummaryWorker, Summarizer, SweepTrigger};
use shared::config::DaemonConfig;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Fallback truncation length for the deterministic summarizer when no
/// model-backed summarizer is configured or available.
const CONCATENATIVE_SUMMARY_MAX_CHARS: usize = 4_000;

/// Everything a Control API handler needs, bundled into one cheaply
/// cloneable struct. `Daemon` itself is not `Clone` (it owns join
/// handles); `Daemon::handles()` hands out this control surface.
pub struct Daemon {
    gateway: GatewayHandle,
    dispatcher: DispatcherControl,
    heartbeat: HeartbeatControl,
    sweep_trigger: SweepTrigger,
    provider_queues: Arc<ProviderQueues>,
    config: Arc<DaemonConfig>,
    component_shutdown: watch::Sender<bool>,
    graceful_shutdown_timeout_sec: u64,
    join_handles: Vec<JoinHandle<()>>,
}

/// The cheaply-cloneable subset of `Daemon` the Control API needs. Handed
/// out once at startup and stored in `AppState`.
#[derive(Clone)]
pub struct DaemonHandles {
    pub gateway: GatewayHandle,
    pub dispatcher: DispatcherControl,
    pub heartbeat: HeartbeatControl,
    pub provider_queues: Arc<ProviderQueues>,
    pub config: Arc<DaemonConfig>,
}

impl Daemon {
    /// Opens the store, spawns every background loop, and returns the
    /// running `Daemon`. Construction order is fixed: open/migrate storage
    /// first, then bring up the components that depend on it.
    pub async fn start(
        config: DaemonConfig,
        data_dir: &Path,
        registry: Arc<AgenticRegistry>,
        model_client: Option<Arc<dyn crate::summary::ModelClient>>,
    ) -> shared::Result<Self> {
        let config = Arc::new(config);
        let db_path = resolve_db_path(&config.scheduler_db_path, data_dir);
        let (gateway, gateway_task) = gateway::spawn(
            db_path,
            config.db_queue_busy_timeout_ms,
            config.db_queue_default_max_rows,
        )?;

        let (component_shutdown, component_shutdown_rx) = watch::channel(false);

        let provider_queues = ProviderQueues::new(config.provider_queues.clone());

        let memory_ingest = MemoryIngest::new(gateway.clone(), config.realtime_summary_turn_threshold);

        let summarizer: Arc<dyn Summarizer> = if config.daily_summary_use_model {
            Arc::new(ModelSummarizer::new(model_client, CONCATENATIVE_SUMMARY_MAX_CHARS))
        } else {
            Arc::new(ConcatenativeSummarizer::new(CONCATENATIVE_SUMMARY_MAX_CHARS))
        };

        let summary_worker = SummaryWorker::new(
            gateway.clone(),
            summarizer,
            config.summary_worker_poll_sec,
            config.summary_worker_max_jobs_per_tick,
            config.memory_manager_sweep_interval_sec,
            config.memory_manager_completion_debounce_sec,
        );
        let (sweep_trigger, summary_handles) = summary_worker.spawn(component_shutdown_rx.clone());

        let run_log_dir = data_dir.join("run_logs");
        let runner = Arc::new(Runner::new(registry));
        let dispatcher_inner = Dispatcher::new(
            gateway.clone(),
            runner,
            memory_ingest,
            sweep_trigger.clone(),
            config.task_runner_concurrency,
            run_log_dir,
            config.run_history_retention_days,
            config.run_history_max_rows,
            config.waiting_for_user_timeout_sec,
        );
        let (dispatcher, dispatcher_handles) = dispatcher_inner.spawn(component_shutdown_rx.clone());

        let heartbeat_enabled = Arc::new(AtomicBool::new(config.central_service_enabled));
        let (heartbeat_shutdown_tx, heartbeat_shutdown_rx) = watch::channel(false);
        let heartbeat_inner = Heartbeat::new(gateway.clone(), config.heartbeat_poll_interval_sec, heartbeat_enabled.clone());
        let heartbeat_handle = tokio::spawn(heartbeat_inner.run(heartbeat_shutdown_rx));
        let heartbeat = HeartbeatControl::new(Arc::new(heartbeat_shutdown_tx), heartbeat_enabled);

        let mut join_handles = vec![gateway_task, heartbeat_handle];
        join_handles.extend(dispatcher_handles);
        join_handles.extend(summary_handles);

        info!(
            db_path = %config.scheduler_db_path,
            concurrency = config.task_runner_concurrency,
            central_service_enabled = config.central_service_enabled,
            "daemon started"
        );

        let graceful_shutdown_timeout_sec = config.graceful_shutdown_timeout_sec;

        Ok(Daemon {
            gateway,
            dispatcher,
            heartbeat,
            sweep_trigger,
            provider_queues,
            config,
            component_shutdown,
            graceful_shutdown_timeout_sec,
            join_handles,
        })
    }

    pub fn handles(&self) -> DaemonHandles {
        DaemonHandles {
            gateway: self.gateway.clone(),
            dispatcher: self.dispatcher.clone(),
            heartbeat: self.heartbeat.clone(),
            provider_queues: self.provider_queues.clone(),
            config: self.config.clone(),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn sweep_trigger(&self) -> &SweepTrigger {
        &self.sweep_trigger
    }

    /// Signals every background loop to stop and waits (bounded by
    /// `graceful_shutdown_timeout_sec`) for them to finish, matching the
    /// teacher's `Server::shutdown` timeout-per-task pattern collapsed into
    /// one timeout over the whole join set, since these loops share one
    /// shutdown signal rather than being stopped in a specific order.
    pub async fn shutdown(mut self) {
        info!("daemon shutdown starting");
        self.heartbeat.shutdown();
        let _ = self.component_shutdown.send(true);

        let timeout = std::time::Duration::from_secs(self.graceful_shutdown_timeout_sec);
        for handle in self.join_handles.drain(..) {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                tracing::warn!("component did not stop within graceful shutdown timeout, abandoning");
            }
        }
        info!("daemon shutdown complete");
    }
}

/// Resolves the configured db path relative to `data_dir` when it is not
/// already absolute.
fn resolve_db_path(configured: &str, data_dir: &Path) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        path
    } else {
        data_dir.join(path)
    }
}

#[cfg(test)]
#[path = "tests/daemon_tests.rs"]
mod tests;
