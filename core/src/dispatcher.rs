//! Dispatcher + Slots: a fixed pool of claim-loop workers that turn queued
//! Runs into terminal status — one spawned loop per slot, each holding a
//! `CancellationToken` for its in-flight Run.

use crate::gateway::GatewayHandle;
use crate::runner::{Runner, RunnerContext};
use crate::summary::{MemoryIngest, SweepTrigger};
use serde_json::{json, Value};
use shared::model::{error_markers, MemoryEventKind, Run, RunOutcome, RunStatus, SlotSnapshot, WaitingContract};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often an idle slot polls `claim_next_queued` even without a
/// `trigger()` nudge — keeps a slot from stalling if a notify is missed.
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Cadence of the waiting-for-user expiry sweep.
const WAITING_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Dispatcher {
    gateway: GatewayHandle,
    runner: Arc<Runner>,
    memory_ingest: MemoryIngest,
    sweep_trigger: SweepTrigger,
    concurrency: usize,
    run_log_dir: PathBuf,
    run_history_retention_days: u32,
    run_history_max_rows: u64,
    waiting_for_user_timeout_sec: u64,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: GatewayHandle,
        runner: Arc<Runner>,
        memory_ingest: MemoryIngest,
        sweep_trigger: SweepTrigger,
        concurrency: usize,
        run_log_dir: PathBuf,
        run_history_retention_days: u32,
        run_history_max_rows: u64,
        waiting_for_user_timeout_sec: u64,
    ) -> Self {
        Dispatcher {
            gateway,
            runner,
            memory_ingest,
            sweep_trigger,
            concurrency: concurrency.max(1),
            run_log_dir,
            run_history_retention_days,
            run_history_max_rows,
            waiting_for_user_timeout_sec,
        }
    }

    /// Spawns `concurrency` slot loops plus the waiting-expiry housekeeping
    /// loop. Returns a `DispatcherControl` for the Control API's
    /// kill/resume/trigger/snapshot operations, plus join handles for
    /// shutdown.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (DispatcherControl, Vec<JoinHandle<()>>) {
        let slots = Arc::new(RwLock::new(
            (0..self.concurrency)
                .map(|slot_id| SlotSnapshot {
                    slot_id,
                    busy: false,
                    run_id: None,
                    task_id: None,
                    started_at: None,
                    last_result: None,
                })
                .collect::<Vec<_>>(),
        ));
        let cancel_tokens: Arc<Mutex<HashMap<String, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));
        let notify = Arc::new(Notify::new());

        let mut handles = Vec::with_capacity(self.concurrency + 1);
        for slot_id in 0..self.concurrency {
            handles.push(tokio::spawn(slot_loop(
                slot_id,
                self.gateway.clone(),
                self.runner.clone(),
                self.memory_ingest.clone(),
                self.sweep_trigger.clone(),
                slots.clone(),
                cancel_tokens.clone(),
                notify.clone(),
                self.run_log_dir.clone(),
                self.run_history_retention_days,
                self.run_history_max_rows,
                shutdown.clone(),
            )));
        }

        handles.push(tokio::spawn(waiting_expiry_loop(
            self.gateway.clone(),
            self.memory_ingest.clone(),
            self.waiting_for_user_timeout_sec,
            shutdown,
        )));

        let control = DispatcherControl {
            gateway: self.gateway,
            cancel_tokens,
            notify,
            slots,
        };
        (control, handles)
    }
}

/// Handle used by the Control API to kill/resume Runs, nudge idle slots,
/// and read slot snapshots for `/api/central/status`.
#[derive(Clone)]
pub struct DispatcherControl {
    gateway: GatewayHandle,
    cancel_tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
    notify: Arc<Notify>,
    slots: Arc<RwLock<Vec<SlotSnapshot>>>,
}

impl DispatcherControl {
    /// Wakes every idle slot immediately rather than waiting for the next
    /// `FALLBACK_POLL_INTERVAL` tick — used after a manual trigger, an
    /// agentic enqueue, or a resume.
    pub fn trigger(&self) {
        self.notify.notify_waiters();
    }

    pub async fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots.read().await.clone()
    }

    /// Kills a Run. A queued Run transitions directly to `blocked`; a
    /// running Run is signaled via its slot's `CancellationToken` and
    /// finalizes through the slot's own terminal path, not this call.
    pub async fn kill(&self, run_id: &str) -> shared::Result<bool> {
        if let Some(token) = self.cancel_tokens.lock().unwrap().get(run_id).cloned() {
            token.cancel();
            return Ok(true);
        }

        let run_id_owned = run_id.to_string();
        let killed = self
            .gateway
            .with_connection(move |conn| crate::store::runs::kill_queued(conn, &run_id_owned, error_markers::KILLED))
            .await?;

        if killed {
            let run_id_owned = run_id.to_string();
            self.gateway
                .with_connection(move |conn| {
                    if let Some(run) = crate::store::runs::get(conn, &run_id_owned)? {
                        crate::store::history::archive(conn, &run)?;
                        crate::store::history::remove_live_run(conn, &run_id_owned)?;
                    }
                    Ok(())
                })
                .await?;
        }
        Ok(killed)
    }

    /// Resumes a `waiting_for_user` Run, merging `response` into its
    /// payload and transitioning it back to `queued`. The next idle slot
    /// picks it up, woken immediately via `trigger`.
    pub async fn resume(&self, run_id: &str, response: Value) -> shared::Result<bool> {
        let run_id_owned = run_id.to_string();
        let resumed = self
            .gateway
            .with_connection(move |conn| {
                let Some(run) = crate::store::runs::get(conn, &run_id_owned)? else {
                    return Ok(false);
                };
                if run.status != RunStatus::WaitingForUser {
                    return Ok(false);
                }
                let merged = merge_response(run.payload_json.as_deref(), &response);
                crate::store::runs::resume_to_queued(conn, &run_id_owned, &merged)?;
                Ok(true)
            })
            .await?;

        if resumed {
            self.trigger();
        }
        Ok(resumed)
    }
}

/// Merges a user's `resume` response into the Run's existing
/// `payload_json` under a `response` key, preserving whatever the Run was
/// originally enqueued with.
fn merge_response(existing: Option<&str>, response: &Value) -> String {
    let mut base: Value = existing
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_else(|| json!({}));
    match base {
        Value::Object(ref mut map) => {
            map.insert("response".to_string(), response.clone());
        }
        _ => base = json!({ "response": response }),
    }
    base.to_string()
}

#[allow(clippy::too_many_arguments)]
async fn slot_loop(
    slot_id: usize,
    gateway: GatewayHandle,
    runner: Arc<Runner>,
    memory_ingest: MemoryIngest,
    sweep_trigger: SweepTrigger,
    slots: Arc<RwLock<Vec<SlotSnapshot>>>,
    cancel_tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
    notify: Arc<Notify>,
    run_log_dir: PathBuf,
    retention_days: u32,
    max_rows: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(slot_id, "dispatcher slot started");

    loop {
        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(FALLBACK_POLL_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        loop {
            let claimed = match gateway.with_connection(|conn| crate::store::runs::claim_next_queued(conn)).await {
                Ok(Some(run)) => run,
                Ok(None) => break,
                Err(e) => {
                    error!(slot_id, error = %e, "claiming next queued run failed");
                    break;
                }
            };

            if let Err(e) = run_one(
                slot_id,
                claimed,
                &gateway,
                &runner,
                &memory_ingest,
                &sweep_trigger,
                &slots,
                &cancel_tokens,
                &run_log_dir,
                retention_days,
                max_rows,
            )
            .await
            {
                error!(slot_id, error = %e, "run execution failed");
            }
        }
    }

    info!(slot_id, "dispatcher slot stopped");
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    slot_id: usize,
    run: Run,
    gateway: &GatewayHandle,
    runner: &Arc<Runner>,
    memory_ingest: &MemoryIngest,
    sweep_trigger: &SweepTrigger,
    slots: &Arc<RwLock<Vec<SlotSnapshot>>>,
    cancel_tokens: &Arc<Mutex<HashMap<String, CancellationToken>>>,
    run_log_dir: &Path,
    retention_days: u32,
    max_rows: u64,
) -> shared::Result<()> {
    // Defensive re-check: `claim_next_queued`'s correlated NOT EXISTS
    // subquery already makes this race structurally impossible under the
    // Gateway's single-writer serialization, but a second live run for the
    // same profile is still checked for here so a violation is surfaced as
    // `requeued_race` rather than silently overlapping.
    let profile_id = run.profile_id.clone();
    let run_id = run.run_id.clone();
    let raced = gateway
        .with_connection(move |conn| {
            let siblings = crate::store::runs::list_active_by_profile(conn, &profile_id)?;
            Ok(siblings.into_iter().any(|r| r.run_id != run_id && r.status != RunStatus::Queued))
        })
        .await?;

    if raced {
        warn!(run_id = %run.run_id, profile_id = %run.profile_id, "no-overlap race detected at claim, requeuing as blocked");
        finalize_terminal(
            gateway,
            memory_ingest,
            sweep_trigger,
            &run,
            RunOutcome {
                status: RunStatus::Blocked,
                summary: None,
                error: Some(error_markers::REQUEUED_RACE.to_string()),
                artifacts: None,
                waiting_contract: None,
            },
            retention_days,
            max_rows,
        )
        .await?;
        return Ok(());
    }

    let profile = match gateway
        .with_connection({
            let profile_id = run.profile_id.clone();
            move |conn| crate::store::profiles::get(conn, &profile_id)
        })
        .await?
    {
        Some(profile) if profile.enabled => profile,
        Some(_) => {
            finalize_terminal(
                gateway,
                memory_ingest,
                sweep_trigger,
                &run,
                failed_outcome("task profile is disabled"),
                retention_days,
                max_rows,
            )
            .await?;
            return Ok(());
        }
        None => {
            finalize_terminal(
                gateway,
                memory_ingest,
                sweep_trigger,
                &run,
                failed_outcome("task profile no longer exists"),
                retention_days,
                max_rows,
            )
            .await?;
            return Ok(());
        }
    };

    let cancel = CancellationToken::new();
    cancel_tokens.lock().unwrap().insert(run.run_id.clone(), cancel.clone());
    update_slot(slots, slot_id, Some(&run), None).await;

    let payload: Value = run
        .payload_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Value::Null);
    let log_path = run_log_dir.join(format!("{}.log", run.run_id));

    let ctx = RunnerContext {
        run_id: run.run_id.clone(),
        profile,
        payload,
        cancel,
        log_path,
    };

    let outcome = runner.execute(ctx).await;
    cancel_tokens.lock().unwrap().remove(&run.run_id);

    match outcome.status {
        RunStatus::WaitingForUser => {
            let payload_json = outcome
                .waiting_contract
                .as_ref()
                .map(|c| serde_json::to_string(c).unwrap_or_default())
                .unwrap_or_default();
            gateway
                .with_connection({
                    let run_id = run.run_id.clone();
                    move |conn| crate::store::runs::mark_waiting(conn, &run_id, &payload_json)
                })
                .await?;
            memory_ingest
                .record(
                    MemoryEventKind::TaskAgentEvent,
                    format!("run_waiting run_id={} profile_id={}", run.run_id, run.profile_id),
                    None,
                )
                .await?;
            update_slot(slots, slot_id, None, Some(RunStatus::WaitingForUser)).await;
            debug!(run_id = %run.run_id, slot_id, "run released slot, waiting for user");
        }
        RunStatus::Done | RunStatus::Failed | RunStatus::Blocked => {
            let status = outcome.status;
            finalize_terminal(gateway, memory_ingest, sweep_trigger, &run, outcome, retention_days, max_rows).await?;
            update_slot(slots, slot_id, None, Some(status)).await;
        }
        RunStatus::Queued | RunStatus::Running => {
            // A Runner must never hand back a non-terminal, non-waiting
            // status; treat it as an internal failure rather than leaving
            // the Run stuck live.
            error!(run_id = %run.run_id, status = %outcome.status, "runner returned a non-terminal status, forcing failed");
            finalize_terminal(
                gateway,
                memory_ingest,
                sweep_trigger,
                &run,
                failed_outcome("runner returned an unexpected status"),
                retention_days,
                max_rows,
            )
            .await?;
            update_slot(slots, slot_id, None, Some(RunStatus::Failed)).await;
        }
    }

    Ok(())
}

fn failed_outcome(error: &str) -> RunOutcome {
    RunOutcome {
        status: RunStatus::Failed,
        summary: None,
        error: Some(error.to_string()),
        artifacts: None,
        waiting_contract: None,
    }
}

/// Writes terminal status, archives to history, records the owning
/// schedule's last-run metadata, prunes history, and pings the summary
/// sweep — the common finalize path for every terminal outcome regardless
/// of which branch produced it.
async fn finalize_terminal(
    gateway: &GatewayHandle,
    memory_ingest: &MemoryIngest,
    sweep_trigger: &SweepTrigger,
    run: &Run,
    outcome: RunOutcome,
    retention_days: u32,
    max_rows: u64,
) -> shared::Result<()> {
    let run_id = run.run_id.clone();
    let schedule_id = run.schedule_id.clone();
    let status = outcome.status;
    let summary = outcome.summary.clone();
    let error = outcome.error.clone();

    gateway
        .with_connection(move |conn| {
            crate::store::runs::finish(conn, &run_id, status, summary.as_deref(), error.as_deref())?;
            let finished = crate::store::runs::get(conn, &run_id)?
                .ok_or_else(|| shared::CoreError::Internal("run vanished immediately after finish".to_string()))?;
            crate::store::history::archive(conn, &finished)?;
            crate::store::history::remove_live_run(conn, &run_id)?;
            if let Some(schedule_id) = &schedule_id {
                crate::store::schedules::record_last_run(conn, schedule_id, status, summary.as_deref())?;
            }
            crate::store::history::prune(conn, retention_days, max_rows)?;
            Ok(())
        })
        .await?;

    memory_ingest
        .record(
            MemoryEventKind::TaskAgentEvent,
            format!("run {} finished: {status}", run.run_id),
            None,
        )
        .await?;
    sweep_trigger.ping();
    Ok(())
}

async fn update_slot(slots: &Arc<RwLock<Vec<SlotSnapshot>>>, slot_id: usize, run: Option<&Run>, last_result: Option<RunStatus>) {
    let mut slots = slots.write().await;
    let Some(slot) = slots.get_mut(slot_id) else { return };
    match run {
        Some(run) => {
            slot.busy = true;
            slot.run_id = Some(run.run_id.clone());
            slot.task_id = Some(run.profile_id.clone());
            slot.started_at = Some(shared::utils::now());
        }
        None => {
            slot.busy = false;
            slot.run_id = None;
            slot.task_id = None;
            slot.started_at = None;
        }
    }
    if let Some(last_result) = last_result {
        slot.last_result = Some(last_result);
    }
}

/// Periodically expires `waiting_for_user` Runs whose contract's
/// `expires_at` has passed. Runs holding no slot (released when they
/// entered `waiting_for_user`), so this is the only place that finalizes
/// them.
async fn waiting_expiry_loop(gateway: GatewayHandle, memory_ingest: MemoryIngest, timeout_sec: u64, mut shutdown: watch::Receiver<bool>) {
    let _ = timeout_sec; // expiry itself is driven by each contract's own `expires_at`
    let mut ticker = tokio::time::interval(WAITING_SWEEP_INTERVAL);
    info!("waiting-for-user expiry sweep started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = expire_waiting_once(&gateway, &memory_ingest).await {
                    error!(error = %e, "waiting-for-user expiry sweep tick failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("waiting-for-user expiry sweep stopped");
}

async fn expire_waiting_once(gateway: &GatewayHandle, memory_ingest: &MemoryIngest) -> shared::Result<()> {
    let waiting = gateway.with_connection(|conn| crate::store::runs::list_waiting(conn)).await?;
    let now = shared::utils::now();

    for run in waiting {
        let Some(contract) = run
            .payload_json
            .as_deref()
            .and_then(|s| serde_json::from_str::<WaitingContract>(s).ok())
        else {
            continue;
        };
        if contract.expires_at > now {
            continue;
        }

        let run_id = run.run_id.clone();
        gateway
            .with_connection(move |conn| {
                crate::store::runs::expire_waiting(conn, &run_id)?;
                if let Some(expired) = crate::store::runs::get(conn, &run_id)? {
                    crate::store::history::archive(conn, &expired)?;
                    crate::store::history::remove_live_run(conn, &run_id)?;
                }
                Ok(())
            })
            .await?;

        memory_ingest
            .record(
                MemoryEventKind::TaskAgentEvent,
                format!("run {} expired waiting for user", run.run_id),
                None,
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
