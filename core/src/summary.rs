//! Memory Summary Pipeline: ingests lifecycle events into the day-memory
//! log, sweeps for days that need summarizing, and drains `SummaryJob`s
//! through a pluggable `Summarizer`.
//!
//! Shares the Heartbeat's periodic-ticker shape, with an added debounce
//! timer for the run-completion sweep: a fixed interval alone would sweep
//! every tick, so the debounce collapses a burst of run completions into
//! one sweep rather than one per Run.

use crate::gateway::GatewayHandle;
use async_trait::async_trait;
use shared::model::{DayMemoryEvent, MemoryEventKind, MemoryLayer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Produces a narrative summary from a day's raw transcript. Exists as a
/// trait so a model-backed implementation can be injected without the
/// pipeline itself depending on any particular provider.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, day: &str, events: &[DayMemoryEvent]) -> shared::Result<String>;
}

/// Deterministic fallback: concatenates event text, prefixed by kind. Always
/// available, used directly when `daily_summary_use_model` is off and as
/// the fallback when a `ModelSummarizer` has no client injected.
pub struct ConcatenativeSummarizer {
    max_chars: usize,
}

impl ConcatenativeSummarizer {
    pub fn new(max_chars: usize) -> Self {
        ConcatenativeSummarizer { max_chars }
    }
}

#[async_trait]
impl Summarizer for ConcatenativeSummarizer {
    async fn summarize(&self, day: &str, events: &[DayMemoryEvent]) -> shared::Result<String> {
        let mut out = format!("Summary for {day} ({} events):\n", events.len());
        for event in events {
            let line = format!("[{}] {}\n", event.kind, event.text);
            if out.len() + line.len() > self.max_chars {
                out.push_str("... (truncated)\n");
                break;
            }
            out.push_str(&line);
        }
        Ok(out)
    }
}

/// A seam for a model-backed summarizer. Without an injected client this
/// behaves exactly like `ConcatenativeSummarizer` — model summarization is
/// additive, not a hard requirement the pipeline depends on.
pub struct ModelSummarizer {
    client: Option<Arc<dyn ModelClient>>,
    fallback: ConcatenativeSummarizer,
}

/// Minimal seam a real model integration implements. Kept deliberately
/// narrow (a single prompt-in/text-out call) since the model provider
/// itself is out of scope here.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> shared::Result<String>;
}

impl ModelSummarizer {
    pub fn new(client: Option<Arc<dyn ModelClient>>, fallback_max_chars: usize) -> Self {
        ModelSummarizer {
            client,
            fallback: ConcatenativeSummarizer::new(fallback_max_chars),
        }
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, day: &str, events: &[DayMemoryEvent]) -> shared::Result<String> {
        let Some(client) = &self.client else {
            warn!(day, "daily_summary_use_model is set but no model client is configured, falling back to concatenative summary");
            return self.fallback.summarize(day, events).await;
        };

        let transcript: Vec<String> = events.iter().map(|e| format!("[{}] {}", e.kind, e.text)).collect();
        let prompt = format!(
            "Summarize the following day's activity for {day} in a few sentences:\n\n{}",
            transcript.join("\n")
        );
        match client.complete(&prompt).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                warn!(day, error = %e, "model summarization failed, falling back to concatenative summary");
                self.fallback.summarize(day, events).await
            }
        }
    }
}

/// Appends events to the day-memory log on behalf of the Dispatcher and
/// Control API, enqueuing a realtime `SummaryJob` once a day's unswept
/// message count crosses `realtime_summary_turn_threshold`.
#[derive(Clone)]
pub struct MemoryIngest {
    gateway: GatewayHandle,
    realtime_summary_turn_threshold: u64,
}

impl MemoryIngest {
    pub fn new(gateway: GatewayHandle, realtime_summary_turn_threshold: u64) -> Self {
        MemoryIngest {
            gateway,
            realtime_summary_turn_threshold,
        }
    }

    /// Records one event and enqueues a realtime summary job if the
    /// threshold is crossed. Only `user`/`main_agent` turns and Dispatcher
    /// lifecycle milestones should ever reach this — callers are
    /// responsible for not flooding it with raw agentic step noise.
    pub async fn record(&self, kind: MemoryEventKind, text: String, session_id: Option<String>) -> shared::Result<()> {
        let now = shared::utils::now();
        let day = shared::utils::day_string(now);
        let threshold = self.realtime_summary_turn_threshold;
        let event = DayMemoryEvent {
            event_id: shared::utils::new_id(),
            day: day.clone(),
            event_time: now,
            session_id,
            kind,
            text,
            layer: MemoryLayer::Raw,
        };

        self.gateway
            .with_connection(move |conn| {
                crate::store::memory::append_event(conn, &event)?;
                if let Some(status) = crate::store::memory::get_status(conn, &day)? {
                    if status.messages_since_last_summary >= threshold {
                        crate::store::summary_jobs::enqueue(conn, &day, "realtime_threshold")?;
                    }
                }
                Ok(())
            })
            .await
    }
}

/// Pings a debounce timer so a burst of run completions collapses into one
/// sweep rather than one per Run.
#[derive(Clone)]
pub struct SweepTrigger {
    sender: watch::Sender<Instant>,
}

impl SweepTrigger {
    pub fn ping(&self) {
        let _ = self.sender.send(Instant::now());
    }
}

/// Background worker owning both the summary-job drain loop and the two
/// sweeps (`memory_manager_sweep_interval_sec` periodic,
/// `memory_manager_completion_debounce_sec` debounced-on-completion) that
/// keep `list_unswept_days` from growing unbounded.
pub struct SummaryWorker {
    gateway: GatewayHandle,
    summarizer: Arc<dyn Summarizer>,
    poll_interval_sec: u64,
    max_jobs_per_tick: u32,
    sweep_interval_sec: u64,
    completion_debounce_sec: u64,
}

impl SummaryWorker {
    pub fn new(
        gateway: GatewayHandle,
        summarizer: Arc<dyn Summarizer>,
        poll_interval_sec: u64,
        max_jobs_per_tick: u32,
        sweep_interval_sec: u64,
        completion_debounce_sec: u64,
    ) -> Self {
        SummaryWorker {
            gateway,
            summarizer,
            poll_interval_sec,
            max_jobs_per_tick,
            sweep_interval_sec,
            completion_debounce_sec,
        }
    }

    /// Spawns the drain loop, the periodic sweep, and the debounced
    /// completion sweep. Returns a `SweepTrigger` the Dispatcher pings
    /// after archiving a terminal Run, plus the join handles for shutdown.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> (SweepTrigger, Vec<tokio::task::JoinHandle<()>>) {
        let gateway = self.gateway.clone();
        let summarizer = self.summarizer.clone();
        let poll_interval_sec = self.poll_interval_sec;
        let max_jobs_per_tick = self.max_jobs_per_tick;
        let sweep_interval_sec = self.sweep_interval_sec;
        let completion_debounce_sec = self.completion_debounce_sec;

        let (sweep_sender, sweep_receiver) = watch::channel(Instant::now());
        let trigger = SweepTrigger { sender: sweep_sender };

        let mut handles = Vec::new();

        let drain_shutdown = shutdown.clone();
        handles.push(tokio::spawn(drain_loop(
            gateway.clone(),
            summarizer,
            poll_interval_sec,
            max_jobs_per_tick,
            drain_shutdown,
        )));

        let periodic_shutdown = shutdown.clone();
        handles.push(tokio::spawn(periodic_sweep_loop(
            gateway.clone(),
            sweep_interval_sec,
            periodic_shutdown,
        )));

        handles.push(tokio::spawn(debounced_sweep_loop(
            gateway,
            sweep_receiver,
            completion_debounce_sec,
            shutdown.clone(),
        )));

        let _ = shutdown.borrow_and_update();
        (trigger, handles)
    }
}

async fn drain_loop(
    gateway: GatewayHandle,
    summarizer: Arc<dyn Summarizer>,
    poll_interval_sec: u64,
    max_jobs_per_tick: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(poll_interval_sec.max(1)));
    info!(poll_interval_sec, "summary worker drain loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = drain_once(&gateway, summarizer.as_ref(), max_jobs_per_tick).await {
                    error!(error = %e, "summary job drain tick failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("summary worker drain loop stopped");
}

/// Above this many raw characters, a day's transcript is split into
/// segments rather than handed to the `Summarizer` in one call.
const OVERSIZE_CHAR_THRESHOLD: usize = 20_000;
/// Number of events grouped per segment when splitting an oversize day.
const SEGMENT_EVENT_COUNT: usize = 50;

fn transcript_char_len(events: &[DayMemoryEvent]) -> usize {
    events.iter().map(|e| e.text.len()).sum()
}

/// Summarizes `events`, recursively splitting into segments first when the
/// transcript is oversize: each segment is summarized independently, then
/// the concatenation of segment summaries is itself summarized (recursing
/// again if that concatenation is still oversize).
fn summarize_recursive<'a>(
    summarizer: &'a dyn Summarizer,
    day: &'a str,
    events: Vec<DayMemoryEvent>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = shared::Result<String>> + Send + 'a>> {
    Box::pin(async move {
        if events.len() <= SEGMENT_EVENT_COUNT || transcript_char_len(&events) <= OVERSIZE_CHAR_THRESHOLD {
            return summarizer.summarize(day, &events).await;
        }

        info!(day, events = events.len(), "day transcript oversize, splitting into segments");
        let mut segment_summaries = Vec::new();
        for chunk in events.chunks(SEGMENT_EVENT_COUNT) {
            let text = summarize_recursive(summarizer, day, chunk.to_vec()).await?;
            let event_time = chunk.last().map(|e| e.event_time).unwrap_or_else(shared::utils::now);
            segment_summaries.push(DayMemoryEvent {
                event_id: shared::utils::new_id(),
                day: day.to_string(),
                event_time,
                session_id: None,
                kind: MemoryEventKind::MainAgent,
                text,
                layer: MemoryLayer::Summary,
            });
        }
        summarize_recursive(summarizer, day, segment_summaries).await
    })
}

async fn drain_once(gateway: &GatewayHandle, summarizer: &dyn Summarizer, limit: u32) -> shared::Result<()> {
    let jobs = gateway
        .with_connection(move |conn| crate::store::summary_jobs::claim_batch(conn, limit))
        .await?;

    for job in jobs {
        let events = gateway
            .with_connection({
                let day = job.day.clone();
                move |conn| crate::store::memory::raw_transcript(conn, &day)
            })
            .await?;

        match summarize_recursive(summarizer, &job.day, events).await {
            Ok(text) => {
                let today = shared::utils::today_string();
                gateway
                    .with_connection({
                        let day = job.day.clone();
                        let job_id = job.job_id.clone();
                        move |conn| {
                            crate::store::memory::record_summary(conn, &day, &text, &today)?;
                            crate::store::summary_jobs::finish(
                                conn,
                                &job_id,
                                shared::model::SummaryJobStatus::Done,
                            )
                        }
                    })
                    .await?;
                debug!(day = %job.day, job_id = %job.job_id, "summary job completed");
            }
            Err(e) => {
                warn!(day = %job.day, job_id = %job.job_id, error = %e, "summary job failed");
                gateway
                    .with_connection({
                        let job_id = job.job_id.clone();
                        move |conn| {
                            crate::store::summary_jobs::finish(
                                conn,
                                &job_id,
                                shared::model::SummaryJobStatus::Failed,
                            )
                        }
                    })
                    .await?;
            }
        }
    }
    Ok(())
}

async fn periodic_sweep_loop(gateway: GatewayHandle, interval_sec: u64, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_sec.max(1)));
    info!(interval_sec, "summary periodic sweep started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweep_once(&gateway).await {
                    error!(error = %e, "periodic summary sweep failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("summary periodic sweep stopped");
}

async fn debounced_sweep_loop(
    gateway: GatewayHandle,
    mut pings: watch::Receiver<Instant>,
    debounce_sec: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let debounce = Duration::from_secs(debounce_sec.max(1));

    loop {
        tokio::select! {
            changed = pings.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }

        let mut deadline = *pings.borrow() + debounce;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if let Err(e) = sweep_once(&gateway).await {
                        error!(error = %e, "debounced summary sweep failed");
                    }
                    break;
                }
                changed = pings.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    deadline = *pings.borrow() + debounce;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

async fn sweep_once(gateway: &GatewayHandle) -> shared::Result<()> {
    let today = shared::utils::today_string();
    let days = gateway
        .with_connection({
            let today = today.clone();
            move |conn| crate::store::memory::list_unswept_days(conn, &today)
        })
        .await?;

    for day in days {
        gateway
            .with_connection(move |conn| crate::store::summary_jobs::enqueue(conn, &day, "sweep").map(|_| ()))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/summary_tests.rs"]
mod tests;
