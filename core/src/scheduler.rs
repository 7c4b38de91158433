//! Heartbeat: the periodic tick that decides what should run, without
//! executing anything itself.

use crate::gateway::GatewayHandle;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use shared::model::{HeartbeatState, MisfirePolicy, RunStatus, Schedule, ScheduleMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Runs the periodic scheduling tick: reads due schedules, computes missed
/// fire instants, applies misfire policy, and enqueues Run rows on an
/// `interval_at` cadence with cooperative shutdown.
pub struct Heartbeat {
    gateway: GatewayHandle,
    poll_interval_sec: u64,
    enabled: Arc<AtomicBool>,
}

impl Heartbeat {
    pub fn new(gateway: GatewayHandle, poll_interval_sec: u64, enabled: Arc<AtomicBool>) -> Self {
        Heartbeat {
            gateway,
            poll_interval_sec,
            enabled,
        }
    }

    /// Runs the tick loop until `shutdown` fires: `interval_at` for the
    /// cadence, `tokio::select!` against a shutdown signal so the loop
    /// exits cleanly rather than being aborted mid-tick. A tick whose
    /// `enabled` flag is off still fires the ticker
    /// (keeping the cadence steady) but skips the scheduling work, so
    /// `POST /api/central/start` resumes on the next boundary rather than
    /// needing to respawn the task.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = Instant::now() + Duration::from_secs(self.poll_interval_sec);
        let mut ticker = interval_at(start, Duration::from_secs(self.poll_interval_sec));

        info!(
            poll_interval_sec = self.poll_interval_sec,
            "heartbeat started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.enabled.load(Ordering::Relaxed) {
                        debug!("heartbeat tick skipped, central service stopped");
                        continue;
                    }
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "heartbeat tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("heartbeat stopped");
    }

    /// One tick of the algorithm: read due schedules, compute missed fire
    /// instants per misfire policy, and transactionally insert Run rows
    /// plus advance each schedule's cursor.
    async fn tick(&self) -> shared::Result<()> {
        let started_at = shared::utils::now();
        let result = self
            .gateway
            .with_connection(move |conn| run_tick(conn, started_at))
            .await;

        let finished_at = shared::utils::now();
        let (enqueued_count, tick_error) = match &result {
            Ok(count) => (*count, None),
            Err(e) => (0, Some(e.to_string())),
        };

        let state = HeartbeatState {
            last_start_at: Some(started_at),
            last_finish_at: Some(finished_at),
            last_enqueued_count: enqueued_count,
            last_heartbeat_error: tick_error.clone(),
        };
        self.gateway
            .with_connection(move |conn| crate::store::heartbeat_state::upsert(conn, &state))
            .await?;

        if let Some(err) = tick_error {
            warn!(error = %err, "heartbeat tick recorded failure, will retry next tick");
        } else {
            debug!(enqueued = enqueued_count, "heartbeat tick completed");
        }

        result.map(|_| ())
    }
}

/// The transactional body of one tick, run on the Gateway's writer
/// connection.
fn run_tick(conn: &mut rusqlite::Connection, now: DateTime<Utc>) -> shared::Result<u64> {
    let due = crate::store::schedules::list_due(conn, now)?;
    let mut enqueued_count: u64 = 0;

    let tx = conn.transaction().map_err(|e| {
        shared::CoreError::Database(format!("starting heartbeat tick transaction: {e}"))
    })?;

    for schedule in due {
        let instants = missed_fire_instants(&schedule, now)?;
        let selected = apply_misfire_policy(schedule.misfire_policy, &instants);

        let highest_instant: Option<DateTime<Utc>> = instants.last().copied();

        if !selected.is_empty() && !crate::store::runs::has_live_run(&tx, &schedule.profile_id)? {
            for fire_at in &selected {
                match crate::store::runs::insert_queued(
                    &tx,
                    Some(&schedule.schedule_id),
                    &schedule.profile_id,
                    Some(*fire_at),
                    None,
                ) {
                    Ok(_) => {
                        enqueued_count += 1;
                    }
                    Err(e) => {
                        // Unique-index collision on (schedule_id, planned_fire_at):
                        // this instant was already enqueued by an earlier tick.
                        debug!(schedule_id = %schedule.schedule_id, fire_at = %fire_at, error = %e, "skipping already-enqueued fire instant");
                    }
                }
            }
        } else if !selected.is_empty() {
            debug!(
                schedule_id = %schedule.schedule_id,
                "skipping enqueue, profile has a live run"
            );
        }

        // The cursor advances past every missed instant this tick
        // considered, whether or not any of them were actually enqueued
        // (overlap-skip, misfire `skip`, or a unique-index collision all
        // still advance `last_planned_run_at`) — otherwise the
        // `(last_planned_run_at, now]` window keeps growing and a blocked
        // `queue_all` schedule enqueues its full accumulated backlog the
        // moment it unblocks.
        let next_run_at = next_fire_instant_after(&schedule, now)?;
        let last_planned_run_at = highest_instant.unwrap_or(schedule.last_planned_run_at.unwrap_or(now));

        crate::store::schedules::advance_cursor(&tx, &schedule.schedule_id, next_run_at, last_planned_run_at)?;
    }

    tx.commit()
        .map_err(|e| shared::CoreError::Database(format!("committing heartbeat tick: {e}")))?;

    Ok(enqueued_count)
}

/// Computes the ordered list of fire instants in `(last_planned_run_at, now]`.
fn missed_fire_instants(schedule: &Schedule, now: DateTime<Utc>) -> shared::Result<Vec<DateTime<Utc>>> {
    let window_start = schedule.last_planned_run_at.unwrap_or(schedule.next_run_at - ChronoDuration::seconds(1));

    match schedule.mode {
        ScheduleMode::Frequency => {
            let minutes = schedule.run_frequency_minutes.ok_or_else(|| {
                shared::CoreError::Validation(format!(
                    "schedule {} is frequency mode without run_frequency_minutes",
                    schedule.schedule_id
                ))
            })?;
            Ok(frequency_instants(window_start, now, minutes))
        }
        ScheduleMode::Calendar => calendar_instants(schedule, window_start, now),
    }
}

fn frequency_instants(window_start: DateTime<Utc>, now: DateTime<Utc>, minutes: u32) -> Vec<DateTime<Utc>> {
    let step = ChronoDuration::minutes(minutes.max(1) as i64);
    let mut out = Vec::new();
    let mut candidate = window_start + step;
    while candidate <= now {
        out.push(candidate);
        candidate += step;
    }
    out
}

/// Cross-product of `time_of_day` x `day_of_week`, interpreted in the
/// schedule's timezone, restricted to `(window_start, now]`.
fn calendar_instants(
    schedule: &Schedule,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> shared::Result<Vec<DateTime<Utc>>> {
    let tz: chrono_tz::Tz = schedule.timezone.parse().map_err(|_| {
        shared::CoreError::Validation(format!("unknown timezone '{}'", schedule.timezone))
    })?;

    let mut out = Vec::new();
    let window_start_local = window_start.with_timezone(&tz);
    let now_local = now.with_timezone(&tz);

    let mut day = window_start_local.date_naive();
    let end_day = now_local.date_naive();

    while day <= end_day {
        let weekday = day.weekday().num_days_from_sunday() as u8;
        for entry in &schedule.calendar_entries {
            if entry.day_of_week != weekday {
                continue;
            }
            let Some((hour, minute)) = parse_time_of_day(&entry.time_of_day) else {
                continue;
            };
            let Some(naive_time) = day.and_hms_opt(hour, minute, 0) else {
                continue;
            };
            let Some(local_dt) = tz.from_local_datetime(&naive_time).single() else {
                continue;
            };
            let utc_dt = local_dt.with_timezone(&Utc);
            if utc_dt > window_start && utc_dt <= now {
                out.push(utc_dt);
            }
        }
        day = day.succ_opt().unwrap_or(day);
        if day == end_day && day.succ_opt().is_none() {
            break;
        }
        if day > end_day {
            break;
        }
    }

    out.sort();
    Ok(out)
}

fn parse_time_of_day(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    Some((h.parse().ok()?, m.parse().ok()?))
}

fn apply_misfire_policy(policy: MisfirePolicy, instants: &[DateTime<Utc>]) -> Vec<DateTime<Utc>> {
    match policy {
        MisfirePolicy::QueueAll => instants.to_vec(),
        MisfirePolicy::QueueLatest => instants.last().copied().into_iter().collect(),
        MisfirePolicy::Skip => Vec::new(),
    }
}

/// The next fire instant strictly after `now`, used to set the schedule's
/// `next_run_at` cursor for the following tick, and by the Control API to
/// seed `next_run_at` when a schedule is first created or edited.
pub(crate) fn next_fire_instant_after(schedule: &Schedule, now: DateTime<Utc>) -> shared::Result<DateTime<Utc>> {
    match schedule.mode {
        ScheduleMode::Frequency => {
            let minutes = schedule.run_frequency_minutes.ok_or_else(|| {
                shared::CoreError::Validation(format!(
                    "schedule {} is frequency mode without run_frequency_minutes",
                    schedule.schedule_id
                ))
            })?;
            let step = ChronoDuration::minutes(minutes.max(1) as i64);
            let mut candidate = now + step;
            // Defensive: keep stepping forward in case `now` already sits
            // exactly on a prior boundary.
            while candidate <= now {
                candidate += step;
            }
            Ok(candidate)
        }
        ScheduleMode::Calendar => {
            let tz: chrono_tz::Tz = schedule.timezone.parse().map_err(|_| {
                shared::CoreError::Validation(format!("unknown timezone '{}'", schedule.timezone))
            })?;
            let now_local = now.with_timezone(&tz);
            let mut day = now_local.date_naive();

            for _ in 0..8 {
                let weekday = day.weekday().num_days_from_sunday() as u8;
                let mut candidates_today: Vec<(u32, u32)> = schedule
                    .calendar_entries
                    .iter()
                    .filter(|e| e.day_of_week == weekday)
                    .filter_map(|e| parse_time_of_day(&e.time_of_day))
                    .collect();
                candidates_today.sort();

                for (hour, minute) in candidates_today {
                    let Some(naive_time) = day.and_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let Some(local_dt) = tz.from_local_datetime(&naive_time).single() else {
                        continue;
                    };
                    let utc_dt = local_dt.with_timezone(&Utc);
                    if utc_dt > now {
                        return Ok(utc_dt);
                    }
                }
                day = day.succ_opt().unwrap_or(day);
            }

            // No calendar entries fire in the next week; park far enough out
            // that the schedule stops being a `list_due` candidate until
            // edited, rather than spinning every tick.
            Ok(now + ChronoDuration::days(7))
        }
    }
}

/// Handle used by the Control API's `start`/`stop` endpoints and by process
/// shutdown. `start`/`stop` are idempotent flips of `enabled` (the tick loop
/// keeps running either way); `shutdown` is the one-way signal that ends the
/// loop for good.
#[derive(Clone)]
pub struct HeartbeatControl {
    shutdown: Arc<watch::Sender<bool>>,
    enabled: Arc<AtomicBool>,
}

impl HeartbeatControl {
    pub fn new(shutdown: Arc<watch::Sender<bool>>, enabled: Arc<AtomicBool>) -> Self {
        HeartbeatControl { shutdown, enabled }
    }

    pub fn start(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
