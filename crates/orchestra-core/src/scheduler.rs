//! The Background Scheduler: the two fixed recurring
//! retention sweeps, plus deferred/recurring user-initiated executions.
//!
//! Recurring fire times are plain `tokio::time::interval`-style sleeps to
//! the next UTC occurrence, not a general cron expression evaluator — the
//! two built-in jobs have fixed schedules, and scheduled agent runs use a
//! small daily/weekly/interval schedule type instead of parsing cron
//! strings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Timelike, Utc, Weekday};
use orchestra_store::Store;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EXECUTION_RETENTION_DAYS: i64 = 30;
const DELIVERY_RETENTION_DAYS: i64 = 7;

/// When a scheduled fire time is missed by more than this, only run it
/// once rather than replaying every interval that elapsed in between —
/// the `RunOnce` misfire policy.
fn compute_misfire_plan(now: DateTime<Utc>, next_fire_at: DateTime<Utc>, interval: ChronoDuration) -> (bool, DateTime<Utc>) {
    if now < next_fire_at || interval.is_zero() {
        return (false, next_fire_at);
    }
    let missed = (now - next_fire_at).num_milliseconds() / interval.num_milliseconds().max(1) + 1;
    let aligned_next = next_fire_at + interval * (missed as i32);
    (true, aligned_next)
}

/// A user-scheduled agent run: either a one-shot fire time or a recurring
/// cadence. Re-scheduling with the same key replaces the previous entry.
#[derive(Debug, Clone)]
pub enum Schedule {
    Once { at: DateTime<Utc> },
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
}

impl Schedule {
    fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Schedule::Once { at } => *at,
            Schedule::Daily { hour, minute } => next_daily(now, *hour, *minute),
            Schedule::Weekly { weekday, hour, minute } => next_weekly(now, *weekday, *hour, *minute),
        }
    }

    fn interval(&self) -> ChronoDuration {
        match self {
            Schedule::Once { .. } => ChronoDuration::zero(),
            Schedule::Daily { .. } => ChronoDuration::days(1),
            Schedule::Weekly { .. } => ChronoDuration::weeks(1),
        }
    }
}

struct ScheduledJob {
    agent_id: orchestra_types::ids::AgentId,
    submitter: orchestra_types::ids::UserId,
    schedule: Schedule,
    next_fire_at: DateTime<Utc>,
}

/// Callback the scheduler invokes to actually submit an execution; kept
/// generic so this module never depends on `ExecutionEngine` directly and
/// the two can be wired together in `engine/src/main.rs`.
pub type SubmitFn = Arc<dyn Fn(orchestra_types::ids::AgentId, orchestra_types::ids::UserId) + Send + Sync>;

#[derive(Clone)]
pub struct Scheduler {
    store: Store,
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
    submit: SubmitFn,
    tick_interval: Duration,
    next_execution_cleanup: Arc<Mutex<DateTime<Utc>>>,
    next_log_cleanup: Arc<Mutex<DateTime<Utc>>>,
}

const EXECUTION_CLEANUP_SCHEDULE: Schedule = Schedule::Daily { hour: 2, minute: 0 };
const LOG_CLEANUP_SCHEDULE: Schedule = Schedule::Weekly { weekday: Weekday::Sun, hour: 3, minute: 0 };

impl Scheduler {
    pub fn new(store: Store, submit: SubmitFn) -> Self {
        let now = Utc::now();
        Self {
            store,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            submit,
            tick_interval: Duration::from_secs(30),
            next_execution_cleanup: Arc::new(Mutex::new(EXECUTION_CLEANUP_SCHEDULE.next_fire_after(now))),
            next_log_cleanup: Arc::new(Mutex::new(LOG_CLEANUP_SCHEDULE.next_fire_after(now))),
        }
    }

    /// Idempotent by key: a second call with the same key replaces the
    /// first's schedule rather than running both.
    pub async fn schedule_at(&self, key: impl Into<String>, agent_id: orchestra_types::ids::AgentId, submitter: orchestra_types::ids::UserId, when_utc: DateTime<Utc>) {
        self.upsert(key.into(), agent_id, submitter, Schedule::Once { at: when_utc }).await;
    }

    pub async fn schedule_recurring(&self, key: impl Into<String>, agent_id: orchestra_types::ids::AgentId, submitter: orchestra_types::ids::UserId, schedule: Schedule) {
        self.upsert(key.into(), agent_id, submitter, schedule).await;
    }

    pub async fn cancel_schedule(&self, key: &str) -> bool {
        self.jobs.lock().await.remove(key).is_some()
    }

    async fn upsert(&self, key: String, agent_id: orchestra_types::ids::AgentId, submitter: orchestra_types::ids::UserId, schedule: Schedule) {
        let now = Utc::now();
        let next_fire_at = schedule.next_fire_after(now);
        let mut jobs = self.jobs.lock().await;
        jobs.insert(key, ScheduledJob { agent_id, submitter, schedule, next_fire_at });
    }

    /// Runs the orphan reaper once at boot, then the retention sweeps and
    /// the user-scheduled job tick forever, until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut retention = tokio::time::interval(Duration::from_secs(3600));
        let mut scheduled = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("background scheduler shutting down");
                    break;
                }
                _ = retention.tick() => {
                    self.run_due_retention_jobs().await;
                }
                _ = scheduled.tick() => {
                    self.run_due_scheduled_jobs().await;
                }
            }
        }
    }

    async fn run_due_retention_jobs(&self) {
        let now = Utc::now();

        let mut next = self.next_execution_cleanup.lock().await;
        let (should_run, realigned) = compute_misfire_plan(now, *next, EXECUTION_CLEANUP_SCHEDULE.interval());
        *next = realigned;
        drop(next);
        if should_run {
            self.execution_cleanup().await;
        }

        let mut next = self.next_log_cleanup.lock().await;
        let (should_run, realigned) = compute_misfire_plan(now, *next, LOG_CLEANUP_SCHEDULE.interval());
        *next = realigned;
        drop(next);
        if should_run {
            self.log_cleanup().await;
        }
    }

    async fn execution_cleanup(&self) {
        let before = Utc::now() - ChronoDuration::days(EXECUTION_RETENTION_DAYS);
        match self.store.executions().await {
            Ok(mut handle) => match handle.repo().delete_completed_before(before).await {
                Ok(deleted) => info!(deleted, "execution-cleanup sweep complete"),
                Err(err) => warn!(error = %err, "execution-cleanup sweep failed"),
            },
            Err(err) => warn!(error = %err, "execution-cleanup could not acquire a connection"),
        }
    }

    async fn log_cleanup(&self) {
        let before = Utc::now() - ChronoDuration::days(DELIVERY_RETENTION_DAYS);
        match self.store.webhooks().await {
            Ok(mut handle) => match handle.repo().delete_delivered_before(before).await {
                Ok(deleted) => info!(deleted, "log-cleanup sweep complete"),
                Err(err) => warn!(error = %err, "log-cleanup sweep failed"),
            },
            Err(err) => warn!(error = %err, "log-cleanup could not acquire a connection"),
        }
    }

    async fn run_due_scheduled_jobs(&self) {
        let now = Utc::now();
        let mut due = Vec::new();
        {
            let mut jobs = self.jobs.lock().await;
            let mut finished = Vec::new();
            for (key, job) in jobs.iter_mut() {
                let (should_run, next_fire_at) = compute_misfire_plan(now, job.next_fire_at, job.schedule.interval());
                if should_run {
                    due.push((job.agent_id, job.submitter));
                }
                job.next_fire_at = next_fire_at;
                if matches!(job.schedule, Schedule::Once { .. }) && should_run {
                    finished.push(key.clone());
                }
            }
            for key in finished {
                jobs.remove(&key);
            }
        }
        for (agent_id, submitter) in due {
            (self.submit)(agent_id, submitter);
        }
    }
}

fn next_daily(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let today_at = now.date_naive().and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()).and_utc();
    if today_at > now {
        today_at
    } else {
        today_at + ChronoDuration::days(1)
    }
}

fn next_weekly(now: DateTime<Utc>, weekday: Weekday, hour: u32, minute: u32) -> DateTime<Utc> {
    let days_ahead = (7 + weekday.num_days_from_monday() as i64 - now.weekday().num_days_from_monday() as i64) % 7;
    let candidate = now.date_naive() + ChronoDuration::days(days_ahead);
    let candidate_at = candidate.and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()).and_utc();
    if candidate_at > now {
        candidate_at
    } else {
        candidate_at + ChronoDuration::weeks(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misfire_skipped_when_not_yet_due() {
        let now = Utc::now();
        let (should_run, next_fire) = compute_misfire_plan(now, now + ChronoDuration::hours(1), ChronoDuration::days(1));
        assert!(!should_run);
        assert_eq!(next_fire, now + ChronoDuration::hours(1));
    }

    #[test]
    fn misfire_runs_once_and_realigns_to_the_future() {
        let now = Utc::now();
        let overdue = now - ChronoDuration::days(3);
        let (should_run, next_fire) = compute_misfire_plan(now, overdue, ChronoDuration::days(1));
        assert!(should_run);
        assert!(next_fire > now);
    }

    #[test]
    fn next_daily_rolls_over_to_tomorrow_once_past() {
        let now = Utc::now().date_naive().and_time(NaiveTime::from_hms_opt(23, 0, 0).unwrap()).and_utc();
        let next = next_daily(now, 2, 0);
        assert!(next > now);
        assert_eq!(next.hour(), 2);
    }
}
