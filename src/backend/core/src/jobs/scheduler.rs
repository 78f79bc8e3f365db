//! Daily cron scheduling for background jobs.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Job, JobId, JobResult};

/// Source of wall-clock time used to evaluate schedules.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Errors raised while registering a schedule.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cron Schedule
// ═══════════════════════════════════════════════════════════════════════════════

/// Cron-based schedule evaluated in UTC.
///
/// Only the daily form `M H * * *` (fixed minute and hour, wildcard day,
/// month and weekday) is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    /// Cron expression (e.g., "0 0 * * *" for midnight UTC)
    pub expression: String,
    minute: u32,
    hour: u32,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: &str| ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid("expected 5 fields"));
        }
        if fields[2..].iter().any(|f| *f != "*") {
            return Err(invalid("only daily schedules are supported"));
        }

        let minute: u32 = fields[0].parse().map_err(|_| invalid("minute must be a number"))?;
        let hour: u32 = fields[1].parse().map_err(|_| invalid("hour must be a number"))?;
        if minute > 59 {
            return Err(invalid("minute out of range"));
        }
        if hour > 23 {
            return Err(invalid("hour out of range"));
        }

        Ok(Self {
            expression: expression.to_string(),
            minute,
            hour,
        })
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or_default();
        let today = Utc.from_utc_datetime(&after.date_naive().and_time(time));
        if today > after {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════════════

/// A job registered with the scheduler.
struct ScheduledJob {
    id: JobId,
    job: Arc<dyn Job>,
    schedule: CronSchedule,
    active: bool,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    run_count: u64,
}

/// Point-in-time view of a scheduled job.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub id: JobId,
    pub job_name: String,
    pub expression: String,
    pub active: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}

/// Job scheduler running registered jobs on their cron schedules.
pub struct JobScheduler {
    scheduled_jobs: Arc<RwLock<Vec<ScheduledJob>>>,
    shutdown: watch::Sender<bool>,
    clock: Clock,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    /// Create a new job scheduler.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create a scheduler reading wall-clock time from `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            scheduled_jobs: Arc::new(RwLock::new(Vec::new())),
            shutdown,
            clock,
        }
    }

    /// Schedule a job with a cron expression.
    pub async fn schedule_cron(
        &self,
        expression: &str,
        job: Arc<dyn Job>,
    ) -> Result<JobId, ScheduleError> {
        let schedule = CronSchedule::parse(expression)?;
        let id = JobId::new();
        let scheduled = ScheduledJob {
            id,
            job,
            next_run: Some(schedule.next_after((self.clock)())),
            schedule,
            active: true,
            last_run: None,
            run_count: 0,
        };
        self.scheduled_jobs.write().await.push(scheduled);
        Ok(id)
    }

    /// Cancel a scheduled job. A run already in progress completes.
    pub async fn cancel(&self, id: JobId) -> bool {
        let mut jobs = self.scheduled_jobs.write().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.active = false;
            true
        } else {
            false
        }
    }

    /// List all active scheduled jobs.
    pub async fn list(&self) -> Vec<JobId> {
        self.scheduled_jobs
            .read()
            .await
            .iter()
            .filter(|j| j.active)
            .map(|j| j.id)
            .collect()
    }

    /// Status of one scheduled job.
    pub async fn status(&self, id: JobId) -> Option<ScheduleStatus> {
        self.scheduled_jobs
            .read()
            .await
            .iter()
            .find(|j| j.id == id)
            .map(|j| ScheduleStatus {
                id: j.id,
                job_name: j.job.name().to_string(),
                expression: j.schedule.expression.clone(),
                active: j.active,
                next_run: j.next_run,
                last_run: j.last_run,
                run_count: j.run_count,
            })
    }

    /// Spawn one timer loop per active job registered so far.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let ids = self.list().await;
        info!(jobs = ids.len(), "Job scheduler started");

        ids.into_iter()
            .map(|id| {
                let jobs = self.scheduled_jobs.clone();
                let shutdown = self.shutdown.subscribe();
                tokio::spawn(run_schedule(jobs, id, self.clock.clone(), shutdown))
            })
            .collect()
    }

    /// Shutdown the scheduler.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_schedule(
    jobs: Arc<RwLock<Vec<ScheduledJob>>>,
    id: JobId,
    clock: Clock,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = {
            let mut guard = jobs.write().await;
            let Some(entry) = guard.iter_mut().find(|j| j.id == id && j.active) else {
                break;
            };
            let next = entry.schedule.next_after(clock());
            entry.next_run = Some(next);
            next
        };

        // Timers are monotonic; wait until the wall clock reaches `next`.
        loop {
            let wait = (next - clock()).to_std().unwrap_or_default();
            if wait.is_zero() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let job = {
            let guard = jobs.read().await;
            match guard.iter().find(|j| j.id == id && j.active) {
                Some(entry) => entry.job.clone(),
                None => break,
            }
        };

        let started = clock();
        let _ = run_with_retry(job.as_ref(), &mut shutdown).await;

        let mut guard = jobs.write().await;
        if let Some(entry) = guard.iter_mut().find(|j| j.id == id) {
            entry.last_run = Some(started);
            entry.run_count += 1;
        }
    }
}

/// Run a job once, retrying failures according to its [`RetryPolicy`].
///
/// A shutdown signal abandons pending retries and returns the last error.
///
/// [`RetryPolicy`]: super::RetryPolicy
pub async fn run_with_retry(job: &dyn Job, shutdown: &mut watch::Receiver<bool>) -> JobResult {
    let policy = job.retry_policy();
    let mut attempt = 0;

    loop {
        match job.execute().await {
            Ok(()) => {
                info!(job = job.name(), attempt, "Job completed");
                return Ok(());
            }
            Err(err) => {
                if !policy.should_retry(attempt, &err) {
                    error!(job = job.name(), attempts = attempt + 1, error = %err, "Job failed");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    job = job.name(),
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Job failed, retrying"
                );
                tokio::select! {
                    _ = shutdown.changed() => return Err(err),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
