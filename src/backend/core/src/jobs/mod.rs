//! Background job system.
//!
//! - **Job Definitions**: trait-based jobs with retry and backoff support
//! - **Scheduler**: daily cron schedules evaluated in UTC, with graceful shutdown
//! - **Built-in Jobs**: the scheduled stats aggregation
//!
//! # Usage
//!
//! ```rust,ignore
//! use ourarchive_stats::jobs::{AggregateStatsJob, JobScheduler};
//!
//! let scheduler = JobScheduler::new();
//! scheduler
//!     .schedule_cron("0 0 * * *", Arc::new(AggregateStatsJob::new(aggregator)))
//!     .await?;
//! let handles = scheduler.start().await;
//! // ...
//! scheduler.shutdown();
//! ```

pub mod job;
pub mod scheduler;

pub use job::{BackoffStrategy, Job, JobError, JobId, JobResult, RetryPolicy};
pub use scheduler::{
    run_with_retry, Clock, CronSchedule, JobScheduler, ScheduleError, ScheduleStatus,
};

mod builtin;
pub use builtin::AggregateStatsJob;
