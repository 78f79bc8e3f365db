//! Job definitions and traits.
//!
//! - **Job trait**: the interface scheduled work implements
//! - **JobError**: failure reported by a job, with a retryable flag
//! - **RetryPolicy**: how many times, and how far apart, failed runs are retried

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, StatsError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for job execution failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<StatsError> for JobError {
    fn from(error: StatsError) -> Self {
        // Store failures are usually transient; configuration problems are not.
        let job_error = match error.code() {
            ErrorCode::AggregationFailed => Self::retryable(error.user_message()),
            ErrorCode::ConfigurationError | ErrorCode::InternalError => {
                Self::fatal(error.user_message())
            }
        };
        job_error.with_code(error.code().as_str())
    }
}

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        delay_secs: u64,
    },
    /// Exponential increase in delay (initial * multiplier^attempt)
    Exponential {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_secs: 30,
            max_delay_secs: 1800,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = match self {
            Self::Fixed { delay_secs } => *delay_secs,
            Self::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
            } => {
                let delay = (*initial_delay_secs as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_delay_secs as f64) as u64
            }
        };

        Duration::from_secs(secs)
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay_secs: u64) -> Self {
        Self::Fixed { delay_secs }
    }

    /// Exponential backoff starting at `initial_delay_secs`.
    pub fn exponential(initial_delay_secs: u64) -> Self {
        Self::Exponential {
            initial_delay_secs,
            max_delay_secs: 1800,
            multiplier: 2.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for job retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Create a policy with a specific number of retries.
    pub fn with_retries(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check if another retry should be attempted after `attempt` retries.
    pub fn should_retry(&self, attempt: u32, error: &JobError) -> bool {
        attempt < self.max_attempts && error.retryable
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Run the job once.
    async fn execute(&self) -> JobResult;

    /// Retry behavior after a failed run.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AggregationPhase;
    use crate::store::StoreError;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = BackoffStrategy::Exponential {
            initial_delay_secs: 10,
            max_delay_secs: 60,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(40));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry_respects_limits() {
        let policy = RetryPolicy::with_retries(2);
        let transient = JobError::retryable("store timeout");
        let fatal = JobError::fatal("bad config");

        assert!(policy.should_retry(0, &transient));
        assert!(policy.should_retry(1, &transient));
        assert!(!policy.should_retry(2, &transient));
        assert!(!policy.should_retry(0, &fatal));
        assert!(!RetryPolicy::no_retry().should_retry(0, &transient));
    }

    #[test]
    fn test_job_error_from_stats_error() {
        let err = StatsError::aggregation(
            AggregationPhase::Count,
            StoreError::Transport("unreachable".to_string()),
        );
        let job_err = JobError::from(err);
        assert!(job_err.retryable);
        assert_eq!(job_err.code.as_deref(), Some("AGGREGATION_FAILED"));

        let job_err = JobError::from(StatsError::configuration("missing project id"));
        assert!(!job_err.retryable);
    }
}
