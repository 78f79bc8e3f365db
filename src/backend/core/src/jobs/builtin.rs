//! Built-in background jobs.

use async_trait::async_trait;
use tracing::info;

use super::{Job, JobError, JobResult, RetryPolicy};
use crate::stats::Aggregator;

/// Job: Recompute and publish the public stats.
#[derive(Clone)]
pub struct AggregateStatsJob {
    aggregator: Aggregator,
    retry_policy: RetryPolicy,
}

impl AggregateStatsJob {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

#[async_trait]
impl Job for AggregateStatsJob {
    fn name(&self) -> &'static str {
        "aggregate_stats"
    }

    async fn execute(&self) -> JobResult {
        // The scheduled trigger has no caller to return the snapshot to.
        let snapshot = self
            .aggregator
            .compute_and_publish_stats()
            .await
            .map_err(JobError::from)?;
        info!(
            users = snapshot.user_count,
            households = snapshot.household_count,
            items = snapshot.item_count,
            containers = snapshot.container_count,
            "Scheduled stats aggregation published"
        );
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionPath, Fields, InMemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_aggregate_stats_job_publishes() {
        let store = InMemoryStore::new();
        store.insert(CollectionPath::root("users").doc("u1"), Fields::new());
        let job = AggregateStatsJob::new(Aggregator::new(Arc::new(store.clone())));

        tokio_test::assert_ok!(job.execute().await);
        assert_eq!(store.write_count(), 2);
        assert_eq!(job.name(), "aggregate_stats");
    }

    #[tokio::test]
    async fn test_aggregate_stats_job_failure_is_retryable() {
        let store = InMemoryStore::without_count_support();
        let job = AggregateStatsJob::new(Aggregator::new(Arc::new(store.clone())))
            .with_retry_policy(RetryPolicy::no_retry());

        let err = job.execute().await.unwrap_err();
        assert!(err.retryable);
        assert_eq!(err.code.as_deref(), Some("AGGREGATION_FAILED"));
        assert_eq!(store.write_count(), 0);
        assert_eq!(job.retry_policy().max_attempts, 0);
    }
}
