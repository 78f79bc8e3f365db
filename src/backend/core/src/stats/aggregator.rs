//! Stats aggregation and the two-write publish protocol.
//!
//! A run reads everything first and writes last:
//!
//! 1. count `users` and `containers`, list `households`
//! 2. per household (fanned out): count and scan `households/{id}/items`
//! 3. fold the per-household tallies into one total
//! 4. replace `public_stats/ourarchive`, then replace today's history entry
//!
//! A failed read leaves both published documents untouched. The two writes
//! are not transactional with each other.

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryFutureExt, TryStreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use super::model::{HouseholdTally, StatsSnapshot};
use super::{
    history_path, items_collection, snapshot_path, CONTAINERS_COLLECTION, HOUSEHOLDS_COLLECTION,
    USERS_COLLECTION,
};
use crate::error::{AggregationPhase, Result, StatsError};
use crate::observability::metrics as stats_metrics;
use crate::store::{CollectionPath, DocumentStore};

/// Aggregator tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Households processed concurrently
    #[serde(default = "default_household_concurrency")]
    pub household_concurrency: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            household_concurrency: default_household_concurrency(),
        }
    }
}

fn default_household_concurrency() -> usize { 8 }

/// Computes the public stats snapshot and publishes it.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn DocumentStore>,
    config: AggregatorConfig,
}

impl Aggregator {
    /// Create an aggregator over the given store with default tuning.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, AggregatorConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: AggregatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Compute the stats from the current store state and publish them,
    /// timestamped now.
    pub async fn compute_and_publish_stats(&self) -> Result<StatsSnapshot> {
        self.publish_at(Utc::now()).await
    }

    /// Same as [`Aggregator::compute_and_publish_stats`] with an explicit
    /// timestamp, which also selects the history entry's UTC day.
    #[instrument(skip_all, fields(store = self.store.name(), at = %now))]
    pub async fn publish_at(&self, now: DateTime<Utc>) -> Result<StatsSnapshot> {
        info!("Starting stats aggregation");
        let started = Instant::now();

        let outcome = async {
            let snapshot = self.compute(now).await?;
            self.publish(&snapshot).await?;
            Ok::<_, StatsError>(snapshot)
        }
        .await;

        stats_metrics::record_run(outcome.is_ok(), started.elapsed());
        if let Ok(snapshot) = &outcome {
            stats_metrics::record_snapshot(snapshot);
        }
        outcome
    }

    /// Read-only half of a run: build the snapshot without writing anything.
    pub async fn compute(&self, now: DateTime<Utc>) -> Result<StatsSnapshot> {
        let users = CollectionPath::root(USERS_COLLECTION);
        let households = CollectionPath::root(HOUSEHOLDS_COLLECTION);
        let containers = CollectionPath::root(CONTAINERS_COLLECTION);

        let (user_count, household_docs, container_count) = tokio::try_join!(
            self.count(&users),
            self.store
                .list_documents(&households)
                .map_err(|e| StatsError::aggregation(AggregationPhase::List, e)),
            self.count(&containers),
        )?;
        info!(
            users = user_count,
            households = household_docs.len(),
            containers = container_count,
            "Top-level counts collected"
        );

        let household_count = household_docs.len() as u64;
        let household_ids: Vec<String> = household_docs.into_iter().map(|doc| doc.id).collect();

        let tally = stream::iter(household_ids)
            .map(|id| async move { self.tally_household(&id).await })
            .buffer_unordered(self.config.household_concurrency.max(1))
            .try_fold(HouseholdTally::default(), |total, tally| async move {
                Ok::<_, StatsError>(total.merge(tally))
            })
            .await?;
        info!(
            items = tally.item_count,
            item_types = tally.item_types.len(),
            "Household items aggregated"
        );

        Ok(StatsSnapshot {
            user_count,
            household_count,
            item_count: tally.item_count,
            container_count,
            item_types: tally.item_types,
            last_updated: now,
        })
    }

    /// Write half of a run: replace the current snapshot, then the history
    /// entry for the snapshot's UTC day.
    pub async fn publish(&self, snapshot: &StatsSnapshot) -> Result<()> {
        let current = snapshot_path();
        self.store
            .set(&current, snapshot.to_fields())
            .await
            .map_err(|e| StatsError::aggregation(AggregationPhase::Write, e))?;
        info!(path = %current, "Stats snapshot written");

        let entry = snapshot.history_entry();
        let history = history_path(&entry.key());
        self.store
            .set(&history, entry.to_fields())
            .await
            .map_err(|e| StatsError::aggregation(AggregationPhase::Write, e))?;
        info!(path = %history, "History entry written");

        Ok(())
    }

    async fn count(&self, collection: &CollectionPath) -> Result<u64> {
        self.store
            .count(collection)
            .await
            .map_err(|e| StatsError::aggregation(AggregationPhase::Count, e))
    }

    async fn tally_household(&self, household_id: &str) -> Result<HouseholdTally> {
        let items = items_collection(household_id);
        let (item_count, item_docs) = tokio::try_join!(
            self.count(&items),
            self.store
                .list_documents(&items)
                .map_err(|e| StatsError::aggregation(AggregationPhase::List, e)),
        )?;
        Ok(HouseholdTally::from_items(item_count, &item_docs))
    }
}
