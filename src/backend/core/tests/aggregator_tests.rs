//! End-to-end aggregation tests against the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use ourarchive_stats::prelude::*;
use ourarchive_stats::stats::{history_path, snapshot_path, UNKNOWN_ITEM_TYPE};
use ourarchive_stats::store::StoreResult;

// ═══════════════════════════════════════════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════════════════════════════════════════

fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
}

fn typed(kind: Option<&str>) -> Fields {
    let value = match kind {
        Some(kind) => FieldValue::from(kind),
        None => FieldValue::Null,
    };
    Fields::from([("type".to_string(), value)])
}

fn add_users(store: &InMemoryStore, n: usize) {
    for i in 0..n {
        store.insert(CollectionPath::root("users").doc(format!("u{i}")), Fields::new());
    }
}

fn add_household(store: &InMemoryStore, id: &str, items: &[Option<&str>]) {
    let household = CollectionPath::root("households").doc(id);
    store.insert(household.clone(), Fields::from([("name".to_string(), FieldValue::from(id))]));
    for (i, kind) in items.iter().enumerate() {
        store.insert(household.collection("items").doc(format!("{id}-i{i}")), typed(*kind));
    }
}

/// Two households (box, box, null / bin), three users, no containers.
fn sample_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    add_users(&store, 3);
    add_household(&store, "h1", &[Some("box"), Some("box"), None]);
    add_household(&store, "h2", &[Some("bin")]);
    store
}

fn assert_invariants(snapshot: &StatsSnapshot) {
    assert_eq!(snapshot.item_types.total(), snapshot.item_count);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregation
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_sample_snapshot() {
    let store = sample_store();
    let aggregator = Aggregator::new(Arc::new(store.clone()));

    let snapshot = aggregator.publish_at(at(2025, 12, 3, 0)).await.unwrap();

    assert_eq!(snapshot.user_count, 3);
    assert_eq!(snapshot.household_count, 2);
    assert_eq!(snapshot.item_count, 4);
    assert_eq!(snapshot.container_count, 0);
    let expected: ItemTypeCounts = [("box", 2), (UNKNOWN_ITEM_TYPE, 1), ("bin", 1)]
        .into_iter()
        .collect();
    assert_eq!(snapshot.item_types, expected);
    assert_invariants(&snapshot);
}

#[tokio::test]
async fn test_publishes_snapshot_and_history() {
    let store = sample_store();
    let aggregator = Aggregator::new(Arc::new(store.clone()));
    let now = at(2025, 12, 3, 0);

    aggregator.publish_at(now).await.unwrap();
    assert_eq!(store.write_count(), 2);

    let current = store.get(&snapshot_path()).await.unwrap().unwrap();
    assert_eq!(current.get("userCount").and_then(FieldValue::as_i64), Some(3));
    assert_eq!(current.get("lastUpdated").and_then(FieldValue::as_timestamp), Some(now));
    assert!(current.get("date").is_none());
    let types = current.get("itemTypes").and_then(FieldValue::as_map).unwrap();
    assert_eq!(types.get("box").and_then(FieldValue::as_i64), Some(2));

    let history = store.get(&history_path("2025-12-03")).await.unwrap().unwrap();
    assert_eq!(history.get("itemCount").and_then(FieldValue::as_i64), Some(4));
    assert_eq!(history.get("date").and_then(FieldValue::as_timestamp), Some(now));
    assert!(history.get("lastUpdated").is_none());
}

#[tokio::test]
async fn test_empty_households_contribute_nothing() {
    let store = InMemoryStore::new();
    add_household(&store, "empty-1", &[]);
    add_household(&store, "empty-2", &[]);
    add_household(&store, "full", &[Some("shelf"), Some("")]);
    let aggregator = Aggregator::new(Arc::new(store));

    let snapshot = aggregator.compute(Utc::now()).await.unwrap();

    assert_eq!(snapshot.household_count, 3);
    assert_eq!(snapshot.item_count, 2);
    assert_eq!(snapshot.item_types.len(), 2);
    assert_eq!(snapshot.item_types.get("shelf"), 1);
    assert_eq!(snapshot.item_types.get(UNKNOWN_ITEM_TYPE), 1);
    assert_invariants(&snapshot);
}

#[tokio::test]
async fn test_non_string_types_use_their_string_form() {
    let store = InMemoryStore::new();
    let items = CollectionPath::root("households").doc("h1").collection("items");
    store.insert(CollectionPath::root("households").doc("h1"), Fields::new());
    let kinds = [
        FieldValue::Integer(7),
        FieldValue::Boolean(true),
        FieldValue::Double(1.5),
        FieldValue::Integer(0),
        FieldValue::Boolean(false),
    ];
    for (i, kind) in kinds.into_iter().enumerate() {
        store.insert(items.doc(format!("i{i}")), Fields::from([("type".to_string(), kind)]));
    }
    let aggregator = Aggregator::new(Arc::new(store));

    let snapshot = aggregator.compute(Utc::now()).await.unwrap();

    let expected: ItemTypeCounts = [("7", 1), ("true", 1), ("1.5", 1), (UNKNOWN_ITEM_TYPE, 2)]
        .into_iter()
        .collect();
    assert_eq!(snapshot.item_types, expected);
    assert_invariants(&snapshot);
}

#[tokio::test]
async fn test_zero_households() {
    let store = InMemoryStore::new();
    add_users(&store, 2);
    store.insert(CollectionPath::root("containers").doc("c1"), Fields::new());
    let aggregator = Aggregator::new(Arc::new(store));

    let snapshot = aggregator.compute(Utc::now()).await.unwrap();

    assert_eq!(snapshot.user_count, 2);
    assert_eq!(snapshot.container_count, 1);
    assert_eq!(snapshot.household_count, 0);
    assert_eq!(snapshot.item_count, 0);
    assert!(snapshot.item_types.is_empty());
}

#[tokio::test]
async fn test_result_independent_of_concurrency() {
    let store = InMemoryStore::new();
    for h in 0..20 {
        let kinds: Vec<Option<&str>> = (0..h % 4)
            .map(|i| if i % 2 == 0 { Some("box") } else { None })
            .collect();
        add_household(&store, &format!("h{h}"), &kinds);
    }
    let now = Utc::now();

    let serial = Aggregator::with_config(
        Arc::new(store.clone()),
        AggregatorConfig { household_concurrency: 1 },
    )
    .compute(now)
    .await
    .unwrap();
    let parallel = Aggregator::with_config(
        Arc::new(store),
        AggregatorConfig { household_concurrency: 16 },
    )
    .compute(now)
    .await
    .unwrap();

    assert_eq!(serial, parallel);
    assert_invariants(&parallel);
}

// ═══════════════════════════════════════════════════════════════════════════════
// History
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_same_day_rerun_overwrites_history() {
    let store = sample_store();
    let aggregator = Aggregator::new(Arc::new(store.clone()));

    aggregator.publish_at(at(2025, 12, 3, 1)).await.unwrap();
    add_users(&store, 5);
    aggregator.publish_at(at(2025, 12, 3, 23)).await.unwrap();

    let history = CollectionPath::parse("public_stats/ourarchive/history").unwrap();
    assert_eq!(store.document_ids(&history), vec!["2025-12-03".to_string()]);

    let entry = store.get(&history_path("2025-12-03")).await.unwrap().unwrap();
    assert_eq!(entry.get("userCount").and_then(FieldValue::as_i64), Some(5));
}

#[tokio::test]
async fn test_new_day_adds_history_entry() {
    let store = sample_store();
    let aggregator = Aggregator::new(Arc::new(store.clone()));

    aggregator.publish_at(at(2025, 12, 3, 0)).await.unwrap();
    aggregator.publish_at(at(2025, 12, 4, 0)).await.unwrap();

    let history = CollectionPath::parse("public_stats/ourarchive/history").unwrap();
    let mut ids = store.document_ids(&history);
    ids.sort();
    assert_eq!(ids, vec!["2025-12-03".to_string(), "2025-12-04".to_string()]);

    let current = store.get(&snapshot_path()).await.unwrap().unwrap();
    assert_eq!(
        current.get("lastUpdated").and_then(FieldValue::as_timestamp),
        Some(at(2025, 12, 4, 0))
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// Failures
// ═══════════════════════════════════════════════════════════════════════════════

/// Delegates to an in-memory store but fails selected operations.
struct FaultyStore {
    inner: InMemoryStore,
    fail_item_listing: bool,
    fail_history_write: bool,
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn count(&self, collection: &CollectionPath) -> StoreResult<u64> {
        self.inner.count(collection).await
    }

    async fn list_documents(&self, collection: &CollectionPath) -> StoreResult<Vec<Document>> {
        if self.fail_item_listing && collection.collection_id() == "items" {
            return Err(StoreError::Transport("connection reset".to_string()));
        }
        self.inner.list_documents(collection).await
    }

    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()> {
        if self.fail_history_write && path.parent().collection_id() == "history" {
            return Err(StoreError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.inner.set(path, fields).await
    }
}

#[tokio::test]
async fn test_failed_read_writes_nothing() {
    let inner = sample_store();
    let store = FaultyStore {
        inner: inner.clone(),
        fail_item_listing: true,
        fail_history_write: false,
    };
    let aggregator = Aggregator::new(Arc::new(store));

    let err = aggregator.compute_and_publish_stats().await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::AggregationFailed);
    assert_eq!(err.phase(), Some(AggregationPhase::List));
    assert!(err.user_message().contains("connection reset"));
    assert_eq!(inner.write_count(), 0);
    assert!(inner.get(&snapshot_path()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_history_write_is_reported() {
    let inner = sample_store();
    let store = FaultyStore {
        inner: inner.clone(),
        fail_item_listing: false,
        fail_history_write: true,
    };
    let aggregator = Aggregator::new(Arc::new(store));

    let err = aggregator.compute_and_publish_stats().await.unwrap_err();

    assert_eq!(err.phase(), Some(AggregationPhase::Write));
    // The snapshot write precedes the history write and is not rolled back.
    assert_eq!(inner.write_count(), 1);
    assert!(inner.get(&snapshot_path()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_count_support_fails_loudly() {
    let store = InMemoryStore::without_count_support();
    add_users(&store, 3);
    let aggregator = Aggregator::new(Arc::new(store.clone()));

    let err = aggregator.compute_and_publish_stats().await.unwrap_err();

    assert_eq!(err.phase(), Some(AggregationPhase::Count));
    assert_eq!(store.write_count(), 0);
}
