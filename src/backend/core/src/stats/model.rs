//! Snapshot, history entry and per-household tally types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::store::{Document, FieldValue, Fields};

/// Bucket for items whose `type` is absent or falsy.
pub const UNKNOWN_ITEM_TYPE: &str = "unknown";

/// UTC calendar-day key (`YYYY-MM-DD`) for a history entry.
pub fn history_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Item Type Counts
// ═══════════════════════════════════════════════════════════════════════════════

/// Item count per type name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemTypeCounts(BTreeMap<String, u64>);

impl ItemTypeCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more item of `kind`.
    pub fn increment(&mut self, kind: &str) {
        *self.0.entry(kind.to_string()).or_default() += 1;
    }

    /// Union with addition on shared keys.
    pub fn merge(mut self, other: ItemTypeCounts) -> Self {
        for (kind, count) in other.0 {
            *self.0.entry(kind).or_default() += count;
        }
        self
    }

    pub fn get(&self, kind: &str) -> u64 {
        self.0.get(kind).copied().unwrap_or(0)
    }

    /// Sum over all types.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_field(&self) -> FieldValue {
        FieldValue::Map(
            self.0
                .iter()
                .map(|(kind, count)| (kind.clone(), FieldValue::from(*count)))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for ItemTypeCounts {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Household Tally
// ═══════════════════════════════════════════════════════════════════════════════

/// One household's contribution to the item totals.
///
/// `Default` is the identity for [`HouseholdTally::merge`], and `merge` is
/// associative and commutative, so tallies can be folded in any completion
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HouseholdTally {
    /// Size of the household's item sub-collection (from a count query)
    pub item_count: u64,
    /// Type breakdown of the scanned items
    pub item_types: ItemTypeCounts,
}

impl HouseholdTally {
    /// Build a tally from the item count and the scanned item documents.
    pub fn from_items(item_count: u64, items: &[Document]) -> Self {
        let mut item_types = ItemTypeCounts::new();
        for item in items {
            item_types.increment(&item_type(item));
        }
        Self {
            item_count,
            item_types,
        }
    }

    pub fn merge(self, other: HouseholdTally) -> Self {
        Self {
            item_count: self.item_count + other.item_count,
            item_types: self.item_types.merge(other.item_types),
        }
    }
}

/// The item's `type` as a category name.
///
/// Falsy values (absent, null, `""`, `0`, `NaN`, `false`) fall back to
/// [`UNKNOWN_ITEM_TYPE`]; other scalars use their string form. Arrays and
/// maps have no category name and also count as unknown.
pub fn item_type(item: &Document) -> Cow<'_, str> {
    match item.get("type") {
        Some(FieldValue::String(kind)) if !kind.is_empty() => Cow::Borrowed(kind.as_str()),
        Some(FieldValue::Integer(n)) if *n != 0 => Cow::Owned(n.to_string()),
        Some(FieldValue::Double(d)) if *d != 0.0 && !d.is_nan() => Cow::Owned(d.to_string()),
        Some(FieldValue::Boolean(true)) => Cow::Borrowed("true"),
        Some(FieldValue::Timestamp(ts)) => {
            Cow::Owned(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        _ => Cow::Borrowed(UNKNOWN_ITEM_TYPE),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshot & History
// ═══════════════════════════════════════════════════════════════════════════════

/// The current public statistics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub user_count: u64,
    pub household_count: u64,
    pub item_count: u64,
    pub container_count: u64,
    pub item_types: ItemTypeCounts,
    pub last_updated: DateTime<Utc>,
}

impl StatsSnapshot {
    /// Store representation, written with full-replace semantics.
    pub fn to_fields(&self) -> Fields {
        let mut fields = counts_to_fields(
            self.user_count,
            self.household_count,
            self.item_count,
            self.container_count,
            &self.item_types,
        );
        fields.insert("lastUpdated".to_string(), self.last_updated.into());
        fields
    }

    /// History entry for this snapshot's UTC day.
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            user_count: self.user_count,
            household_count: self.household_count,
            item_count: self.item_count,
            container_count: self.container_count,
            item_types: self.item_types.clone(),
            date: self.last_updated,
        }
    }
}

/// Archival copy of a snapshot, one per UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub user_count: u64,
    pub household_count: u64,
    pub item_count: u64,
    pub container_count: u64,
    pub item_types: ItemTypeCounts,
    pub date: DateTime<Utc>,
}

impl HistoryEntry {
    /// Document id under the history collection.
    pub fn key(&self) -> String {
        history_key(self.date)
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = counts_to_fields(
            self.user_count,
            self.household_count,
            self.item_count,
            self.container_count,
            &self.item_types,
        );
        fields.insert("date".to_string(), self.date.into());
        fields
    }
}

fn counts_to_fields(
    user_count: u64,
    household_count: u64,
    item_count: u64,
    container_count: u64,
    item_types: &ItemTypeCounts,
) -> Fields {
    Fields::from([
        ("userCount".to_string(), user_count.into()),
        ("householdCount".to_string(), household_count.into()),
        ("itemCount".to_string(), item_count.into()),
        ("containerCount".to_string(), container_count.into()),
        ("itemTypes".to_string(), item_types.to_field()),
    ])
}
