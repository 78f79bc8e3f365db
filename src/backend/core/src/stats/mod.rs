//! Public statistics: the snapshot model and the aggregator producing it.
//!
//! # Store Layout
//!
//! ```text
//! users/{uid}                                   counted
//! containers/{cid}                              counted
//! households/{hid}                              listed
//! households/{hid}/items/{iid}                  counted + scanned for `type`
//! public_stats/ourarchive                       current snapshot (replaced)
//! public_stats/ourarchive/history/{YYYY-MM-DD}  one entry per UTC day
//! ```

pub mod aggregator;
pub mod model;

pub use aggregator::{Aggregator, AggregatorConfig};
pub use model::{
    history_key, HistoryEntry, HouseholdTally, ItemTypeCounts, StatsSnapshot, UNKNOWN_ITEM_TYPE,
};

use crate::store::{CollectionPath, DocumentPath};

pub const USERS_COLLECTION: &str = "users";
pub const HOUSEHOLDS_COLLECTION: &str = "households";
pub const ITEMS_COLLECTION: &str = "items";
pub const CONTAINERS_COLLECTION: &str = "containers";
pub const PUBLIC_STATS_COLLECTION: &str = "public_stats";
pub const SNAPSHOT_DOCUMENT: &str = "ourarchive";
pub const HISTORY_COLLECTION: &str = "history";

/// `public_stats/ourarchive`
pub fn snapshot_path() -> DocumentPath {
    CollectionPath::root(PUBLIC_STATS_COLLECTION).doc(SNAPSHOT_DOCUMENT)
}

/// `public_stats/ourarchive/history/{key}`
pub fn history_path(key: &str) -> DocumentPath {
    snapshot_path().collection(HISTORY_COLLECTION).doc(key)
}

/// `households/{household_id}/items`
pub fn items_collection(household_id: &str) -> CollectionPath {
    CollectionPath::root(HOUSEHOLDS_COLLECTION)
        .doc(household_id)
        .collection(ITEMS_COLLECTION)
}
