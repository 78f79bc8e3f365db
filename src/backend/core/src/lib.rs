//! # OurArchive Stats
//!
//! Computes OurArchive's public statistics (users, households, items,
//! containers and the item type breakdown) from the document store and
//! publishes them as a current snapshot plus one history entry per UTC day.
//!
//! ## Architecture
//!
//! - **Store**: document store abstraction with Firestore REST and in-memory backends
//! - **Stats**: the aggregator, its data model and the publish protocol
//! - **Jobs**: daily scheduled trigger with retries
//! - **API**: on-demand HTTP trigger, health and metrics endpoints
//! - **Observability**: structured logging and Prometheus metrics

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod observability;
pub mod stats;
pub mod store;

pub use error::{AggregationPhase, ErrorCode, Result, StatsError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{AggregationPhase, ErrorCode, Result, StatsError};
    pub use crate::stats::{Aggregator, AggregatorConfig, HistoryEntry, ItemTypeCounts, StatsSnapshot};
    pub use crate::store::{
        CollectionPath, Document, DocumentPath, DocumentStore, FieldValue, Fields, FirestoreStore,
        InMemoryStore, StoreError,
    };
}
