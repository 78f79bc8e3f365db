//! Document store abstraction.
//!
//! The aggregator only needs four primitives from the underlying hierarchical
//! document store:
//!
//! - **count**: server-side cardinality of a collection (no document transfer)
//! - **list_documents**: full scan of a collection, yielding ids and fields
//! - **get**: read a single document by path
//! - **set**: full-replace write of a document at an exact path
//!
//! Backends:
//! - [`InMemoryStore`]: process-local store for tests and local runs
//! - [`FirestoreStore`]: Cloud Firestore over its REST API

mod firestore;
mod memory;
mod value;

pub use firestore::{Credentials, FirestoreConfig, FirestoreStore, DEFAULT_METADATA_ENDPOINT};
pub use memory::InMemoryStore;
pub use value::{FieldValue, Fields};

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// Store Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors raised by a [`DocumentStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend does not offer the requested primitive.
    #[error("operation not supported by backend: {0}")]
    Unsupported(&'static str),

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be decoded.
    #[error("failed to decode store response: {0}")]
    Decode(String),

    /// A path with the wrong shape was supplied.
    #[error("invalid path '{0}'")]
    InvalidPath(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            Self::Status {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// A specialized Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Paths
// ═══════════════════════════════════════════════════════════════════════════════

/// Path to a collection: an odd number of segments (`users`,
/// `households/{id}/items`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    segments: Vec<String>,
}

/// Path to a document: an even number of segments (`public_stats/ourarchive`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    segments: Vec<String>,
}

fn split_segments(path: &str) -> StoreResult<Vec<String>> {
    let segments: Vec<String> = path.split('/').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

impl CollectionPath {
    /// A top-level collection.
    pub fn root(id: impl Into<String>) -> Self {
        Self {
            segments: vec![id.into()],
        }
    }

    /// Parse a slash-separated collection path.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let segments = split_segments(path)?;
        if segments.len() % 2 == 0 {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Path of the document `id` inside this collection.
    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        let mut segments = self.segments.clone();
        segments.push(id.into());
        DocumentPath { segments }
    }

    /// The last segment (Firestore's `collectionId`).
    pub fn collection_id(&self) -> &str {
        // Never empty: constructors guarantee at least one segment.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The document owning this collection, `None` for top-level collections.
    pub fn parent(&self) -> Option<DocumentPath> {
        if self.segments.len() < 3 {
            return None;
        }
        Some(DocumentPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl DocumentPath {
    /// Parse a slash-separated document path.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let segments = split_segments(path)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Sub-collection `id` beneath this document.
    pub fn collection(&self, id: impl Into<String>) -> CollectionPath {
        let mut segments = self.segments.clone();
        segments.push(id.into());
        CollectionPath { segments }
    }

    /// The document id (last segment).
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The collection containing this document.
    pub fn parent(&self) -> CollectionPath {
        CollectionPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Documents
// ═══════════════════════════════════════════════════════════════════════════════

/// A document as returned by a scan or a point read.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document id (last path segment)
    pub id: String,
    /// Top-level fields
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Field lookup.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Hierarchical key-document store.
///
/// Implementations must offer `count` as a server-side primitive. A backend
/// that cannot count without transferring documents returns
/// [`StoreError::Unsupported`] instead of silently scanning.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Number of documents in a collection.
    async fn count(&self, collection: &CollectionPath) -> StoreResult<u64>;

    /// All documents of a collection, in no particular order.
    async fn list_documents(&self, collection: &CollectionPath) -> StoreResult<Vec<Document>>;

    /// Read one document.
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>>;

    /// Create or fully replace a document. Fields absent from `fields` are
    /// removed.
    async fn set(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()>;
}
