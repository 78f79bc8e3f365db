//! Cloud Firestore backend over the REST API.
//!
//! Count queries go through `runAggregationQuery`, so cardinality never
//! transfers documents. Writes use `PATCH` without an update mask, which
//! Firestore treats as a full replace that creates the document if absent.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use super::{
    CollectionPath, Document, DocumentPath, DocumentStore, FieldValue, Fields, StoreError,
    StoreResult,
};

const COUNT_ALIAS: &str = "count";

/// GCE metadata server, reachable from Cloud Run, GKE and Compute Engine.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata.google.internal";
const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
/// Tokens this close to expiry are refreshed before use.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// How requests are authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// No `Authorization` header (emulator)
    #[default]
    None,
    /// Fixed bearer token; it is never refreshed, so it suits one-shot runs
    Static(String),
    /// Short-lived service-account tokens from the metadata server,
    /// cached and refreshed before they expire
    Metadata { endpoint: String },
}

/// Connection settings for [`FirestoreStore`].
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// API root, e.g. `https://firestore.googleapis.com` or an emulator URL
    pub endpoint: String,
    /// Google Cloud project id
    pub project_id: String,
    /// Database id, usually `(default)`
    pub database: String,
    /// Bearer token source
    pub credentials: Credentials,
    /// Page size for document listings
    pub page_size: u32,
    /// Per-request timeout
    pub timeout: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            endpoint: "https://firestore.googleapis.com".to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            credentials: Credentials::None,
            page_size: 300,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Credentials::Static(token.into());
        self
    }

    /// Fetch tokens from the metadata server at `endpoint`.
    pub fn with_metadata_credentials(mut self, endpoint: impl Into<String>) -> Self {
        self.credentials = Credentials::Metadata {
            endpoint: endpoint.into(),
        };
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Firestore REST client implementing [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct FirestoreStore {
    client: Client,
    config: FirestoreConfig,
    documents_url: String,
    token_cache: Arc<Mutex<Option<CachedToken>>>,
}

impl FirestoreStore {
    /// Build a client for the given project.
    pub fn new(config: FirestoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let documents_url = format!(
            "{}/v1/projects/{}/databases/{}/documents",
            config.endpoint.trim_end_matches('/'),
            config.project_id,
            config.database,
        );

        Ok(Self {
            client,
            config,
            documents_url,
            token_cache: Arc::new(Mutex::new(None)),
        })
    }

    /// Root of the `documents` resource tree.
    pub fn documents_url(&self) -> &str {
        &self.documents_url
    }

    async fn request(&self, method: Method, url: &str) -> StoreResult<RequestBuilder> {
        let builder = self.client.request(method, url);
        Ok(match self.bearer_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn bearer_token(&self) -> StoreResult<Option<String>> {
        let endpoint = match &self.config.credentials {
            Credentials::None => return Ok(None),
            Credentials::Static(token) => return Ok(Some(token.clone())),
            Credentials::Metadata { endpoint } => endpoint,
        };
        if let Some(token) = self.cached_token() {
            return Ok(Some(token));
        }

        let url = format!("{}{}", endpoint.trim_end_matches('/'), METADATA_TOKEN_PATH);
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        let fresh: MetadataToken = Self::ensure_success(response).await?.json().await?;
        debug!(expires_in = fresh.expires_in, "refreshed metadata access token");

        self.store_token(&fresh);
        Ok(Some(fresh.access_token))
    }

    fn cached_token(&self) -> Option<String> {
        let cache = self.token_cache.lock();
        cache
            .as_ref()
            .filter(|cached| cached.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN)
            .map(|cached| cached.token.clone())
    }

    fn store_token(&self, fresh: &MetadataToken) {
        let expires_at = Instant::now() + Duration::from_secs(fresh.expires_in);
        *self.token_cache.lock() = Some(CachedToken {
            token: fresh.access_token.clone(),
            expires_at,
        });
    }

    async fn ensure_success(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wire Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct AggregationResponse {
    result: Option<AggregationResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregationResult {
    #[serde(default)]
    aggregate_fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl RawDocument {
    fn into_document(self) -> StoreResult<Document> {
        let id = self
            .name
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StoreError::Decode(format!("document name without id: {}", self.name)))?
            .to_string();
        Ok(Document::new(id, decode_fields(&self.fields)?))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Value Encoding
// ═══════════════════════════════════════════════════════════════════════════════

/// Encode a field value in Firestore's tagged JSON form.
pub fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Boolean(b) => json!({ "booleanValue": b }),
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::Double(d) => json!({ "doubleValue": d }),
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Timestamp(ts) => json!({
            "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Micros, true)
        }),
        FieldValue::Array(values) => json!({
            "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        FieldValue::Map(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

/// Encode a document's top-level fields.
pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, value)| (name.clone(), encode_value(value)))
            .collect(),
    )
}

/// Decode a tagged Firestore value. Kinds with no [`FieldValue`] counterpart
/// (references, geo points, bytes) decode as null.
pub fn decode_value(value: &Value) -> StoreResult<FieldValue> {
    let malformed = || StoreError::Decode(format!("malformed value: {}", value));

    let (kind, inner) = value
        .as_object()
        .and_then(|obj| obj.iter().next())
        .ok_or_else(malformed)?;

    let decoded = match kind.as_str() {
        "nullValue" => FieldValue::Null,
        "booleanValue" => FieldValue::Boolean(inner.as_bool().ok_or_else(malformed)?),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                other => other.as_i64(),
            };
            FieldValue::Integer(parsed.ok_or_else(malformed)?)
        }
        "doubleValue" => FieldValue::Double(inner.as_f64().ok_or_else(malformed)?),
        "stringValue" => FieldValue::String(inner.as_str().ok_or_else(malformed)?.to_string()),
        "timestampValue" => {
            let raw = inner.as_str().ok_or_else(malformed)?;
            let ts = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| StoreError::Decode(format!("bad timestamp '{}': {}", raw, e)))?;
            FieldValue::Timestamp(ts.with_timezone(&Utc))
        }
        "mapValue" => match inner.get("fields").and_then(Value::as_object) {
            Some(fields) => FieldValue::Map(decode_fields(fields)?),
            None => FieldValue::Map(Fields::new()),
        },
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect::<StoreResult<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            FieldValue::Array(values)
        }
        other => {
            debug!(kind = other, "unsupported firestore value kind, reading as null");
            FieldValue::Null
        }
    };

    Ok(decoded)
}

/// Decode a `fields` object.
pub fn decode_fields(fields: &Map<String, Value>) -> StoreResult<Fields> {
    fields
        .iter()
        .map(|(name, value)| Ok((name.clone(), decode_value(value)?)))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Implementation
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn name(&self) -> &'static str {
        "firestore"
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn count(&self, collection: &CollectionPath) -> StoreResult<u64> {
        let url = match collection.parent() {
            Some(parent) => format!("{}/{}:runAggregationQuery", self.documents_url, parent),
            None => format!("{}:runAggregationQuery", self.documents_url),
        };

        let body = json!({
            "structuredAggregationQuery": {
                "structuredQuery": {
                    "from": [{ "collectionId": collection.collection_id() }]
                },
                "aggregations": [{ "alias": COUNT_ALIAS, "count": {} }]
            }
        });

        let response = self.request(Method::POST, &url).await?.json(&body).send().await?;
        let results: Vec<AggregationResponse> = Self::ensure_success(response).await?.json().await?;

        let count = results
            .into_iter()
            .filter_map(|r| r.result)
            .find_map(|r| r.aggregate_fields.get(COUNT_ALIAS).cloned())
            .ok_or_else(|| StoreError::Decode("aggregation response without count".to_string()))?;

        match decode_value(&count)? {
            FieldValue::Integer(n) if n >= 0 => Ok(n as u64),
            other => Err(StoreError::Decode(format!("unexpected count value: {:?}", other))),
        }
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn list_documents(&self, collection: &CollectionPath) -> StoreResult<Vec<Document>> {
        let url = format!("{}/{}", self.documents_url, collection);
        let page_size = self.config.page_size.to_string();
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .request(Method::GET, &url)
                .await?
                .query(&[("pageSize", page_size.as_str())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await?;
            let page: ListDocumentsResponse = Self::ensure_success(response).await?.json().await?;

            for raw in page.documents {
                documents.push(raw.into_document()?);
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = documents.len(), "listed documents");
        Ok(documents)
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        let url = format!("{}/{}", self.documents_url, path);
        let response = self.request(Method::GET, &url).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: RawDocument = Self::ensure_success(response).await?.json().await?;
        raw.into_document().map(Some)
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn set(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()> {
        let url = format!("{}/{}", self.documents_url, path);
        let body = json!({ "fields": encode_fields(&fields) });
        let response = self.request(Method::PATCH, &url).await?.json(&body).send().await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}
