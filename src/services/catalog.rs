use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::HttpCatalogSettings;
use crate::core::index::CatalogIndex;
use crate::models::BusinessRecord;

/// Errors raised while loading the business catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    ApiError(String),

    #[error("Unauthorized: invalid API key or project")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Catalog fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Catalog source not configured: {0}")]
    NotConfigured(String),

    #[error("Catalog load failed recently, next attempt in {0:?}")]
    CoolingDown(Duration),
}

/// Read-only access to the external business catalog
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the catalog snapshot; inactive records may be included and are
    /// filtered when indexing
    async fn fetch_active(&self) -> Result<Vec<BusinessRecord>, CatalogError>;
}

/// Document API client for the business collection
///
/// Documents are read page by page from
/// `{endpoint}/databases/{database}/collections/{collection}/documents`,
/// filtered to `status == "active"` server side.
pub struct HttpCatalogClient {
    base_url: String,
    database_id: String,
    collection_id: String,
    project_id: Option<String>,
    api_key: Option<String>,
    page_size: usize,
    client: Client,
}

impl HttpCatalogClient {
    pub fn new(settings: &HttpCatalogSettings, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            database_id: settings.database_id.clone(),
            collection_id: settings.collection_id.clone(),
            project_id: settings.project_id.clone(),
            api_key: settings.api_key.clone(),
            page_size: settings.page_size.max(1),
            client,
        })
    }

    fn page_url(&self, offset: usize) -> Result<String, CatalogError> {
        let queries = vec![
            r#"equal("status", "active")"#.to_string(),
            format!("limit({})", self.page_size),
            format!("offset({})", offset),
        ];
        let queries_json = serde_json::to_string(&queries)
            .map_err(|e| CatalogError::InvalidResponse(format!("Failed to encode query: {}", e)))?;

        Ok(format!(
            "{}/databases/{}/collections/{}/documents?query={}",
            self.base_url,
            self.database_id,
            self.collection_id,
            urlencoding::encode(&queries_json)
        ))
    }

    async fn fetch_page(
        &self,
        offset: usize,
    ) -> Result<(Vec<BusinessRecord>, usize), CatalogError> {
        let url = self.page_url(offset)?;
        tracing::debug!("Fetching catalog page at offset {}", offset);

        let mut request = self.client.get(&url);
        if let Some(project_id) = &self.project_id {
            request = request.header("X-Appwrite-Project", project_id);
        }
        if let Some(api_key) = &self.api_key {
            request = request.header("X-Appwrite-Key", api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CatalogError::Unauthorized);
        }
        if !status.is_success() {
            return Err(CatalogError::ApiError(format!(
                "Failed to fetch businesses: {}",
                status
            )));
        }

        let json: Value = response.json().await?;
        let documents = json
            .get("documents")
            .and_then(|d| d.as_array())
            .ok_or_else(|| CatalogError::InvalidResponse("Missing documents array".into()))?;
        let total = json
            .get("total")
            .and_then(Value::as_u64)
            .map(|t| t as usize)
            .unwrap_or(offset + documents.len());

        let records = documents
            .iter()
            .filter_map(|doc| {
                let data = doc.get("data").unwrap_or(doc);
                let data = with_document_id(data, doc);
                match serde_json::from_value::<BusinessRecord>(data) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!("Skipping malformed business document: {}", e);
                        None
                    }
                }
            })
            .collect();

        Ok((records, total))
    }
}

/// Document APIs keep the id in `$id`; fold it into `id` when missing
fn with_document_id(data: &Value, doc: &Value) -> Value {
    let mut data = data.clone();
    if let Value::Object(map) = &mut data {
        if !map.contains_key("id") {
            if let Some(id) = doc.get("$id").cloned() {
                map.insert("id".to_string(), id);
            }
        }
    }
    data
}

#[async_trait]
impl CatalogSource for HttpCatalogClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_active(&self) -> Result<Vec<BusinessRecord>, CatalogError> {
        let mut records = Vec::new();
        let mut offset = 0;

        loop {
            let (page, total) = self.fetch_page(offset).await?;
            let fetched = page.len();
            records.extend(page);
            offset += self.page_size;

            if fetched < self.page_size || offset >= total {
                break;
            }
        }

        Ok(records)
    }
}

/// JSON file holding an array of business records
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileCatalog {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_active(&self) -> Result<Vec<BusinessRecord>, CatalogError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::InvalidResponse(format!("{}: {}", self.path.display(), e)))?;

        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut map) => match map.remove("businesses") {
                Some(Value::Array(entries)) => entries,
                _ => return Err(CatalogError::InvalidResponse("Missing businesses array".into())),
            },
            _ => return Err(CatalogError::InvalidResponse("Expected a JSON array".into())),
        };

        Ok(entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect())
    }
}

/// In-memory catalog
pub struct StaticCatalog {
    records: Vec<BusinessRecord>,
}

impl StaticCatalog {
    pub fn new(records: Vec<BusinessRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_active(&self) -> Result<Vec<BusinessRecord>, CatalogError> {
        Ok(self.records.clone())
    }
}

/// Default wait after a failed load before `snapshot` asks the source again
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Process-wide catalog index
///
/// A refresh builds a complete new index and swaps it in; readers holding the
/// previous `Arc` finish against it undisturbed. A failed refresh keeps the
/// last good index.
///
/// Loads are single-flight. While no index exists, requests arriving within
/// `retry_backoff` of a failed load get [`CatalogError::CoolingDown`] instead
/// of starting another fetch.
pub struct CatalogStore {
    source: Arc<dyn CatalogSource>,
    current: RwLock<Option<Arc<CatalogIndex>>>,
    fetch_timeout: Duration,
    retry_backoff: Duration,
    /// Held for the duration of a load; remembers when the last one failed
    load_lock: Mutex<Option<Instant>>,
}

impl CatalogStore {
    pub fn new(source: Arc<dyn CatalogSource>, fetch_timeout: Duration) -> Self {
        Self {
            source,
            current: RwLock::new(None),
            fetch_timeout,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            load_lock: Mutex::new(None),
        }
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Store pre-loaded with an index, mostly for tests
    pub fn preloaded(records: Vec<BusinessRecord>) -> Self {
        let source: Arc<dyn CatalogSource> = Arc::new(StaticCatalog::new(records.clone()));
        Self {
            source,
            current: RwLock::new(Some(Arc::new(CatalogIndex::build(records)))),
            fetch_timeout: Duration::from_secs(10),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            load_lock: Mutex::new(None),
        }
    }

    /// Reload the catalog and swap in a new index
    ///
    /// Waits for a load already in flight, then fetches regardless of backoff.
    pub async fn refresh(&self) -> Result<Arc<CatalogIndex>, CatalogError> {
        let mut last_failure = self.load_lock.lock().await;
        self.load(&mut last_failure).await
    }

    /// Current index, loading it on first use
    pub async fn snapshot(&self) -> Result<Arc<CatalogIndex>, CatalogError> {
        if let Some(index) = self.current().await {
            return Ok(index);
        }

        let mut last_failure = self.load_lock.lock().await;
        // Another request may have loaded while we waited
        if let Some(index) = self.current().await {
            return Ok(index);
        }
        if let Some(failed_at) = *last_failure {
            let waited = failed_at.elapsed();
            if waited < self.retry_backoff {
                return Err(CatalogError::CoolingDown(self.retry_backoff - waited));
            }
        }

        self.load(&mut last_failure).await
    }

    /// Current index without loading
    pub async fn current(&self) -> Option<Arc<CatalogIndex>> {
        self.current.read().await.clone()
    }

    /// Caller must hold `load_lock`
    async fn load(
        &self,
        last_failure: &mut Option<Instant>,
    ) -> Result<Arc<CatalogIndex>, CatalogError> {
        let fetch = tokio::time::timeout(self.fetch_timeout, self.source.fetch_active());
        let fetched = match fetch.await {
            Ok(fetched) => fetched,
            Err(_) => Err(CatalogError::Timeout(self.fetch_timeout)),
        };
        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                *last_failure = Some(Instant::now());
                return Err(e);
            }
        };
        *last_failure = None;

        let index = Arc::new(CatalogIndex::build(records));
        *self.current.write().await = Some(Arc::clone(&index));

        tracing::info!(
            "Catalog refreshed from {}: {} businesses indexed, {} skipped, {} terms",
            self.source.name(),
            index.len(),
            index.skipped(),
            index.vocabulary_size()
        );

        Ok(index)
    }
}
