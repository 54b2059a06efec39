//! Denormalized photo search.
//!
//! Each photo is indexed as one [`SearchDocument`] carrying its album's title,
//! location and custom fields plus the text of every comment. Documents are keyed
//! by photo id, so indexing the same photo twice replaces the earlier document.

use crate::config::SearchConfig;
use crate::error::{MediaError, Result};
use crate::models::{Album, Comment, Photo, PickRejectState, ScalarMap, StarRating};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_SEARCH_LIMIT: usize = 50;
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Indexed projection of a photo, its album and its comments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: i64,
    pub album_id: i64,
    #[serde(default)]
    pub title: String,
    pub filename: String,
    pub blob_id: Uuid,
    #[serde(default)]
    pub thumbnail_blob_id: Option<Uuid>,
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    /// Stored for display, not searchable field by field
    #[serde(default)]
    pub metadata: ScalarMap,
    /// Metadata values flattened for free-text matching
    #[serde(default)]
    pub metadata_text: Vec<String>,
    #[serde(default)]
    pub album_title: String,
    #[serde(default)]
    pub album_location: String,
    #[serde(default)]
    pub album_custom_fields: ScalarMap,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub pick_reject_state: PickRejectState,
    #[serde(default)]
    pub stars: StarRating,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchDocument {
    pub fn build(photo: &Photo, album: Option<&Album>, comments: &[Comment]) -> Self {
        Self {
            id: photo.id,
            album_id: photo.album_id,
            title: photo.title.clone().unwrap_or_default(),
            filename: photo.filename.clone(),
            blob_id: photo.blob_id,
            thumbnail_blob_id: photo.thumbnail_blob_id,
            content_type: photo.content_type.clone(),
            size_bytes: photo.size_bytes,
            date_time: photo.capture_time,
            metadata: photo.metadata.clone(),
            metadata_text: photo.metadata.values().map(|v| v.to_string()).collect(),
            album_title: album.map(|a| a.title.clone()).unwrap_or_default(),
            album_location: album
                .and_then(|a| a.location.clone())
                .unwrap_or_default(),
            album_custom_fields: album.map(|a| a.custom_fields.clone()).unwrap_or_default(),
            comments: comments.iter().map(|c| c.text.clone()).collect(),
            pick_reject_state: photo.state,
            stars: photo.stars,
            created_at: photo.created_at,
            updated_at: photo.updated_at,
        }
    }

    /// Rebuild the photo view carried by a search hit
    pub fn into_photo(self) -> Photo {
        Photo {
            id: self.id,
            album_id: self.album_id,
            filename: self.filename,
            title: (!self.title.is_empty()).then_some(self.title),
            blob_id: self.blob_id,
            thumbnail_blob_id: self.thumbnail_blob_id,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            metadata: self.metadata,
            state: self.pick_reject_state,
            stars: self.stars,
            capture_time: self.date_time,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Whether any free-text field contains `needle` (lowercased)
    pub fn matches_text(&self, needle: &str) -> bool {
        let contains = |s: &str| s.to_lowercase().contains(needle);
        contains(&self.title)
            || contains(&self.album_title)
            || contains(&self.album_location)
            || self.comments.iter().any(|c| contains(c))
            || self.metadata_text.iter().any(|m| contains(m))
    }
}

/// Conjunctive query over the photo index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub query: Option<String>,
    pub album_id: Option<i64>,
    /// Restrict hits to these albums; an empty set matches nothing
    pub album_ids: Option<Vec<i64>>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub min_stars: Option<i64>,
    pub max_stars: Option<i64>,
    pub state: Option<PickRejectState>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SearchFilter {
    /// Validate bounds and settle the page size
    pub fn normalized(mut self) -> Result<Self> {
        for stars in [self.min_stars, self.max_stars].into_iter().flatten() {
            StarRating::new(stars)?;
        }
        if let (Some(min), Some(max)) = (self.min_stars, self.max_stars) {
            if min > max {
                return Err(MediaError::Validation(format!(
                    "minStars ({}) is greater than maxStars ({})",
                    min, max
                )));
            }
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(MediaError::Validation(
                    "dateFrom is after dateTo".to_string(),
                ));
            }
        }

        self.query = self
            .query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        self.limit = Some(match self.limit {
            None | Some(0) => DEFAULT_SEARCH_LIMIT,
            Some(n) => n.min(MAX_SEARCH_LIMIT),
        });

        Ok(self)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub total: u64,
    pub photos: Vec<Photo>,
}

/// Search index writer and query engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// Create the index with its mapping if absent
    async fn ensure_index(&self) -> Result<()>;

    async fn upsert(&self, document: SearchDocument) -> Result<()>;

    /// One round trip; fails as a whole
    async fn bulk_upsert(&self, documents: Vec<SearchDocument>) -> Result<()>;

    /// Succeeds when the document is already gone
    async fn remove(&self, photo_id: i64) -> Result<()>;

    /// Drop every document of `album_id` whose id is not in `keep`
    async fn prune_album(&self, album_id: i64, keep: &[i64]) -> Result<()>;

    async fn query(&self, filter: &SearchFilter) -> Result<SearchResult>;
}

/// Elasticsearch over its REST API
pub struct ElasticsearchIndexer {
    client: reqwest::Client,
    base_url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchIndexer {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| MediaError::Index(format!("Failed to build HTTP client: {}", e)))?;

        info!(url = %config.url, index = %config.index, "Elasticsearch indexer initialized");

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let req = self.client.request(method, url);
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_ref()),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<(StatusCode, Value)> {
        let response = req
            .send()
            .await
            .map_err(|e| MediaError::Index(format!("Request failed: {}", e)))?;
        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        Ok((status, value))
    }
}

#[async_trait]
impl SearchIndexer for ElasticsearchIndexer {
    #[instrument(skip(self), fields(index = %self.index))]
    async fn ensure_index(&self) -> Result<()> {
        let (status, _) = self.send(self.request(Method::HEAD, &self.index)).await?;
        if status.is_success() {
            debug!("Index already exists");
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            return Err(MediaError::Index(format!(
                "Unexpected status checking index: {}",
                status
            )));
        }

        let (status, body) = self
            .send(self.request(Method::PUT, &self.index).json(&index_mapping()))
            .await?;

        // Another replica may have won the race
        if status.is_success() || error_type(&body) == Some("resource_already_exists_exception") {
            info!("Search index created");
            Ok(())
        } else {
            Err(MediaError::Index(format!(
                "Failed to create index: {} {}",
                status, body
            )))
        }
    }

    #[instrument(skip(self, document), fields(photo_id = document.id))]
    async fn upsert(&self, document: SearchDocument) -> Result<()> {
        let path = format!("{}/_doc/{}?refresh=true", self.index, document.id);
        let (status, body) = self
            .send(self.request(Method::PUT, &path).json(&document))
            .await?;

        if status.is_success() {
            Ok(())
        } else {
            Err(MediaError::Index(format!(
                "Failed to index document: {} {}",
                status, body
            )))
        }
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn bulk_upsert(&self, documents: Vec<SearchDocument>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let payload = bulk_body(&self.index, &documents)?;
        let (status, body) = self
            .send(
                self.request(Method::POST, "_bulk?refresh=true")
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(payload),
            )
            .await?;

        if !status.is_success() {
            return Err(MediaError::Index(format!(
                "Bulk index failed: {} {}",
                status, body
            )));
        }
        if let Some(reason) = first_bulk_failure(&body) {
            return Err(MediaError::Index(format!("Bulk index rejected: {}", reason)));
        }

        debug!(count = documents.len(), "Bulk index completed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, photo_id: i64) -> Result<()> {
        let path = format!("{}/_doc/{}?refresh=true", self.index, photo_id);
        let (status, body) = self.send(self.request(Method::DELETE, &path)).await?;

        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(MediaError::Index(format!(
                "Failed to delete document: {} {}",
                status, body
            )))
        }
    }

    #[instrument(skip(self, keep), fields(keep = keep.len()))]
    async fn prune_album(&self, album_id: i64, keep: &[i64]) -> Result<()> {
        let path = format!("{}/_delete_by_query?refresh=true&conflicts=proceed", self.index);
        let (status, body) = self
            .send(self.request(Method::POST, &path).json(&prune_query(album_id, keep)))
            .await?;

        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(deleted = body["deleted"].as_u64().unwrap_or(0), "Album pruned");
            Ok(())
        } else {
            Err(MediaError::Index(format!(
                "Failed to prune album documents: {} {}",
                status, body
            )))
        }
    }

    #[instrument(skip(self, filter))]
    async fn query(&self, filter: &SearchFilter) -> Result<SearchResult> {
        let path = format!("{}/_search", self.index);
        let (status, body) = self
            .send(self.request(Method::POST, &path).json(&build_search_query(filter)))
            .await
            .map_err(|e| MediaError::SearchUnavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(MediaError::SearchUnavailable(format!(
                "Search returned {}",
                status
            )));
        }

        Ok(parse_search_response(&body))
    }
}

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "long" },
                "album_id": { "type": "long" },
                "title": { "type": "text" },
                "filename": { "type": "keyword" },
                "blob_id": { "type": "keyword" },
                "thumbnail_blob_id": { "type": "keyword" },
                "content_type": { "type": "keyword" },
                "size_bytes": { "type": "long" },
                "date_time": { "type": "date" },
                "metadata": { "type": "object", "enabled": false },
                "metadata_text": { "type": "text" },
                "album_title": { "type": "text" },
                "album_location": { "type": "text" },
                "album_custom_fields": { "type": "object", "enabled": false },
                "comments": { "type": "text" },
                "pick_reject_state": { "type": "keyword" },
                "stars": { "type": "integer" },
                "created_at": { "type": "date" },
                "updated_at": { "type": "date" }
            }
        }
    })
}

fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Translate a filter into an Elasticsearch request body
pub fn build_search_query(filter: &SearchFilter) -> Value {
    let mut must = Vec::new();
    let mut exact = Vec::new();

    if let Some(q) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        must.push(json!({
            "multi_match": {
                "query": q,
                "fields": ["title^3", "album_title^2", "album_location", "comments", "metadata_text"]
            }
        }));
    }

    if let Some(album_id) = filter.album_id {
        exact.push(json!({ "term": { "album_id": album_id } }));
    }
    if let Some(album_ids) = &filter.album_ids {
        exact.push(json!({ "terms": { "album_id": album_ids } }));
    }

    if filter.date_from.is_some() || filter.date_to.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(from) = &filter.date_from {
            range.insert("gte".to_string(), json!(rfc3339(from)));
        }
        if let Some(to) = &filter.date_to {
            range.insert("lte".to_string(), json!(rfc3339(to)));
        }
        exact.push(json!({ "range": { "date_time": range } }));
    }

    if filter.min_stars.is_some() || filter.max_stars.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(min) = filter.min_stars {
            range.insert("gte".to_string(), json!(min));
        }
        if let Some(max) = filter.max_stars {
            range.insert("lte".to_string(), json!(max));
        }
        exact.push(json!({ "range": { "stars": range } }));
    }

    if let Some(state) = filter.state {
        exact.push(json!({ "term": { "pick_reject_state": state.as_str() } }));
    }

    let query = if must.is_empty() && exact.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "must": must, "filter": exact } })
    };

    json!({
        "query": query,
        "sort": [
            { "date_time": { "order": "desc", "missing": "_last" } },
            { "created_at": { "order": "desc" } }
        ],
        "from": filter.offset,
        "size": filter.effective_limit(),
        "track_total_hits": true
    })
}

/// Delete-by-query body matching an album's documents outside `keep`
fn prune_query(album_id: i64, keep: &[i64]) -> Value {
    let ids: Vec<String> = keep.iter().map(i64::to_string).collect();
    json!({
        "query": {
            "bool": {
                "filter": [{ "term": { "album_id": album_id } }],
                "must_not": [{ "ids": { "values": ids } }]
            }
        }
    })
}

/// NDJSON body for the bulk endpoint
fn bulk_body(index: &str, documents: &[SearchDocument]) -> Result<String> {
    let mut body = String::new();
    for doc in documents {
        let action = json!({ "index": { "_index": index, "_id": doc.id.to_string() } });
        let source = serde_json::to_string(doc)
            .map_err(|e| MediaError::Index(format!("Failed to encode document: {}", e)))?;
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

fn error_type(body: &Value) -> Option<&str> {
    body.pointer("/error/type").and_then(Value::as_str)
}

fn first_bulk_failure(body: &Value) -> Option<String> {
    if !body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let reason = body
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("index"))
        .find_map(|op| op.get("error"))
        .map(|err| {
            err.get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string()
        });
    Some(reason.unwrap_or_else(|| "unknown error".to_string()))
}

/// Read hits leniently; unparseable documents are skipped
fn parse_search_response(body: &Value) -> SearchResult {
    let total = body
        .pointer("/hits/total/value")
        .or_else(|| body.pointer("/hits/total"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let photos = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|hit| hit.get("_source"))
        .filter_map(|source| match SearchDocument::deserialize(source) {
            Ok(doc) => Some(doc.into_photo()),
            Err(e) => {
                warn!(error = %e, "Skipping malformed search hit");
                None
            }
        })
        .collect();

    SearchResult { total, photos }
}
