use crate::config::ApiConfig;
use crate::coordinator::{IngestRequest, IngestionCoordinator, PhotoUpdate};
use crate::error::MediaError;
use crate::models::{Actor, PickRejectState, Role};
use crate::object_store::Namespace;
use crate::search::SearchFilter;
use anyhow::{Context, Result};
use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const FILENAME_HEADER: &str = "x-filename";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: IngestionCoordinator,
    /// Pinged by `/ready` when the Postgres store is in use
    pub database: Option<PgPool>,
    pub max_upload_bytes: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// HTTP face of [`MediaError`]
#[derive(Debug)]
pub struct ApiError(pub MediaError);

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(err: &MediaError) -> StatusCode {
    match err {
        MediaError::Validation(_) => StatusCode::BAD_REQUEST,
        MediaError::Authorization(_) => StatusCode::FORBIDDEN,
        MediaError::NotFound { .. } => StatusCode::NOT_FOUND,
        MediaError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        MediaError::Storage(_) => StatusCode::BAD_GATEWAY,
        MediaError::Metadata(_) | MediaError::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
        MediaError::SearchUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        // Client closed request
        MediaError::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code().to_string(),
            }),
        )
            .into_response()
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(MediaError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(MediaError::Validation(rejection.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(MediaError::Validation(rejection.body_text()))
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Caller identity set by the upstream authentication layer
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> ApiResult<Self> {
        let header_str = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header_str(USER_ID_HEADER)
            .ok_or_else(|| MediaError::Authorization("missing caller identity".to_string()))?
            .parse::<i64>()
            .map_err(|_| MediaError::Authorization("malformed caller identity".to_string()))?;
        let role = header_str(USER_ROLE_HEADER)
            .ok_or_else(|| MediaError::Authorization("missing caller role".to_string()))?
            .parse::<Role>()
            .map_err(|e| MediaError::Authorization(e.to_string()))?;

        Ok(Actor::new(user_id, role))
    }
}

fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// PATCH body; an explicit `"title": null` clears the title
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePhotoRequest {
    #[serde(default, deserialize_with = "deserialize_present")]
    pub title: Option<Option<String>>,
    pub state: Option<String>,
    pub stars: Option<i64>,
}

impl TryFrom<UpdatePhotoRequest> for PhotoUpdate {
    type Error = MediaError;

    fn try_from(req: UpdatePhotoRequest) -> std::result::Result<Self, MediaError> {
        Ok(PhotoUpdate {
            title: req.title,
            state: req
                .state
                .as_deref()
                .map(str::parse::<PickRejectState>)
                .transpose()?,
            stars: req.stars,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub ttl_secs: Option<u64>,
}

/// Raw search query string; parsed by hand so bad values surface as
/// validation errors
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub q: Option<String>,
    pub album: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub min_stars: Option<String>,
    pub max_stars: Option<String>,
    pub state: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_param<T: std::str::FromStr>(value: &Option<String>, name: &str) -> std::result::Result<Option<T>, MediaError> {
    non_empty(value)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| MediaError::Validation(format!("invalid {}", name)))
        })
        .transpose()
}

fn parse_date(value: &Option<String>, name: &str) -> std::result::Result<Option<DateTime<Utc>>, MediaError> {
    non_empty(value)
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|_| MediaError::Validation(format!("invalid {} format, use RFC3339", name)))
        })
        .transpose()
}

impl TryFrom<SearchParams> for SearchFilter {
    type Error = MediaError;

    fn try_from(params: SearchParams) -> std::result::Result<Self, MediaError> {
        let offset: Option<i64> = parse_param(&params.offset, "offset")?;
        let limit: Option<i64> = parse_param(&params.limit, "limit")?;

        Ok(SearchFilter {
            query: non_empty(&params.q).map(str::to_string),
            album_id: parse_param(&params.album, "album id")?,
            album_ids: None,
            date_from: parse_date(&params.date_from, "dateFrom")?,
            date_to: parse_date(&params.date_to, "dateTo")?,
            min_stars: parse_param(&params.min_stars, "minStars")?,
            max_stars: parse_param(&params.max_stars, "maxStars")?,
            state: non_empty(&params.state)
                .map(str::parse::<PickRejectState>)
                .transpose()?,
            limit: limit.filter(|l| *l > 0).map(|l| l as usize),
            offset: offset.filter(|o| *o >= 0).unwrap_or(0) as usize,
        })
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/albums/:album_id/photos", post(upload_photo))
        .route("/api/v1/albums/:album_id/reindex", post(reindex_album))
        .route(
            "/api/v1/photos/:photo_id",
            patch(update_photo).delete(delete_photo),
        )
        .route("/api/v1/assets/:blob_id/:variant", get(get_asset))
        .route("/api/v1/assets/:blob_id/:variant/url", get(get_presigned_url))
        .route("/api/v1/search", get(search_photos))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "media-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let index = state.coordinator.index_health();

    let database = match &state.database {
        Some(pool) => sqlx::query("SELECT 1").fetch_one(pool).await.map(|_| ()),
        None => Ok(()),
    };

    match database {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected",
                "index": index
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string(),
                "index": index
            })),
        ),
    }
}

/// Ingest a raw upload into an album
#[instrument(skip(state, headers, body), fields(size = body.len()))]
async fn upload_photo(
    State(state): State<AppState>,
    album_id: Result<Path<i64>, PathRejection>,
    actor: Actor,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let Path(album_id) = album_id?;
    let filename = headers
        .get(FILENAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MediaError::Validation("X-Filename header is required".to_string()))?
        .to_string();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let request = IngestRequest {
        album_id,
        filename,
        content_type,
        data: body,
    };

    // A client disconnect drops this future, which cancels the ingest and
    // deletes whatever it already wrote
    let photo = state
        .coordinator
        .ingest(request, &actor, &CancellationToken::new())
        .await?;

    Ok((StatusCode::CREATED, Json(photo)))
}

#[instrument(skip(state))]
async fn reindex_album(
    State(state): State<AppState>,
    album_id: Result<Path<i64>, PathRejection>,
    actor: Actor,
) -> ApiResult<impl IntoResponse> {
    let Path(album_id) = album_id?;
    let indexed = state.coordinator.reindex_album(album_id, &actor).await?;
    Ok(Json(serde_json::json!({
        "albumId": album_id,
        "indexed": indexed
    })))
}

#[instrument(skip(state))]
async fn update_photo(
    State(state): State<AppState>,
    photo_id: Result<Path<i64>, PathRejection>,
    actor: Actor,
    request: Result<Json<UpdatePhotoRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(photo_id) = photo_id?;
    let Json(request) = request?;
    let update = PhotoUpdate::try_from(request)?;
    let photo = state.coordinator.update(photo_id, update, &actor).await?;
    Ok(Json(photo))
}

#[instrument(skip(state))]
async fn delete_photo(
    State(state): State<AppState>,
    photo_id: Result<Path<i64>, PathRejection>,
    actor: Actor,
) -> ApiResult<impl IntoResponse> {
    let Path(photo_id) = photo_id?;
    state
        .coordinator
        .delete(photo_id, &actor, &CancellationToken::new())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream an original or thumbnail through the service
#[instrument(skip(state))]
async fn get_asset(
    State(state): State<AppState>,
    asset: Result<Path<(Uuid, String)>, PathRejection>,
    actor: Actor,
) -> ApiResult<Response> {
    let Path((blob_id, variant)) = asset?;
    let variant: Namespace = variant.parse()?;
    let content = state.coordinator.get_asset(blob_id, variant, &actor).await?;

    let mut response = Response::new(Body::from_stream(content.body));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if content.size > 0 {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content.size));
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=3600"),
    );

    Ok(response)
}

#[instrument(skip(state))]
async fn get_presigned_url(
    State(state): State<AppState>,
    asset: Result<Path<(Uuid, String)>, PathRejection>,
    query: Result<Query<PresignQuery>, QueryRejection>,
    actor: Actor,
) -> ApiResult<impl IntoResponse> {
    let Path((blob_id, variant)) = asset?;
    let Query(query) = query?;
    let variant: Namespace = variant.parse()?;
    let url = state
        .coordinator
        .presigned_url(blob_id, variant, query.ttl_secs.map(Duration::from_secs), &actor)
        .await?;
    Ok(Json(url))
}

#[instrument(skip(state))]
async fn search_photos(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
    actor: Actor,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let filter = SearchFilter::try_from(params)?;
    let result = state.coordinator.search(filter, &actor).await?;
    Ok(Json(result))
}

/// Start the media API server and serve until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting media API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
