use crate::config::DatabaseConfig;
use crate::error::{MediaError, Result};
use crate::models::{
    scalar_map_from_json, Album, AlbumGrant, Comment, NewPhoto, Photo, PickRejectState,
    StarRating,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Relational repository for photos and the records the pipeline reads.
///
/// Lookups return `Ok(None)` for missing rows; errors are reserved for store
/// failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo>;

    async fn get_photo(&self, id: i64) -> Result<Option<Photo>>;

    async fn get_photo_by_blob(&self, blob_id: Uuid) -> Result<Option<Photo>>;

    /// Persist title, state and stars. Blob columns are never written.
    async fn update_photo(&self, photo: &Photo) -> Result<Option<Photo>>;

    /// Returns false when no row existed
    async fn delete_photo(&self, id: i64) -> Result<bool>;

    async fn list_photos_by_album(&self, album_id: i64) -> Result<Vec<Photo>>;

    async fn get_album(&self, id: i64) -> Result<Option<Album>>;

    async fn list_grants_by_album(&self, album_id: i64) -> Result<Vec<AlbumGrant>>;

    /// Albums the user owns or has been granted
    async fn list_accessible_album_ids(&self, user_id: i64) -> Result<Vec<i64>>;

    async fn list_comments_by_photo(&self, photo_id: i64) -> Result<Vec<Comment>>;
}

const PHOTO_COLUMNS: &str = "id, album_id, filename, title, blob_id, thumbnail_blob_id, \
     content_type, size_bytes, metadata, pick_reject_state, stars, capture_time, \
     created_at, updated_at";

const ALBUM_COLUMNS: &str = "id, photographer_id, title, date_taken, description, location, \
     custom_fields, thumbnail_photo_id, created_at, updated_at";

#[derive(Debug, FromRow)]
struct PhotoRow {
    id: i64,
    album_id: i64,
    filename: String,
    title: Option<String>,
    blob_id: Uuid,
    thumbnail_blob_id: Option<Uuid>,
    content_type: String,
    size_bytes: i64,
    metadata: Option<serde_json::Value>,
    pick_reject_state: String,
    stars: i16,
    capture_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PhotoRow> for Photo {
    type Error = MediaError;

    fn try_from(row: PhotoRow) -> Result<Self> {
        let state: PickRejectState = row
            .pick_reject_state
            .parse()
            .map_err(|e| MediaError::Metadata(format!("photo {}: {}", row.id, e)))?;
        let stars = StarRating::new(row.stars as i64)
            .map_err(|e| MediaError::Metadata(format!("photo {}: {}", row.id, e)))?;

        Ok(Photo {
            id: row.id,
            album_id: row.album_id,
            filename: row.filename,
            title: row.title,
            blob_id: row.blob_id,
            thumbnail_blob_id: row.thumbnail_blob_id,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            metadata: row
                .metadata
                .as_ref()
                .map(scalar_map_from_json)
                .unwrap_or_default(),
            state,
            stars,
            capture_time: row.capture_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AlbumRow {
    id: i64,
    photographer_id: i64,
    title: String,
    date_taken: Option<NaiveDate>,
    description: Option<String>,
    location: Option<String>,
    custom_fields: Option<serde_json::Value>,
    thumbnail_photo_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AlbumRow> for Album {
    fn from(row: AlbumRow) -> Self {
        Album {
            id: row.id,
            photographer_id: row.photographer_id,
            title: row.title,
            date_taken: row.date_taken,
            description: row.description,
            location: row.location,
            custom_fields: row
                .custom_fields
                .as_ref()
                .map(scalar_map_from_json)
                .unwrap_or_default(),
            thumbnail_photo_id: row.thumbnail_photo_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CommentRow {
    id: i64,
    photo_id: i64,
    user_id: i64,
    parent_comment_id: Option<i64>,
    text: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id,
            photo_id: row.photo_id,
            user_id: row.user_id,
            parent_comment_id: row.parent_comment_id,
            text: row.text,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL-backed metadata store
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .map_err(|e| MediaError::Metadata(format!("Failed to connect to PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MediaError::Metadata(format!("Failed to run migrations: {}", e)))?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Round trip used by readiness checks
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self, photo), fields(album_id = photo.album_id, blob_id = %photo.blob_id))]
    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo> {
        let sql = format!(
            r#"
            INSERT INTO photos (
                album_id, filename, blob_id, thumbnail_blob_id, content_type,
                size_bytes, metadata, pick_reject_state, stars, capture_time,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, 'none', 0, $8,
                NOW(), NOW()
            )
            RETURNING {}
            "#,
            PHOTO_COLUMNS
        );

        let row = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(photo.album_id)
            .bind(&photo.filename)
            .bind(photo.blob_id)
            .bind(photo.thumbnail_blob_id)
            .bind(&photo.content_type)
            .bind(photo.size_bytes)
            .bind(Json(&photo.metadata))
            .bind(photo.capture_time)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MediaError::Metadata(format!("Failed to insert photo: {}", e)))?;

        debug!(photo_id = row.id, "Photo row created");

        row.try_into()
    }

    async fn get_photo(&self, id: i64) -> Result<Option<Photo>> {
        let sql = format!("SELECT {} FROM photos WHERE id = $1", PHOTO_COLUMNS);

        sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Photo::try_from)
            .transpose()
    }

    async fn get_photo_by_blob(&self, blob_id: Uuid) -> Result<Option<Photo>> {
        let sql = format!("SELECT {} FROM photos WHERE blob_id = $1", PHOTO_COLUMNS);

        sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(blob_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Photo::try_from)
            .transpose()
    }

    #[instrument(skip(self, photo), fields(photo_id = photo.id))]
    async fn update_photo(&self, photo: &Photo) -> Result<Option<Photo>> {
        let sql = format!(
            r#"
            UPDATE photos
            SET title = $1, pick_reject_state = $2, stars = $3, updated_at = NOW()
            WHERE id = $4
            RETURNING {}
            "#,
            PHOTO_COLUMNS
        );

        sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(&photo.title)
            .bind(photo.state.as_str())
            .bind(photo.stars.value() as i16)
            .bind(photo.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MediaError::Metadata(format!("Failed to update photo: {}", e)))?
            .map(Photo::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn delete_photo(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MediaError::Metadata(format!("Failed to delete photo: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_photos_by_album(&self, album_id: i64) -> Result<Vec<Photo>> {
        let sql = format!(
            "SELECT {} FROM photos WHERE album_id = $1 ORDER BY capture_time DESC NULLS LAST, created_at DESC",
            PHOTO_COLUMNS
        );

        sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(album_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Photo::try_from)
            .collect()
    }

    async fn get_album(&self, id: i64) -> Result<Option<Album>> {
        let sql = format!("SELECT {} FROM albums WHERE id = $1", ALBUM_COLUMNS);

        let row = sqlx::query_as::<_, AlbumRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Album::from))
    }

    async fn list_grants_by_album(&self, album_id: i64) -> Result<Vec<AlbumGrant>> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT album_id, user_id FROM album_users WHERE album_id = $1")
                .bind(album_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(album_id, user_id)| AlbumGrant { album_id, user_id })
            .collect())
    }

    async fn list_accessible_album_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM albums WHERE photographer_id = $1
            UNION
            SELECT album_id FROM album_users WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn list_comments_by_photo(&self, photo_id: i64) -> Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, photo_id, user_id, parent_comment_id, text, created_at, updated_at
            FROM comments
            WHERE photo_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(photo_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Comment::from).collect())
    }
}
