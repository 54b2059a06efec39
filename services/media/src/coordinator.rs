//! Orchestrates writes across the object store, metadata store and search index.
//!
//! There is no transaction spanning the three stores. Ingestion writes blobs
//! first and commits the metadata row last; the row insert is the point at which
//! a photo starts to exist. Anything that fails before that point deletes the
//! blobs it already wrote. Search documents are pushed from detached tasks after
//! the commit and are never rolled back; their failures only show up in
//! [`IndexHealth`] and the `media.index.failures` counter.

use crate::auth::{Action, AuthorizationGuard};
use crate::error::{MediaError, Result};
use crate::health::{IndexHealth, IndexHealthSnapshot};
use crate::metadata_store::MetadataStore;
use crate::models::{Actor, Album, NewPhoto, Photo, PickRejectState, StarRating};
use crate::object_store::{Namespace, ObjectContent, ObjectStore, PresignedUrl};
use crate::search::{SearchDocument, SearchFilter, SearchIndexer, SearchResult};
use crate::transcoder::{MediaTranscoder, TranscodeOutput};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

/// Raw upload handed to [`IngestionCoordinator::ingest`]
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub album_id: i64,
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Metadata-only changes to a photo. `title: Some(None)` clears the title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoUpdate {
    pub title: Option<Option<String>>,
    pub state: Option<PickRejectState>,
    pub stars: Option<i64>,
}

impl PhotoUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.state.is_none() && self.stars.is_none()
    }
}

/// Run `fut` unless `cancel` fires first
async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MediaError::Cancelled),
        result = fut => result,
    }
}

#[derive(Clone)]
pub struct IngestionCoordinator {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    index: Option<Arc<dyn SearchIndexer>>,
    transcoder: MediaTranscoder,
    guard: AuthorizationGuard,
    default_presign_ttl: Duration,
    index_health: Arc<IndexHealth>,
}

impl IngestionCoordinator {
    pub fn builder(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> IngestionCoordinatorBuilder {
        IngestionCoordinatorBuilder::new(objects, metadata)
    }

    pub fn index_health(&self) -> IndexHealthSnapshot {
        self.index_health.snapshot(self.index.is_some())
    }

    /// Wait for detached index pushes to finish
    pub async fn wait_for_index(&self) {
        self.index_health.wait_idle().await
    }

    /// Transcode an upload, store its blobs and commit its photo row.
    ///
    /// Returns only after the row is committed. On any failure or cancellation
    /// before that, every blob written so far is deleted again. Dropping the
    /// returned future counts as cancellation.
    #[instrument(
        skip(self, request, actor, cancel),
        fields(album_id = request.album_id, filename = %request.filename, user_id = actor.user_id)
    )]
    pub async fn ingest(
        &self,
        request: IngestRequest,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<Photo> {
        if request.data.is_empty() {
            return Err(MediaError::Validation("upload is empty".to_string()));
        }
        if request.filename.trim().is_empty() {
            return Err(MediaError::Validation("filename is required".to_string()));
        }

        let album = until_cancelled(
            cancel,
            self.guard
                .authorize(actor, request.album_id, Action::CreatePhoto),
        )
        .await?;

        let transcoded = until_cancelled(
            cancel,
            self.transcoder
                .transcode(request.data.clone(), &request.content_type),
        )
        .await?;

        // The writes run in their own task so that dropping this future
        // cancels them through the guard instead of abandoning written blobs
        let cancel = cancel.child_token();
        let drop_guard = cancel.clone().drop_guard();
        let this = self.clone();
        let task = tokio::spawn(
            async move {
                this.store_and_commit(request.album_id, request.filename, album, transcoded, &cancel)
                    .await
            }
            .in_current_span(),
        );

        let result = task
            .await
            .map_err(|e| MediaError::Storage(format!("Ingest task failed: {}", e)))?;
        drop_guard.disarm();
        result
    }

    /// Write the transcoded blobs under a fresh id and commit the photo row.
    /// Everything written is deleted again if the commit is not reached.
    async fn store_and_commit(
        &self,
        album_id: i64,
        filename: String,
        album: Album,
        transcoded: TranscodeOutput,
        cancel: &CancellationToken,
    ) -> Result<Photo> {
        let blob_id = Uuid::new_v4();
        let mut written = Vec::with_capacity(2);

        // A failed or interrupted put may still leave an object behind
        written.push(Namespace::Original);
        if let Err(e) = until_cancelled(
            cancel,
            self.objects.put(
                Namespace::Original,
                blob_id,
                transcoded.canonical.clone(),
                &transcoded.content_type,
            ),
        )
        .await
        {
            self.compensate(blob_id, &written).await;
            return Err(e);
        }

        let mut thumbnail_blob_id = None;
        if let Some(thumbnail) = transcoded.thumbnail {
            written.push(Namespace::Thumbnail);
            match until_cancelled(
                cancel,
                self.objects.put(
                    Namespace::Thumbnail,
                    blob_id,
                    thumbnail,
                    crate::transcoder::CANONICAL_CONTENT_TYPE,
                ),
            )
            .await
            {
                Ok(()) => thumbnail_blob_id = Some(blob_id),
                Err(MediaError::Cancelled) => {
                    self.compensate(blob_id, &written).await;
                    return Err(MediaError::Cancelled);
                }
                Err(e) => {
                    warn!(blob_id = %blob_id, error = %e, "Thumbnail upload failed, continuing without");
                    if let Err(e) = self.objects.delete(Namespace::Thumbnail, blob_id).await {
                        warn!(blob_id = %blob_id, error = %e, "Failed to clean up partial thumbnail");
                    }
                    written.pop();
                }
            }
        }

        if cancel.is_cancelled() {
            self.compensate(blob_id, &written).await;
            return Err(MediaError::Cancelled);
        }

        let new_photo = NewPhoto {
            album_id,
            filename,
            blob_id,
            thumbnail_blob_id,
            content_type: transcoded.content_type,
            size_bytes: transcoded.canonical.len() as i64,
            metadata: transcoded.metadata,
            capture_time: transcoded.capture_time,
        };

        let photo = match self.metadata.create_photo(new_photo).await {
            Ok(photo) => photo,
            Err(e) => {
                error!(blob_id = %blob_id, error = %e, "Photo commit failed");
                self.compensate(blob_id, &written).await;
                return Err(e);
            }
        };

        metrics::counter!("media.photos.ingested").increment(1);
        metrics::counter!("media.bytes.stored").increment(photo.size_bytes as u64);
        info!(photo_id = photo.id, blob_id = %blob_id, "Photo ingested");

        self.spawn_index_upsert(photo.clone(), Some(album));
        Ok(photo)
    }

    /// Delete a photo's blobs, then its row. Absent photos are a no-op.
    #[instrument(skip(self, actor, cancel), fields(user_id = actor.user_id))]
    pub async fn delete(&self, photo_id: i64, actor: &Actor, cancel: &CancellationToken) -> Result<()> {
        let Some(photo) = until_cancelled(cancel, self.metadata.get_photo(photo_id)).await? else {
            debug!(photo_id, "Photo already absent");
            return Ok(());
        };

        until_cancelled(
            cancel,
            self.guard
                .authorize(actor, photo.album_id, Action::DeletePhoto),
        )
        .await?;

        if let Some(thumbnail_id) = photo.thumbnail_blob_id {
            until_cancelled(cancel, self.objects.delete(Namespace::Thumbnail, thumbnail_id)).await?;
        }
        until_cancelled(cancel, self.objects.delete(Namespace::Original, photo.blob_id)).await?;

        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        self.metadata.delete_photo(photo.id).await?;

        info!(photo_id, blob_id = %photo.blob_id, "Photo deleted");
        self.spawn_index_remove(photo.id);
        Ok(())
    }

    pub async fn update_rating(&self, photo_id: i64, stars: i64, actor: &Actor) -> Result<Photo> {
        let update = PhotoUpdate {
            stars: Some(stars),
            ..Default::default()
        };
        self.update(photo_id, update, actor).await
    }

    pub async fn update_state(
        &self,
        photo_id: i64,
        state: PickRejectState,
        actor: &Actor,
    ) -> Result<Photo> {
        let update = PhotoUpdate {
            state: Some(state),
            ..Default::default()
        };
        self.update(photo_id, update, actor).await
    }

    pub async fn update_title(
        &self,
        photo_id: i64,
        title: Option<String>,
        actor: &Actor,
    ) -> Result<Photo> {
        let update = PhotoUpdate {
            title: Some(title),
            ..Default::default()
        };
        self.update(photo_id, update, actor).await
    }

    /// Apply metadata-only changes; concurrent updates are last-writer-wins
    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn update(&self, photo_id: i64, update: PhotoUpdate, actor: &Actor) -> Result<Photo> {
        if update.is_empty() {
            return Err(MediaError::Validation("no changes given".to_string()));
        }
        let stars = update.stars.map(StarRating::new).transpose()?;

        let mut photo = self
            .metadata
            .get_photo(photo_id)
            .await?
            .ok_or_else(|| MediaError::not_found("photo", photo_id))?;

        self.guard
            .authorize(actor, photo.album_id, Action::UpdatePhoto)
            .await?;

        if let Some(title) = update.title {
            photo.title = title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
        }
        if let Some(state) = update.state {
            photo.state = state;
        }
        if let Some(stars) = stars {
            photo.stars = stars;
        }

        let updated = self
            .metadata
            .update_photo(&photo)
            .await?
            .ok_or_else(|| MediaError::not_found("photo", photo_id))?;

        self.spawn_index_upsert(updated.clone(), None);
        Ok(updated)
    }

    /// Rebuild every search document of an album in one bulk request, then
    /// drop documents of the album whose photo row no longer exists (removals
    /// lost during an index outage). A failed prune fails the reindex; the
    /// upserted documents stay.
    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn reindex_album(&self, album_id: i64, actor: &Actor) -> Result<usize> {
        let album = self
            .guard
            .authorize(actor, album_id, Action::ReindexAlbum)
            .await?;
        let index = self.index()?;

        let photos = self.metadata.list_photos_by_album(album_id).await?;
        let mut documents = Vec::with_capacity(photos.len());
        for photo in &photos {
            let comments = self.metadata.list_comments_by_photo(photo.id).await?;
            documents.push(SearchDocument::build(photo, Some(&album), &comments));
        }
        let keep: Vec<i64> = photos.iter().map(|p| p.id).collect();

        index.bulk_upsert(documents).await?;
        index.prune_album(album_id, &keep).await?;
        info!(album_id, count = photos.len(), "Album reindexed");
        Ok(photos.len())
    }

    /// Stream one variant of a photo's blob
    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn get_asset(
        &self,
        blob_id: Uuid,
        variant: Namespace,
        actor: &Actor,
    ) -> Result<ObjectContent> {
        let object_id = self.resolve_asset(blob_id, variant, actor).await?;
        self.objects.get(variant, object_id).await
    }

    /// Time-limited URL for one variant; `ttl` defaults and is clamped by the store
    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn presigned_url(
        &self,
        blob_id: Uuid,
        variant: Namespace,
        ttl: Option<Duration>,
        actor: &Actor,
    ) -> Result<PresignedUrl> {
        let object_id = self.resolve_asset(blob_id, variant, actor).await?;
        self.objects
            .presign(variant, object_id, ttl.unwrap_or(self.default_presign_ttl))
            .await
    }

    /// Query the index within the albums the actor may read
    #[instrument(skip(self, filter, actor), fields(user_id = actor.user_id))]
    pub async fn search(&self, filter: SearchFilter, actor: &Actor) -> Result<SearchResult> {
        let mut filter = filter.normalized()?;

        if let Some(album_id) = filter.album_id {
            self.guard
                .authorize(actor, album_id, Action::ViewAlbum)
                .await?;
        } else if !actor.is_admin() {
            filter.album_ids = Some(
                self.metadata
                    .list_accessible_album_ids(actor.user_id)
                    .await?,
            );
        }

        let index = self.index()?;
        index.query(&filter).await.map_err(|e| match e {
            MediaError::Index(msg) => MediaError::SearchUnavailable(msg),
            other => other,
        })
    }

    fn index(&self) -> Result<&Arc<dyn SearchIndexer>> {
        self.index
            .as_ref()
            .ok_or_else(|| MediaError::SearchUnavailable("search indexing is disabled".to_string()))
    }

    async fn resolve_asset(&self, blob_id: Uuid, variant: Namespace, actor: &Actor) -> Result<Uuid> {
        let photo = self
            .metadata
            .get_photo_by_blob(blob_id)
            .await?
            .ok_or_else(|| MediaError::not_found("photo", blob_id))?;

        self.guard
            .authorize(actor, photo.album_id, Action::ViewPhoto)
            .await?;

        match variant {
            Namespace::Original => Ok(photo.blob_id),
            Namespace::Thumbnail => photo
                .thumbnail_blob_id
                .ok_or_else(|| MediaError::not_found("thumbnail", blob_id)),
        }
    }

    /// Best-effort removal of blobs left by an aborted ingest
    async fn compensate(&self, blob_id: Uuid, written: &[Namespace]) {
        metrics::counter!("media.ingest.compensations").increment(1);
        for namespace in written {
            if let Err(e) = self.objects.delete(*namespace, blob_id).await {
                error!(
                    blob_id = %blob_id,
                    namespace = %namespace,
                    error = %e,
                    "Compensating delete failed, object orphaned"
                );
            }
        }
        debug!(blob_id = %blob_id, count = written.len(), "Compensation finished");
    }

    fn spawn_index_upsert(&self, photo: Photo, album: Option<Album>) {
        let Some(index) = self.index.clone() else {
            return;
        };
        let metadata = Arc::clone(&self.metadata);
        let health = Arc::clone(&self.index_health);
        let in_flight = health.begin();

        tokio::spawn(async move {
            let _in_flight = in_flight;
            let photo_id = photo.id;

            let result = async {
                let album = match album {
                    Some(album) => Some(album),
                    None => metadata.get_album(photo.album_id).await?,
                };
                let comments = metadata.list_comments_by_photo(photo.id).await?;
                index
                    .upsert(SearchDocument::build(&photo, album.as_ref(), &comments))
                    .await
            }
            .await;

            if let Err(e) = result {
                health.record_failure();
                warn!(photo_id, error = %e, "Search index update failed");
            }
        });
    }

    fn spawn_index_remove(&self, photo_id: i64) {
        let Some(index) = self.index.clone() else {
            return;
        };
        let health = Arc::clone(&self.index_health);
        let in_flight = health.begin();

        tokio::spawn(async move {
            let _in_flight = in_flight;
            if let Err(e) = index.remove(photo_id).await {
                health.record_failure();
                warn!(photo_id, error = %e, "Search index removal failed");
            }
        });
    }
}

/// Builder for [`IngestionCoordinator`]
pub struct IngestionCoordinatorBuilder {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    index: Option<Arc<dyn SearchIndexer>>,
    transcoder: MediaTranscoder,
    default_presign_ttl: Duration,
}

impl IngestionCoordinatorBuilder {
    pub fn new(objects: Arc<dyn ObjectStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            objects,
            metadata,
            index: None,
            transcoder: MediaTranscoder::default(),
            default_presign_ttl: Duration::from_secs(3600),
        }
    }

    pub fn index(mut self, index: Arc<dyn SearchIndexer>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn transcoder(mut self, transcoder: MediaTranscoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn default_presign_ttl(mut self, ttl: Duration) -> Self {
        self.default_presign_ttl = ttl;
        self
    }

    pub fn build(self) -> IngestionCoordinator {
        IngestionCoordinator {
            guard: AuthorizationGuard::new(Arc::clone(&self.metadata)),
            objects: self.objects,
            metadata: self.metadata,
            index: self.index,
            transcoder: self.transcoder,
            default_presign_ttl: self.default_presign_ttl,
            index_health: IndexHealth::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::MockMetadataStore;
    use crate::models::{Role, ScalarMap};
    use crate::object_store::MockObjectStore;
    use crate::search::MockSearchIndexer;
    use crate::transcoder::fixtures::jpeg;
    use chrono::Utc;
    use mockall::predicate::eq;

    const OWNER: i64 = 10;

    fn album(id: i64) -> Album {
        Album {
            id,
            photographer_id: OWNER,
            title: "Studio".to_string(),
            date_taken: None,
            description: None,
            location: None,
            custom_fields: ScalarMap::new(),
            thumbnail_photo_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn committed(new: NewPhoto) -> Photo {
        Photo {
            id: 1,
            album_id: new.album_id,
            filename: new.filename,
            title: None,
            blob_id: new.blob_id,
            thumbnail_blob_id: new.thumbnail_blob_id,
            content_type: new.content_type,
            size_bytes: new.size_bytes,
            metadata: new.metadata,
            state: PickRejectState::None,
            stars: StarRating::default(),
            capture_time: new.capture_time,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn owner() -> Actor {
        Actor::new(OWNER, Role::Photographer)
    }

    fn upload() -> IngestRequest {
        IngestRequest {
            album_id: 1,
            filename: "IMG_0001.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            data: Bytes::from(jpeg(16, 16)),
        }
    }

    fn metadata_with_album() -> MockMetadataStore {
        let mut metadata = MockMetadataStore::new();
        metadata
            .expect_get_album()
            .returning(|id| Ok(Some(album(id))));
        metadata
    }

    fn coordinator(objects: MockObjectStore, metadata: MockMetadataStore) -> IngestionCoordinator {
        IngestionCoordinator::builder(Arc::new(objects), Arc::new(metadata)).build()
    }

    #[tokio::test]
    async fn test_commit_failure_deletes_written_blobs() {
        let mut objects = MockObjectStore::new();
        objects.expect_put().times(2).returning(|_, _, _, _| Ok(()));
        objects
            .expect_delete()
            .with(eq(Namespace::Original), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));
        objects
            .expect_delete()
            .with(eq(Namespace::Thumbnail), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        let mut metadata = metadata_with_album();
        metadata
            .expect_create_photo()
            .times(1)
            .returning(|_| Err(MediaError::Metadata("connection reset".to_string())));

        let result = coordinator(objects, metadata)
            .ingest(upload(), &owner(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(MediaError::Metadata(_))));
    }

    #[tokio::test]
    async fn test_original_write_failure_commits_nothing() {
        let mut objects = MockObjectStore::new();
        objects
            .expect_put()
            .times(1)
            .returning(|_, _, _, _| Err(MediaError::Storage("bucket unreachable".to_string())));
        objects
            .expect_delete()
            .with(eq(Namespace::Original), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        let mut metadata = metadata_with_album();
        metadata.expect_create_photo().times(0);

        let result = coordinator(objects, metadata)
            .ingest(upload(), &owner(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(MediaError::Storage(_))));
    }

    #[tokio::test]
    async fn test_cancellation_after_write_compensates() {
        let cancel = CancellationToken::new();

        let mut objects = MockObjectStore::new();
        let trigger = cancel.clone();
        objects.expect_put().returning(move |ns, _, _, _| {
            if ns == Namespace::Original {
                trigger.cancel();
            }
            Ok(())
        });
        objects.expect_delete().times(2).returning(|_, _| Ok(()));

        let mut metadata = metadata_with_album();
        metadata.expect_create_photo().times(0);

        let result = coordinator(objects, metadata)
            .ingest(upload(), &owner(), &cancel)
            .await;
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let objects = MockObjectStore::new();
        let metadata = MockMetadataStore::new();

        let result = coordinator(objects, metadata)
            .ingest(upload(), &owner(), &cancel)
            .await;
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_undecodable_image_writes_nothing() {
        let objects = MockObjectStore::new();
        let metadata = metadata_with_album();

        let mut request = upload();
        request.data = Bytes::from_static(b"garbage");

        let result = coordinator(objects, metadata)
            .ingest(request, &owner(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(MediaError::UnsupportedMedia(_))));
    }

    #[tokio::test]
    async fn test_thumbnail_failure_is_not_fatal() {
        let mut objects = MockObjectStore::new();
        objects
            .expect_put()
            .returning(|ns, _, _, _| match ns {
                Namespace::Original => Ok(()),
                Namespace::Thumbnail => Err(MediaError::Storage("slow down".to_string())),
            });
        objects
            .expect_delete()
            .with(eq(Namespace::Thumbnail), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        let mut metadata = metadata_with_album();
        metadata
            .expect_create_photo()
            .withf(|p| p.thumbnail_blob_id.is_none())
            .returning(|p| Ok(committed(p)));

        let photo = coordinator(objects, metadata)
            .ingest(upload(), &owner(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(photo.thumbnail_blob_id.is_none());
    }

    #[tokio::test]
    async fn test_index_failure_does_not_fail_ingest() {
        let mut objects = MockObjectStore::new();
        objects.expect_put().returning(|_, _, _, _| Ok(()));

        let mut metadata = metadata_with_album();
        metadata
            .expect_create_photo()
            .returning(|p| Ok(committed(p)));
        metadata
            .expect_list_comments_by_photo()
            .returning(|_| Ok(vec![]));

        let mut index = MockSearchIndexer::new();
        index
            .expect_upsert()
            .times(1)
            .returning(|_| Err(MediaError::Index("cluster red".to_string())));

        let coordinator = IngestionCoordinator::builder(Arc::new(objects), Arc::new(metadata))
            .index(Arc::new(index))
            .build();

        let photo = coordinator
            .ingest(upload(), &owner(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(photo.thumbnail_blob_id, Some(photo.blob_id));

        coordinator.wait_for_index().await;
        let health = coordinator.index_health();
        assert_eq!(health.failed_total, 1);
        assert_eq!(health.in_flight, 0);
    }

    #[tokio::test]
    async fn test_update_rejects_out_of_range_stars_before_loading() {
        let coordinator = coordinator(MockObjectStore::new(), MockMetadataStore::new());
        let result = coordinator.update_rating(1, 6, &owner()).await;
        assert!(matches!(result, Err(MediaError::Validation(_))));
    }

    #[tokio::test]
    async fn test_search_without_index_is_unavailable() {
        let mut metadata = MockMetadataStore::new();
        metadata
            .expect_list_accessible_album_ids()
            .returning(|_| Ok(vec![1]));

        let coordinator = coordinator(MockObjectStore::new(), metadata);
        let result = coordinator.search(SearchFilter::default(), &owner()).await;
        assert!(matches!(result, Err(MediaError::SearchUnavailable(_))));
    }
}
