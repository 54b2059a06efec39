//! In-process store implementations, built for tests and the `test-util` feature.

use crate::error::{MediaError, Result};
use crate::metadata_store::MetadataStore;
use crate::models::{
    Album, AlbumGrant, Comment, NewPhoto, Photo, PickRejectState, ScalarMap, StarRating,
};
use crate::object_store::{clamp_ttl, Namespace, ObjectContent, ObjectStore, PresignedUrl};
use crate::search::{SearchDocument, SearchFilter, SearchIndexer, SearchResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// Object store backed by a hash map
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(Namespace, Uuid), StoredObject>>,
    max_presign_ttl: Duration,
}

impl InMemoryObjectStore {
    pub fn new(max_presign_ttl: Duration) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            max_presign_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 3600))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        namespace: Namespace,
        id: Uuid,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.objects.write().insert(
            (namespace, id),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, namespace: Namespace, id: Uuid) -> Result<ObjectContent> {
        let object = self
            .objects
            .read()
            .get(&(namespace, id))
            .cloned()
            .ok_or_else(|| MediaError::not_found("object", namespace.object_key(id)))?;
        Ok(ObjectContent::from_bytes(object.data, object.content_type))
    }

    async fn delete(&self, namespace: Namespace, id: Uuid) -> Result<()> {
        self.objects.write().remove(&(namespace, id));
        Ok(())
    }

    async fn exists(&self, namespace: Namespace, id: Uuid) -> Result<bool> {
        Ok(self.objects.read().contains_key(&(namespace, id)))
    }

    async fn presign(&self, namespace: Namespace, id: Uuid, ttl: Duration) -> Result<PresignedUrl> {
        let ttl = clamp_ttl(ttl, self.max_presign_ttl)?;
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
        Ok(PresignedUrl {
            url: format!(
                "memory://{}?expires={}",
                namespace.object_key(id),
                expires_at.timestamp()
            ),
            ttl,
            expires_at,
        })
    }

    async fn list(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|(ns, _)| *ns == namespace)
            .map(|(_, id)| id.to_string())
            .filter(|id| id.starts_with(prefix))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[derive(Default)]
struct Tables {
    photos: BTreeMap<i64, Photo>,
    albums: BTreeMap<i64, Album>,
    grants: Vec<AlbumGrant>,
    comments: Vec<Comment>,
}

/// Metadata store backed by ordered maps
#[derive(Default)]
pub struct InMemoryMetadataStore {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    /// Seed an album owned by `photographer_id`
    pub fn create_album(&self, photographer_id: i64, title: &str, location: Option<&str>) -> Album {
        let now = Utc::now();
        let album = Album {
            id: self.allocate_id(),
            photographer_id,
            title: title.to_string(),
            date_taken: None,
            description: None,
            location: location.map(str::to_string),
            custom_fields: ScalarMap::new(),
            thumbnail_photo_id: None,
            created_at: now,
            updated_at: now,
        };
        self.insert_album(album.clone());
        album
    }

    pub fn insert_album(&self, album: Album) {
        self.tables.write().albums.insert(album.id, album);
    }

    pub fn grant(&self, album_id: i64, user_id: i64) {
        let mut tables = self.tables.write();
        if !tables
            .grants
            .iter()
            .any(|g| g.album_id == album_id && g.user_id == user_id)
        {
            tables.grants.push(AlbumGrant { album_id, user_id });
        }
    }

    pub fn revoke(&self, album_id: i64, user_id: i64) {
        self.tables
            .write()
            .grants
            .retain(|g| !(g.album_id == album_id && g.user_id == user_id));
    }

    pub fn add_comment(&self, photo_id: i64, user_id: i64, text: &str) -> Comment {
        let now = Utc::now();
        let comment = Comment {
            id: self.allocate_id(),
            photo_id,
            user_id,
            parent_comment_id: None,
            text: text.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().comments.push(comment.clone());
        comment
    }

    pub fn photo_count(&self) -> usize {
        self.tables.read().photos.len()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo> {
        let mut tables = self.tables.write();
        if !tables.albums.contains_key(&photo.album_id) {
            return Err(MediaError::Metadata(format!(
                "album {} does not exist",
                photo.album_id
            )));
        }
        if tables.photos.values().any(|p| p.blob_id == photo.blob_id) {
            return Err(MediaError::Metadata(format!(
                "duplicate blob id {}",
                photo.blob_id
            )));
        }

        let now = Utc::now();
        let created = Photo {
            id: self.allocate_id(),
            album_id: photo.album_id,
            filename: photo.filename,
            title: None,
            blob_id: photo.blob_id,
            thumbnail_blob_id: photo.thumbnail_blob_id,
            content_type: photo.content_type,
            size_bytes: photo.size_bytes,
            metadata: photo.metadata,
            state: PickRejectState::None,
            stars: StarRating::default(),
            capture_time: photo.capture_time,
            created_at: now,
            updated_at: now,
        };
        tables.photos.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_photo(&self, id: i64) -> Result<Option<Photo>> {
        Ok(self.tables.read().photos.get(&id).cloned())
    }

    async fn get_photo_by_blob(&self, blob_id: Uuid) -> Result<Option<Photo>> {
        Ok(self
            .tables
            .read()
            .photos
            .values()
            .find(|p| p.blob_id == blob_id)
            .cloned())
    }

    async fn update_photo(&self, photo: &Photo) -> Result<Option<Photo>> {
        let mut tables = self.tables.write();
        Ok(tables.photos.get_mut(&photo.id).map(|stored| {
            stored.title = photo.title.clone();
            stored.state = photo.state;
            stored.stars = photo.stars;
            stored.updated_at = Utc::now();
            stored.clone()
        }))
    }

    async fn delete_photo(&self, id: i64) -> Result<bool> {
        let mut tables = self.tables.write();
        let removed = tables.photos.remove(&id).is_some();
        if removed {
            tables.comments.retain(|c| c.photo_id != id);
            for album in tables.albums.values_mut() {
                if album.thumbnail_photo_id == Some(id) {
                    album.thumbnail_photo_id = None;
                }
            }
        }
        Ok(removed)
    }

    async fn list_photos_by_album(&self, album_id: i64) -> Result<Vec<Photo>> {
        Ok(self
            .tables
            .read()
            .photos
            .values()
            .filter(|p| p.album_id == album_id)
            .cloned()
            .collect())
    }

    async fn get_album(&self, id: i64) -> Result<Option<Album>> {
        Ok(self.tables.read().albums.get(&id).cloned())
    }

    async fn list_grants_by_album(&self, album_id: i64) -> Result<Vec<AlbumGrant>> {
        Ok(self
            .tables
            .read()
            .grants
            .iter()
            .filter(|g| g.album_id == album_id)
            .copied()
            .collect())
    }

    async fn list_accessible_album_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let tables = self.tables.read();
        let mut ids: Vec<i64> = tables
            .albums
            .values()
            .filter(|a| a.photographer_id == user_id)
            .map(|a| a.id)
            .chain(
                tables
                    .grants
                    .iter()
                    .filter(|g| g.user_id == user_id)
                    .map(|g| g.album_id),
            )
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn list_comments_by_photo(&self, photo_id: i64) -> Result<Vec<Comment>> {
        Ok(self
            .tables
            .read()
            .comments
            .iter()
            .filter(|c| c.photo_id == photo_id)
            .cloned()
            .collect())
    }
}

/// Search index with the same filter and ordering semantics as the
/// Elasticsearch query
pub struct InMemorySearchIndex {
    documents: RwLock<BTreeMap<i64, SearchDocument>>,
    available: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage; writes fail with `Index`, queries with `SearchUnavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    pub fn document(&self, photo_id: i64) -> Option<SearchDocument> {
        self.documents.read().get(&photo_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn check_writable(&self) -> Result<()> {
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(MediaError::Index("index offline".to_string()))
        }
    }
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(doc: &SearchDocument, filter: &SearchFilter, needle: Option<&str>) -> bool {
    if let Some(needle) = needle {
        if !doc.matches_text(needle) {
            return false;
        }
    }
    if filter.album_id.is_some_and(|id| doc.album_id != id) {
        return false;
    }
    if let Some(ids) = &filter.album_ids {
        if !ids.contains(&doc.album_id) {
            return false;
        }
    }
    if filter.date_from.is_some() || filter.date_to.is_some() {
        let Some(taken) = doc.date_time else {
            return false;
        };
        if filter.date_from.is_some_and(|from| taken < from)
            || filter.date_to.is_some_and(|to| taken > to)
        {
            return false;
        }
    }
    let stars = doc.stars.value() as i64;
    if filter.min_stars.is_some_and(|min| stars < min)
        || filter.max_stars.is_some_and(|max| stars > max)
    {
        return false;
    }
    if filter.state.is_some_and(|state| doc.pick_reject_state != state) {
        return false;
    }
    true
}

/// Capture time descending with missing values last, then newest first
fn search_order(a: &SearchDocument, b: &SearchDocument) -> Ordering {
    let by_capture = match (a.date_time, b.date_time) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_capture
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl SearchIndexer for InMemorySearchIndex {
    async fn ensure_index(&self) -> Result<()> {
        self.check_writable()
    }

    async fn upsert(&self, document: SearchDocument) -> Result<()> {
        self.check_writable()?;
        self.documents.write().insert(document.id, document);
        Ok(())
    }

    async fn bulk_upsert(&self, documents: Vec<SearchDocument>) -> Result<()> {
        self.check_writable()?;
        let mut stored = self.documents.write();
        for document in documents {
            stored.insert(document.id, document);
        }
        Ok(())
    }

    async fn remove(&self, photo_id: i64) -> Result<()> {
        self.check_writable()?;
        self.documents.write().remove(&photo_id);
        Ok(())
    }

    async fn prune_album(&self, album_id: i64, keep: &[i64]) -> Result<()> {
        self.check_writable()?;
        self.documents
            .write()
            .retain(|id, doc| doc.album_id != album_id || keep.contains(id));
        Ok(())
    }

    async fn query(&self, filter: &SearchFilter) -> Result<SearchResult> {
        if !self.available.load(AtomicOrdering::SeqCst) {
            return Err(MediaError::SearchUnavailable("index offline".to_string()));
        }

        let needle = filter
            .query
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        let mut hits: Vec<SearchDocument> = self
            .documents
            .read()
            .values()
            .filter(|doc| matches_filter(doc, filter, needle.as_deref()))
            .cloned()
            .collect();
        hits.sort_by(search_order);

        let total = hits.len() as u64;
        let photos = hits
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .map(SearchDocument::into_photo)
            .collect();

        Ok(SearchResult { total, photos })
    }
}
