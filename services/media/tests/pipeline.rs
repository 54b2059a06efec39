use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use media_service::memory::{InMemoryMetadataStore, InMemoryObjectStore, InMemorySearchIndex};
use media_service::{
    Actor, IngestRequest, IngestionCoordinator, MediaError, MediaTranscoder, Namespace,
    ObjectContent, ObjectStore, PickRejectState, PresignedUrl, Role, Scalar, SearchFilter,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const PHOTOGRAPHER: i64 = 1;
const CLIENT: i64 = 2;
const STRANGER: i64 = 3;

struct Harness {
    coordinator: IngestionCoordinator,
    metadata: Arc<InMemoryMetadataStore>,
    objects: Arc<InMemoryObjectStore>,
    index: Arc<InMemorySearchIndex>,
}

fn harness() -> Harness {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let objects = Arc::new(InMemoryObjectStore::new(Duration::from_secs(24 * 3600)));
    let index = Arc::new(InMemorySearchIndex::new());
    let coordinator = IngestionCoordinator::builder(objects.clone(), metadata.clone())
        .index(index.clone())
        .transcoder(MediaTranscoder::with_thumbnail_size(32))
        .default_presign_ttl(Duration::from_secs(3600))
        .build();

    Harness {
        coordinator,
        metadata,
        objects,
        index,
    }
}

fn photographer() -> Actor {
    Actor::new(PHOTOGRAPHER, Role::Photographer)
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 11) as u8, 200]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

/// Little-endian TIFF block: IFD0 {Make, ExifIFDPointer} -> Exif IFD {DateTimeOriginal}
fn exif_tiff(make: &str, taken: &str) -> Vec<u8> {
    fn entry(buf: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: u32) {
        buf.extend_from_slice(&tag.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }

    let mut make_data = format!("{}\0", make).into_bytes();
    while make_data.len() < 5 || make_data.len() % 2 != 0 {
        make_data.push(0);
    }
    let taken_data = format!("{}\0", taken).into_bytes();

    let make_offset = 8 + 2 + 2 * 12 + 4;
    let exif_ifd_offset = make_offset + make_data.len() as u32;
    let taken_offset = exif_ifd_offset + 2 + 12 + 4;

    let mut buf = b"II".to_vec();
    buf.extend_from_slice(&42u16.to_le_bytes());
    buf.extend_from_slice(&8u32.to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    entry(&mut buf, 0x010F, 2, make_data.len() as u32, make_offset);
    entry(&mut buf, 0x8769, 4, 1, exif_ifd_offset);
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&make_data);
    buf.extend_from_slice(&1u16.to_le_bytes());
    entry(&mut buf, 0x9003, 2, taken_data.len() as u32, taken_offset);
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&taken_data);
    buf
}

fn jpeg_with_exif(make: &str, taken: &str) -> Vec<u8> {
    let tiff = exif_tiff(make, taken);
    let plain = jpeg(48, 32);

    let mut out = plain[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&plain[2..]);
    out
}

fn upload(album_id: i64, filename: &str, content_type: &str, data: Vec<u8>) -> IngestRequest {
    IngestRequest {
        album_id,
        filename: filename.to_string(),
        content_type: content_type.to_string(),
        data: Bytes::from(data),
    }
}

#[tokio::test]
async fn ingested_jpeg_is_canonical_dated_and_searchable() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Spring Wedding", Some("Porto"));

    let photo = h
        .coordinator
        .ingest(
            upload(album.id, "IMG_0420.jpg", "image/jpeg", jpeg_with_exif("Canon", "2023:05:01 10:00:00")),
            &photographer(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(photo.content_type, "image/webp");
    assert_eq!(photo.filename, "IMG_0420.jpg");
    assert_eq!(
        photo.capture_time,
        Some(Utc.with_ymd_and_hms(2023, 5, 1, 10, 0, 0).unwrap())
    );
    assert_eq!(photo.metadata["Make"], Scalar::Text("Canon".to_string()));
    assert_eq!(photo.thumbnail_blob_id, Some(photo.blob_id));
    assert!(h.objects.exists(Namespace::Original, photo.blob_id).await.unwrap());
    assert!(h.objects.exists(Namespace::Thumbnail, photo.blob_id).await.unwrap());

    let original = h
        .coordinator
        .get_asset(photo.blob_id, Namespace::Original, &photographer())
        .await
        .unwrap();
    assert_eq!(original.content_type, "image/webp");
    let pixels = image::load_from_memory(&original.into_bytes().await.unwrap()).unwrap();
    assert_eq!((pixels.width(), pixels.height()), (48, 32));

    assert_eq!(h.coordinator.reindex_album(album.id, &photographer()).await.unwrap(), 1);

    let by_album = SearchFilter {
        album_id: Some(album.id),
        ..Default::default()
    };
    let result = h.coordinator.search(by_album, &photographer()).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.photos[0].id, photo.id);

    let by_text = SearchFilter {
        query: Some("porto".to_string()),
        ..Default::default()
    };
    assert_eq!(h.coordinator.search(by_text, &photographer()).await.unwrap().total, 1);

    let out_of_range = SearchFilter {
        date_from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        ..Default::default()
    };
    assert_eq!(h.coordinator.search(out_of_range, &photographer()).await.unwrap().total, 0);
}

#[tokio::test]
async fn non_image_upload_is_stored_without_thumbnail() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Contracts", None);

    let photo = h
        .coordinator
        .ingest(
            upload(album.id, "contract.pdf", "application/pdf", b"%PDF-1.7".to_vec()),
            &photographer(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(photo.content_type, "application/pdf");
    assert!(photo.thumbnail_blob_id.is_none());

    let original = h
        .coordinator
        .get_asset(photo.blob_id, Namespace::Original, &photographer())
        .await
        .unwrap();
    assert_eq!(&original.into_bytes().await.unwrap()[..], b"%PDF-1.7");

    let thumbnail = h
        .coordinator
        .get_asset(photo.blob_id, Namespace::Thumbnail, &photographer())
        .await;
    assert!(matches!(thumbnail, Err(MediaError::NotFound { .. })));
}

#[tokio::test]
async fn undecodable_image_leaves_no_trace() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Broken", None);

    let result = h
        .coordinator
        .ingest(
            upload(album.id, "broken.jpg", "image/jpeg", b"not really a jpeg".to_vec()),
            &photographer(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(MediaError::UnsupportedMedia(_))));
    assert!(h.objects.is_empty());
    assert_eq!(h.metadata.photo_count(), 0);
}

#[tokio::test]
async fn delete_removes_blobs_row_and_document() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Portraits", None);
    let cancel = CancellationToken::new();

    let photo = h
        .coordinator
        .ingest(upload(album.id, "a.jpg", "image/jpeg", jpeg(20, 20)), &photographer(), &cancel)
        .await
        .unwrap();
    h.coordinator.wait_for_index().await;
    assert!(h.index.document(photo.id).is_some());

    assert_ok!(h.coordinator.delete(photo.id, &photographer(), &cancel).await);
    h.coordinator.wait_for_index().await;

    for variant in [Namespace::Original, Namespace::Thumbnail] {
        let result = h.coordinator.get_asset(photo.blob_id, variant, &photographer()).await;
        assert!(matches!(result, Err(MediaError::NotFound { .. })));
    }
    assert!(h.objects.is_empty());
    assert!(h.index.document(photo.id).is_none());

    // Repeating the delete is harmless
    assert_ok!(h.coordinator.delete(photo.id, &photographer(), &cancel).await);
}

#[tokio::test]
async fn star_range_filter_is_inclusive() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Selects", None);
    let cancel = CancellationToken::new();

    for (i, stars) in [2, 3, 5, 4].into_iter().enumerate() {
        let photo = h
            .coordinator
            .ingest(
                upload(album.id, &format!("{}.txt", i), "text/plain", vec![b'x'; i + 1]),
                &photographer(),
                &cancel,
            )
            .await
            .unwrap();
        h.coordinator.wait_for_index().await;
        h.coordinator
            .update_rating(photo.id, stars, &photographer())
            .await
            .unwrap();
        h.coordinator.wait_for_index().await;
    }
    h.coordinator.wait_for_index().await;

    let filter = SearchFilter {
        min_stars: Some(3),
        max_stars: Some(5),
        ..Default::default()
    };
    let result = h.coordinator.search(filter, &photographer()).await.unwrap();
    assert_eq!(result.total, 3);
    let mut stars: Vec<u8> = result.photos.iter().map(|p| p.stars.value()).collect();
    stars.sort_unstable();
    assert_eq!(stars, vec![3, 4, 5]);

    let invalid = SearchFilter {
        min_stars: Some(7),
        ..Default::default()
    };
    assert!(matches!(
        h.coordinator.search(invalid, &photographer()).await,
        Err(MediaError::Validation(_))
    ));
}

#[tokio::test]
async fn grantee_reads_but_cannot_mutate() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Family", None);
    h.metadata.grant(album.id, CLIENT);

    let photo = h
        .coordinator
        .ingest(
            upload(album.id, "family.jpg", "image/jpeg", jpeg(16, 16)),
            &photographer(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    h.coordinator.wait_for_index().await;

    let client = Actor::new(CLIENT, Role::Client);
    assert_ok!(
        h.coordinator
            .get_asset(photo.blob_id, Namespace::Thumbnail, &client)
            .await
    );
    let visible = h.coordinator.search(SearchFilter::default(), &client).await.unwrap();
    assert_eq!(visible.total, 1);

    let denied = h.coordinator.update_rating(photo.id, 5, &client).await;
    assert!(matches!(denied, Err(MediaError::Authorization(_))));
    let denied = h
        .coordinator
        .update_state(photo.id, PickRejectState::Pick, &client)
        .await;
    assert!(matches!(denied, Err(MediaError::Authorization(_))));
    assert_err!(
        h.coordinator
            .delete(photo.id, &client, &CancellationToken::new())
            .await
    );

    let stranger = Actor::new(STRANGER, Role::Client);
    assert_eq!(
        h.coordinator.search(SearchFilter::default(), &stranger).await.unwrap().total,
        0
    );
    assert!(matches!(
        h.coordinator
            .get_asset(photo.blob_id, Namespace::Original, &stranger)
            .await,
        Err(MediaError::Authorization(_))
    ));

    // Revocation takes effect on the next call
    h.metadata.revoke(album.id, CLIENT);
    assert!(matches!(
        h.coordinator
            .get_asset(photo.blob_id, Namespace::Original, &client)
            .await,
        Err(MediaError::Authorization(_))
    ));
}

#[tokio::test]
async fn presigned_urls_are_clamped() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Links", None);
    let photo = h
        .coordinator
        .ingest(
            upload(album.id, "link.jpg", "image/jpeg", jpeg(16, 16)),
            &photographer(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let default = h
        .coordinator
        .presigned_url(photo.blob_id, Namespace::Original, None, &photographer())
        .await
        .unwrap();
    assert_eq!(default.ttl, Duration::from_secs(3600));

    let week = h
        .coordinator
        .presigned_url(
            photo.blob_id,
            Namespace::Thumbnail,
            Some(Duration::from_secs(7 * 24 * 3600)),
            &photographer(),
        )
        .await
        .unwrap();
    assert_eq!(week.ttl, Duration::from_secs(24 * 3600));
    assert!(week.expires_at <= Utc::now() + chrono::Duration::hours(24));

    let zero = h
        .coordinator
        .presigned_url(photo.blob_id, Namespace::Original, Some(Duration::ZERO), &photographer())
        .await;
    assert!(matches!(zero, Err(MediaError::Validation(_))));

    let unknown = h
        .coordinator
        .presigned_url(Uuid::new_v4(), Namespace::Original, None, &photographer())
        .await;
    assert!(matches!(unknown, Err(MediaError::NotFound { .. })));
}

#[tokio::test]
async fn index_outage_never_fails_writes() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Offline", None);
    h.index.set_available(false);

    let photo = h
        .coordinator
        .ingest(
            upload(album.id, "offline.jpg", "image/jpeg", jpeg(16, 16)),
            &photographer(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    h.coordinator.wait_for_index().await;

    let health = h.coordinator.index_health();
    assert!(health.enabled);
    assert_eq!(health.failed_total, 1);
    assert!(health.last_failure_at.is_some());

    assert_ok!(
        h.coordinator
            .get_asset(photo.blob_id, Namespace::Original, &photographer())
            .await
    );
    assert!(matches!(
        h.coordinator.search(SearchFilter::default(), &photographer()).await,
        Err(MediaError::SearchUnavailable(_))
    ));
    assert!(matches!(
        h.coordinator.reindex_album(album.id, &photographer()).await,
        Err(MediaError::Index(_))
    ));

    // Once the index is back a reindex restores the missing document
    h.index.set_available(true);
    assert_eq!(h.coordinator.reindex_album(album.id, &photographer()).await.unwrap(), 1);
    assert!(h.index.document(photo.id).is_some());
}

#[tokio::test]
async fn updates_touch_only_metadata() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Edits", None);
    let photo = h
        .coordinator
        .ingest(
            upload(album.id, "edit.jpg", "image/jpeg", jpeg(16, 16)),
            &photographer(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    h.coordinator.wait_for_index().await;

    let titled = h
        .coordinator
        .update_title(photo.id, Some("  First dance ".to_string()), &photographer())
        .await
        .unwrap();
    assert_eq!(titled.title.as_deref(), Some("First dance"));
    h.coordinator.wait_for_index().await;

    let picked = h
        .coordinator
        .update_state(photo.id, PickRejectState::Pick, &photographer())
        .await
        .unwrap();
    assert_eq!(picked.state, PickRejectState::Pick);
    assert_eq!(picked.title.as_deref(), Some("First dance"));
    assert_eq!(picked.blob_id, photo.blob_id);
    assert_eq!(picked.thumbnail_blob_id, photo.thumbnail_blob_id);

    h.coordinator.wait_for_index().await;
    let doc = h.index.document(photo.id).unwrap();
    assert_eq!(doc.title, "First dance");
    assert_eq!(doc.pick_reject_state, PickRejectState::Pick);

    let missing = h.coordinator.update_rating(9999, 3, &photographer()).await;
    assert!(matches!(missing, Err(MediaError::NotFound { .. })));
}

#[tokio::test]
async fn reindex_clears_documents_of_photos_deleted_during_outage() {
    let h = harness();
    let album = h.metadata.create_album(PHOTOGRAPHER, "Outage", None);
    let cancel = CancellationToken::new();

    let kept = h
        .coordinator
        .ingest(upload(album.id, "kept.jpg", "image/jpeg", jpeg(16, 16)), &photographer(), &cancel)
        .await
        .unwrap();
    let gone = h
        .coordinator
        .ingest(upload(album.id, "gone.jpg", "image/jpeg", jpeg(16, 16)), &photographer(), &cancel)
        .await
        .unwrap();
    h.coordinator.wait_for_index().await;

    h.index.set_available(false);
    assert_ok!(h.coordinator.delete(gone.id, &photographer(), &cancel).await);
    h.coordinator.wait_for_index().await;
    assert_eq!(h.coordinator.index_health().failed_total, 1);

    h.index.set_available(true);
    assert!(h.index.document(gone.id).is_some());

    assert_eq!(h.coordinator.reindex_album(album.id, &photographer()).await.unwrap(), 1);
    assert!(h.index.document(gone.id).is_none());
    assert!(h.index.document(kept.id).is_some());

    let result = h.coordinator.search(SearchFilter::default(), &photographer()).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.photos[0].id, kept.id);
}

/// Object store whose thumbnail writes hang
struct StalledThumbnails(InMemoryObjectStore);

#[async_trait]
impl ObjectStore for StalledThumbnails {
    async fn put(
        &self,
        namespace: Namespace,
        id: Uuid,
        data: Bytes,
        content_type: &str,
    ) -> media_service::Result<()> {
        if namespace == Namespace::Thumbnail {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.0.put(namespace, id, data, content_type).await
    }

    async fn get(&self, namespace: Namespace, id: Uuid) -> media_service::Result<ObjectContent> {
        self.0.get(namespace, id).await
    }

    async fn delete(&self, namespace: Namespace, id: Uuid) -> media_service::Result<()> {
        self.0.delete(namespace, id).await
    }

    async fn exists(&self, namespace: Namespace, id: Uuid) -> media_service::Result<bool> {
        self.0.exists(namespace, id).await
    }

    async fn presign(
        &self,
        namespace: Namespace,
        id: Uuid,
        ttl: Duration,
    ) -> media_service::Result<PresignedUrl> {
        self.0.presign(namespace, id, ttl).await
    }

    async fn list(&self, namespace: Namespace, prefix: &str) -> media_service::Result<Vec<String>> {
        self.0.list(namespace, prefix).await
    }
}

#[tokio::test]
async fn dropped_ingest_leaves_no_orphaned_blobs() {
    let objects = Arc::new(StalledThumbnails(InMemoryObjectStore::default()));
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let coordinator = IngestionCoordinator::builder(objects.clone(), metadata.clone())
        .transcoder(MediaTranscoder::with_thumbnail_size(32))
        .build();
    let album = metadata.create_album(PHOTOGRAPHER, "Timeouts", None);

    let timed_out = tokio::time::timeout(
        Duration::from_millis(500),
        coordinator.ingest(
            upload(album.id, "slow.jpg", "image/jpeg", jpeg(64, 64)),
            &photographer(),
            &CancellationToken::new(),
        ),
    )
    .await;
    assert!(timed_out.is_err());

    // Compensation finishes in the background after the caller gave up
    for _ in 0..200 {
        if objects.0.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(objects.0.is_empty());
    assert_eq!(metadata.photo_count(), 0);
}
