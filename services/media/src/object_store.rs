//! Blob storage seam.
//!
//! Objects live in one of two namespaces and are addressed by the photo's blob
//! id. The same id is used in both namespaces, so a photo's thumbnail is found at
//! `thumbnails/{id}` next to its original at `photos/{id}`.

use crate::error::{MediaError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Namespace (and asset variant) an object belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Original,
    Thumbnail,
}

impl Namespace {
    /// Key prefix inside the bucket
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Original => "photos",
            Namespace::Thumbnail => "thumbnails",
        }
    }

    pub fn object_key(&self, id: Uuid) -> String {
        format!("{}/{}", self.prefix(), id)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Original => f.write_str("original"),
            Namespace::Thumbnail => f.write_str("thumbnail"),
        }
    }
}

impl FromStr for Namespace {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "original" => Ok(Namespace::Original),
            "thumbnail" => Ok(Namespace::Thumbnail),
            other => Err(MediaError::Validation(format!(
                "variant must be 'original' or 'thumbnail', got '{}'",
                other
            ))),
        }
    }
}

/// A readable object
pub struct ObjectContent {
    pub content_type: String,
    pub size: u64,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl ObjectContent {
    /// Wrap an in-memory buffer as a single-chunk stream
    pub fn from_bytes(data: Bytes, content_type: impl Into<String>) -> Self {
        let size = data.len() as u64;
        Self {
            content_type: content_type.into(),
            size,
            body: Box::pin(futures::stream::once(async move { Ok(data) })),
        }
    }

    /// Drain the stream into one buffer
    pub async fn into_bytes(self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size as usize);
        let mut body = self.body;
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for ObjectContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectContent")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Time-limited direct access URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    /// Lifetime actually granted after clamping
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub expires_at: DateTime<Utc>,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_secs())
    }
}

/// Clamp a requested lifetime to `max`. A zero lifetime is rejected.
pub fn clamp_ttl(requested: Duration, max: Duration) -> Result<Duration> {
    if requested.is_zero() {
        return Err(MediaError::Validation(
            "presigned URL lifetime must be positive".to_string(),
        ));
    }
    Ok(requested.min(max))
}

/// Addressable blob storage.
///
/// `put` overwrites and `delete` succeeds for absent objects, so both can be
/// repeated safely.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, namespace: Namespace, id: Uuid, data: Bytes, content_type: &str)
        -> Result<()>;

    /// Fails with `NotFound` when the object is absent
    async fn get(&self, namespace: Namespace, id: Uuid) -> Result<ObjectContent>;

    async fn delete(&self, namespace: Namespace, id: Uuid) -> Result<()>;

    async fn exists(&self, namespace: Namespace, id: Uuid) -> Result<bool>;

    /// Issue a GET URL; `ttl` is clamped to the store's maximum
    async fn presign(&self, namespace: Namespace, id: Uuid, ttl: Duration) -> Result<PresignedUrl>;

    /// Ids stored under `namespace` whose key starts with `prefix`
    async fn list(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>>;
}
