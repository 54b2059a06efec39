use crate::config::{S3Config, MIN_PART_SIZE_BYTES};
use crate::error::{MediaError, Result};
use crate::object_store::{clamp_ttl, Namespace, ObjectContent, ObjectStore, PresignedUrl};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// S3-compatible object store (AWS, MinIO, LocalStack)
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
    max_presign_ttl: Duration,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes.max(MIN_PART_SIZE_BYTES),
            max_presign_ttl: config.presign_max_ttl(),
        })
    }

    /// Create the bucket if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) => {
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(|e| storage_error("create bucket", e))?;
                info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            Err(e) => Err(storage_error("check bucket", e)),
        }
    }

    /// Single-part upload for small objects
    async fn simple_upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| storage_error("upload object", e))?;

        Ok(())
    }

    /// Multipart upload for large objects. A failed upload is aborted so no
    /// partial object or dangling parts remain.
    async fn multipart_upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| storage_error("create multipart upload", e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| MediaError::Storage("No upload ID in response".to_string()))?
            .to_string();

        match self.upload_and_complete(key, &upload_id, data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key = %key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_and_complete(&self, key: &str, upload_id: &str, data: Bytes) -> Result<()> {
        let parts = self.upload_parts(key, upload_id, data).await?;
        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| storage_error("complete multipart upload", e))?;
        Ok(())
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        data: Bytes,
    ) -> Result<Vec<CompletedPart>> {
        let mut completed_parts = Vec::new();
        let mut part_number = 1;
        let mut offset = 0;

        while offset < data.len() {
            let end = (offset + self.part_size_bytes).min(data.len());
            let chunk = data.slice(offset..end);

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| storage_error("upload part", e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );

            part_number += 1;
            offset = end;
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn put(
        &self,
        namespace: Namespace,
        id: Uuid,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let key = namespace.object_key(id);

        if data.len() > self.multipart_threshold_bytes {
            self.multipart_upload(&key, data, content_type).await?;
        } else {
            self.simple_upload(&key, data, content_type).await?;
        }

        debug!(key = %key, "Object stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, namespace: Namespace, id: Uuid) -> Result<ObjectContent> {
        let key = namespace.object_key(id);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false) => {
                return Err(MediaError::not_found("object", key));
            }
            Err(e) => return Err(storage_error("get object", e)),
        };

        let content_type = output
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let size = output.content_length().unwrap_or(0).max(0) as u64;

        let body = futures::stream::try_unfold(output.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(MediaError::Storage(format!("Failed to read object body: {}", e))),
            }
        });

        Ok(ObjectContent {
            content_type,
            size,
            body: Box::pin(body),
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, namespace: Namespace, id: Uuid) -> Result<()> {
        let key = namespace.object_key(id);

        // S3 answers 204 for absent keys as well
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| storage_error("delete object", e))?;

        debug!(key = %key, "Object deleted");
        Ok(())
    }

    async fn exists(&self, namespace: Namespace, id: Uuid) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(namespace.object_key(id))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(storage_error("check object existence", e))
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn presign(&self, namespace: Namespace, id: Uuid, ttl: Duration) -> Result<PresignedUrl> {
        let ttl = clamp_ttl(ttl, self.max_presign_ttl)?;

        let presigning_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| MediaError::Validation(format!("Invalid presign lifetime: {}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(namespace.object_key(id))
            .presigned(presigning_config)
            .await
            .map_err(|e| storage_error("generate presigned URL", e))?;

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            ttl,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64),
        })
    }

    #[instrument(skip(self))]
    async fn list(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>> {
        let namespace_prefix = format!("{}/", namespace.prefix());
        let mut ids = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(format!("{}{}", namespace_prefix, prefix))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| storage_error("list objects", e))?;

            ids.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter_map(|key| key.strip_prefix(&namespace_prefix))
                    .map(String::from),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(ids)
    }
}

fn storage_error(action: &str, e: impl std::fmt::Display) -> MediaError {
    MediaError::Storage(format!("Failed to {}: {}", action, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> S3Config {
        S3Config {
            bucket: "test-bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("http://localhost:9000".to_string()),
            force_path_style: true,
            presign_ttl_secs: 3600,
            presign_max_ttl_secs: 86400,
            multipart_threshold_bytes: 5 * 1024 * 1024,
            part_size_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn test_part_size_has_s3_floor() {
        let store = S3ObjectStore::new(&test_config()).await.unwrap();
        assert_eq!(store.part_size_bytes, MIN_PART_SIZE_BYTES);
        assert_eq!(store.max_presign_ttl, Duration::from_secs(86400));
    }

    type RequestLog = std::sync::Arc<parking_lot::Mutex<Vec<String>>>;

    /// Bucket endpoint that accepts parts but rejects the completion request
    async fn rejecting_completion(
        axum::extract::State(log): axum::extract::State<RequestLog>,
        method: axum::http::Method,
        axum::extract::RawQuery(query): axum::extract::RawQuery,
    ) -> axum::response::Response {
        use axum::http::{header, StatusCode};
        use axum::response::IntoResponse;

        let query = query.unwrap_or_default();
        log.lock().push(format!("{} {}", method, query));

        let xml = [(header::CONTENT_TYPE, "application/xml")];
        if method == axum::http::Method::POST && query.contains("uploads") {
            (
                xml,
                "<InitiateMultipartUploadResult><Bucket>test-bucket</Bucket>\
                 <Key>photos/x</Key><UploadId>upload-1</UploadId></InitiateMultipartUploadResult>",
            )
                .into_response()
        } else if method == axum::http::Method::PUT && query.contains("partNumber") {
            [(header::ETAG, "\"etag-1\"")].into_response()
        } else if method == axum::http::Method::POST && query.contains("uploadId") {
            (
                StatusCode::BAD_REQUEST,
                xml,
                "<Error><Code>InvalidPart</Code><Message>part missing</Message></Error>",
            )
                .into_response()
        } else if method == axum::http::Method::DELETE {
            StatusCode::NO_CONTENT.into_response()
        } else {
            StatusCode::NOT_FOUND.into_response()
        }
    }

    #[tokio::test]
    async fn test_failed_completion_aborts_multipart_upload() {
        let log = RequestLog::default();
        let app = axum::Router::new()
            .fallback(rejecting_completion)
            .with_state(log.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                "test", "test", None, None, "static",
            ))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();
        let store = S3ObjectStore {
            client: S3Client::from_conf(s3_config),
            bucket: "test-bucket".to_string(),
            multipart_threshold_bytes: 4,
            part_size_bytes: MIN_PART_SIZE_BYTES,
            max_presign_ttl: Duration::from_secs(3600),
        };

        let result = store
            .put(Namespace::Original, Uuid::new_v4(), Bytes::from_static(b"0123456789"), "image/webp")
            .await;

        assert!(matches!(result, Err(MediaError::Storage(_))));
        let log = log.lock();
        assert!(log.iter().any(|r| r.starts_with("PUT") && r.contains("partNumber=1")));
        assert!(log.iter().any(|r| r.starts_with("DELETE") && r.contains("uploadId=upload-1")));
    }

    #[test]
    fn test_storage_error_message() {
        let err = storage_error("upload object", "connection reset");
        assert_eq!(
            err.to_string(),
            "Object storage failure: Failed to upload object: connection reset"
        );
    }
}
