use anyhow::{bail, Context};
use serde::Deserialize;
use std::time::Duration;

/// Smallest part S3 accepts for every part but the last
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Longest lifetime S3 signs a presigned URL for (7 days)
pub const MAX_PRESIGN_TTL_SECS: u64 = 7 * 24 * 3600;

/// Main configuration for the media service.
///
/// Only `s3.bucket` and `database.url` are required; everything else has a
/// default suitable for a local MinIO/Postgres/Elasticsearch setup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Search index configuration
    #[serde(default)]
    pub search: SearchConfig,
    /// Transcoding configuration
    #[serde(default)]
    pub media: MediaConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    pub name: String,
    /// Fallback filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Prometheus exporter port
    pub metrics_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "media-service".to_string(),
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}

/// Bucket holding both the `photos/` and `thumbnails/` namespaces
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL lifetime when the caller does not ask for one
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
    /// Ceiling applied to every requested lifetime, at most 7 days
    #[serde(default = "default_presign_max_ttl_secs")]
    pub presign_max_ttl_secs: u64,
    /// Objects above this size are sent as multipart uploads
    #[serde(default = "default_part_size")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads, raised to the 5MB S3 floor
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

impl S3Config {
    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }

    pub fn presign_max_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_max_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Pool acquire timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Apply `migrations/` on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Elasticsearch cluster holding the photo documents
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// When off, writes skip indexing and queries report unavailable
    pub enabled: bool,
    /// Base URL of the cluster
    pub url: String,
    /// Index holding photo documents
    pub index: String,
    /// Basic auth username
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl SearchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:9200".to_string(),
            index: "photos".to_string(),
            username: None,
            password: None,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Thumbnails fit into a square of this many pixels
    pub thumbnail_size: u32,
    /// Largest accepted upload body
    pub max_upload_bytes: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: 300,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API listen address
    pub host: String,
    /// API listen port
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Empty means any origin
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presign_ttl_secs() -> u64 {
    3600
}

fn default_presign_max_ttl_secs() -> u64 {
    24 * 3600
}

fn default_part_size() -> usize {
    MIN_PART_SIZE_BYTES
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load from `config/media.*`, `/etc/media/media.*` and `MEDIA__` variables,
    /// later sources winning
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::with_name("config/media").required(false))
            .add_source(config::File::with_name("/etc/media/media").required(false))
            // MEDIA__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("MEDIA")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
            .context("Invalid media service configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the stores would only trip over at request time
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3.bucket.trim().is_empty() {
            bail!("s3.bucket must not be empty");
        }
        if self.s3.presign_ttl_secs == 0 {
            bail!("s3.presign_ttl_secs must be positive");
        }
        if self.s3.presign_max_ttl_secs > MAX_PRESIGN_TTL_SECS {
            bail!(
                "s3.presign_max_ttl_secs ({}) exceeds the S3 limit of {} seconds",
                self.s3.presign_max_ttl_secs,
                MAX_PRESIGN_TTL_SECS
            );
        }
        if self.s3.presign_ttl_secs > self.s3.presign_max_ttl_secs {
            bail!(
                "s3.presign_ttl_secs ({}) exceeds s3.presign_max_ttl_secs ({})",
                self.s3.presign_ttl_secs,
                self.s3.presign_max_ttl_secs
            );
        }
        if self.media.thumbnail_size == 0 {
            bail!("media.thumbnail_size must be positive");
        }
        if self.media.max_upload_bytes == 0 {
            bail!("media.max_upload_bytes must be positive");
        }
        if self.database.min_connections > self.database.max_connections {
            bail!("database.min_connections exceeds database.max_connections");
        }
        Ok(())
    }
}
