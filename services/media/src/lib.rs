//! Media Service
//!
//! Photo ingestion for the album delivery platform. Uploaded bytes are
//! transcoded to a canonical lossless WebP image with a thumbnail, stored in an
//! S3-compatible bucket, committed as a photo row in PostgreSQL and projected into
//! an Elasticsearch index for search.
//!
//! ## Consistency
//!
//! The three stores fail independently and share no transaction:
//!
//! - **Object storage first**: blobs are written under a fresh id before anything
//!   refers to them.
//! - **Metadata commit last**: the photo row insert is the point at which an
//!   ingest succeeds. Failures or cancellation before it delete the blobs again.
//! - **Search index lags**: documents are pushed from detached tasks and never
//!   roll anything back. Lag and failures are visible through [`IndexHealth`].
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum)
//!       │
//!       ▼
//! ┌──────────────┐     ┌──────────────┐
//! │ Authorization│◀────│ Ingestion    │──────────────┐
//! │ Guard        │     │ Coordinator  │              │ detached
//! └──────────────┘     └──────────────┘              ▼
//!        │               │     │     │        ┌──────────────┐
//!        │               ▼     │     │        │ Search       │
//!        │      ┌────────────┐ │     │        │ Indexer      │
//!        │      │ Transcoder │ │     │        └──────────────┘
//!        │      └────────────┘ │     │          photos index
//!        │                     ▼     ▼
//!        │           ┌──────────┐ ┌──────────────┐
//!        └──────────▶│ Metadata │ │ Object       │
//!                    │ Store    │ │ Store        │
//!                    └──────────┘ └──────────────┘
//!                     PostgreSQL   photos/{id}
//!                                  thumbnails/{id}
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod metadata_store;
pub mod models;
pub mod object_store;
pub mod s3_store;
pub mod search;
pub mod transcoder;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{Action, AuthorizationGuard, Relation};
pub use config::Config;
pub use coordinator::{IngestRequest, IngestionCoordinator, IngestionCoordinatorBuilder, PhotoUpdate};
pub use error::{MediaError, Result};
pub use health::{IndexHealth, IndexHealthSnapshot};
pub use metadata_store::{MetadataStore, PgMetadataStore};
pub use models::{Actor, Album, AlbumGrant, Comment, Photo, PickRejectState, Role, Scalar, ScalarMap, StarRating};
pub use object_store::{Namespace, ObjectContent, ObjectStore, PresignedUrl};
pub use s3_store::S3ObjectStore;
pub use search::{ElasticsearchIndexer, SearchDocument, SearchFilter, SearchIndexer, SearchResult};
pub use transcoder::{MediaTranscoder, TranscodeOutput};
