use thiserror::Error;

/// Errors surfaced by the ingestion pipeline and its stores
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Object storage failure: {0}")]
    Storage(String),

    #[error("Metadata store failure: {0}")]
    Metadata(String),

    #[error("Search index failure: {0}")]
    Index(String),

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MediaError>;

impl MediaError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        MediaError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::Validation(_) => "VALIDATION_ERROR",
            MediaError::Authorization(_) => "FORBIDDEN",
            MediaError::NotFound { .. } => "NOT_FOUND",
            MediaError::UnsupportedMedia(_) => "UNSUPPORTED_MEDIA",
            MediaError::Storage(_) => "STORAGE_ERROR",
            MediaError::Metadata(_) => "METADATA_ERROR",
            MediaError::Index(_) => "INDEX_ERROR",
            MediaError::SearchUnavailable(_) => "SEARCH_UNAVAILABLE",
            MediaError::Cancelled => "CANCELLED",
        }
    }
}

impl From<sqlx::Error> for MediaError {
    fn from(e: sqlx::Error) -> Self {
        MediaError::Metadata(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = MediaError::not_found("photo", 42);
        assert_eq!(err.to_string(), "photo not found: 42");
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_sqlx_errors_map_to_metadata() {
        let err: MediaError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, MediaError::Metadata(_)));
    }
}
