//! Error types for the DokuSuite core.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ingestion, delta sync and reconciliation.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Photo not found (or already tombstoned where a live photo is required)
    #[error("Photo not found: {0}")]
    PhotoNotFound(Uuid),

    /// Location not found
    #[error("Location not found: {0}")]
    LocationNotFound(Uuid),

    /// Order not found
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// Content store unavailable or object missing
    #[error("Storage error: {0}")]
    Storage(String),

    /// Reverse geocoder failed
    #[error("Geocoder error: {0}")]
    Geocoder(String),

    /// External system-of-record feed failed
    #[error("External source error: {0}")]
    ExternalSource(String),

    /// Image could not be decoded or re-encoded
    #[error("Image error: {0}")]
    Image(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Operation exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error belongs to the transient-external class.
    ///
    /// Callers on the geocoding and external-feed paths recover from these by
    /// falling back to "no value" instead of failing the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Geocoder(_)
                | Error::ExternalSource(_)
                | Error::Request(_)
                | Error::Timeout(_)
        )
    }

    /// Whether this error rejects the operation because a referenced entity is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::PhotoNotFound(_)
                | Error::LocationNotFound(_)
                | Error::OrderNotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_photo_not_found() {
        let id = Uuid::nil();
        let err = Error::PhotoNotFound(id);
        assert_eq!(err.to_string(), format!("Photo not found: {}", id));
    }

    #[test]
    fn test_error_display_storage() {
        let err = Error::Storage("bucket unreachable".to_string());
        assert_eq!(err.to_string(), "Storage error: bucket unreachable");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Geocoder("quota".into()).is_transient());
        assert!(Error::Timeout("geocoder".into()).is_transient());
        assert!(Error::ExternalSource("502".into()).is_transient());
        assert!(!Error::PhotoNotFound(Uuid::nil()).is_transient());
        assert!(!Error::InvalidInput("bad".into()).is_transient());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(Error::OrderNotFound(Uuid::nil()).is_not_found());
        assert!(Error::NotFound("ext_ref".into()).is_not_found());
        assert!(!Error::Storage("x".into()).is_not_found());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("I/O error:"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
