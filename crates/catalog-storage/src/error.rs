//! Storage error types for the document store abstraction layer.

use std::fmt;
use std::time::Duration;

use catalog_core::CatalogError;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested document was not found.
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        /// Collection that was searched.
        collection: String,
        /// The ID of the document that was not found.
        id: String,
    },

    /// Attempted to insert a document whose id already exists.
    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists {
        /// Collection holding the duplicate.
        collection: String,
        /// The duplicated ID.
        id: String,
    },

    /// The query could not be compiled for this backend.
    #[error("Invalid query: {message}")]
    InvalidQuery {
        /// Description of why the query is invalid.
        message: String,
    },

    /// The document exceeds the backend's per-document size limit.
    #[error("Document of {size} bytes exceeds the {limit} byte limit")]
    DocumentTooLarge {
        /// Serialized size of the document.
        size: usize,
        /// Maximum size accepted by the backend.
        limit: usize,
    },

    /// The operation did not complete within its timeout budget.
    #[error("Operation {operation} exceeded its {}ms budget", budget.as_millis())]
    Timeout {
        /// Name of the store operation.
        operation: &'static str,
        /// Budget that was exceeded.
        budget: Duration,
    },

    /// The backend is unreachable or failed while executing.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a new `InvalidQuery` error.
    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: &'static str, budget: Duration) -> Self {
        Self::Timeout { operation, budget }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Transient errors may succeed on a different (cheaper) query strategy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::InvalidQuery { .. } | Self::DocumentTooLarge { .. } => {
                ErrorCategory::Validation
            }
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Unavailable { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Document not found.
    NotFound,
    /// Duplicate id.
    Conflict,
    /// Query or document rejected.
    Validation,
    /// Budget exceeded.
    Timeout,
    /// Infrastructure/connection error.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Timeout => write!(f, "timeout"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Hint attached to oversized documents.
pub const OVERSIZED_HINT: &str =
    "upload media through the media pipeline and store a reference URL instead of inline data";

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { collection, id } => CatalogError::not_found(collection, id),
            StorageError::AlreadyExists { collection, id } => CatalogError::validation(
                "id",
                format!("{collection}/{id} already exists"),
            ),
            StorageError::InvalidQuery { message } => CatalogError::validation("query", message),
            StorageError::DocumentTooLarge { size, limit } => {
                CatalogError::oversized(size, limit, OVERSIZED_HINT)
            }
            StorageError::Timeout { operation, budget } => {
                CatalogError::store_timeout(operation, budget)
            }
            StorageError::Unavailable { message } => CatalogError::store_unavailable(message),
            StorageError::Internal { message } => CatalogError::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found("products", "123");
        assert_eq!(err.to_string(), "Document not found: products/123");

        let err = StorageError::timeout("aggregate", Duration::from_millis(250));
        assert_eq!(err.to_string(), "Operation aggregate exceeded its 250ms budget");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::timeout("find", Duration::from_secs(1)).is_transient());
        assert!(StorageError::unavailable("socket closed").is_transient());
        assert!(!StorageError::invalid_query("bad regex").is_transient());
        assert!(!StorageError::not_found("products", "1").is_transient());
    }

    #[test]
    fn test_conversion_to_catalog_error() {
        let err: CatalogError = StorageError::timeout("aggregate", Duration::from_secs(1)).into();
        assert!(err.is_retryable());

        let err: CatalogError = StorageError::DocumentTooLarge {
            size: 20,
            limit: 10,
        }
        .into();
        match err {
            CatalogError::OversizedPayload { hint, .. } => assert_eq!(hint, OVERSIZED_HINT),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StorageError::not_found("products", "1").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            StorageError::timeout("find", Duration::ZERO).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
