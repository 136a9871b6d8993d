use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Default retry hint handed to callers when the store is slow or unreachable.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(2);

/// A single attempted stage of the query fallback chain, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptedStage {
    pub strategy: String,
    pub outcome: String,
}

impl AttemptedStage {
    pub fn new(strategy: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            outcome: outcome.into(),
        }
    }
}

/// Closed error taxonomy for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Store timed out during {operation} after {}ms", budget.as_millis())]
    StoreTimeout {
        operation: String,
        budget: Duration,
        retry_after: Duration,
    },

    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        retry_after: Duration,
    },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    OversizedPayload {
        size: usize,
        limit: usize,
        hint: String,
    },

    #[error("All {} query stages failed", attempted.len())]
    FallbackChainExhausted { attempted: Vec<AttemptedStage> },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CatalogError {
    pub fn store_timeout(operation: impl Into<String>, budget: Duration) -> Self {
        Self::StoreTimeout {
            operation: operation.into(),
            budget,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn oversized(size: usize, limit: usize, hint: impl Into<String>) -> Self {
        Self::OversizedPayload {
            size,
            limit,
            hint: hint.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Retryable errors come with a suggested delay before the caller tries again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::StoreTimeout { retry_after, .. } | Self::StoreUnavailable { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_after().is_some()
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::OversizedPayload { .. }
        )
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StoreTimeout { .. } | Self::StoreUnavailable { .. } => {
                ErrorCategory::Unavailable
            }
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::OversizedPayload { .. } => ErrorCategory::Oversized,
            Self::FallbackChainExhausted { .. } => ErrorCategory::Exhausted,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreTimeout { .. } => "store_timeout",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::Validation { .. } => "validation_failure",
            Self::NotFound { .. } => "not_found",
            Self::OversizedPayload { .. } => "oversized_payload",
            Self::FallbackChainExhausted { .. } => "fallback_chain_exhausted",
            Self::Json(_) => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Unavailable,
    Validation,
    NotFound,
    Oversized,
    Exhausted,
    Serialization,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Oversized => write!(f, "oversized"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Serialization => write!(f, "serialization"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Convenience result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = CatalogError::store_timeout("aggregate", Duration::from_millis(800));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));
        assert_eq!(err.category(), ErrorCategory::Unavailable);
        assert_eq!(
            err.to_string(),
            "Store timed out during aggregate after 800ms"
        );
    }

    #[test]
    fn test_validation_is_not_retryable() {
        let err = CatalogError::validation("limit", "must be between 1 and 100");
        assert!(!err.is_retryable());
        assert!(err.is_client_error());
        assert_eq!(err.code(), "validation_failure");
        assert_eq!(err.to_string(), "Invalid limit: must be between 1 and 100");
    }

    #[test]
    fn test_exhausted_reports_stage_count() {
        let err = CatalogError::FallbackChainExhausted {
            attempted: vec![
                AttemptedStage::new("aggregate", "timeout"),
                AttemptedStage::new("simplified_scan", "timeout"),
            ],
        };
        assert_eq!(err.to_string(), "All 2 query stages failed");
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Exhausted);
        assert_ne!(
            err.code(),
            CatalogError::store_timeout("x", Duration::ZERO).code()
        );
    }

    #[test]
    fn test_oversized_carries_hint() {
        let err = CatalogError::oversized(20_000_000, 16_777_216, "store images by reference");
        match &err {
            CatalogError::OversizedPayload { hint, .. } => {
                assert_eq!(hint, "store images by reference")
            }
            _ => panic!("expected OversizedPayload"),
        }
        assert!(err.is_client_error());
    }

    #[test]
    fn test_error_categories_display() {
        assert_eq!(ErrorCategory::Unavailable.to_string(), "unavailable");
        assert_eq!(ErrorCategory::NotFound.to_string(), "not_found");
        assert_eq!(ErrorCategory::Exhausted.to_string(), "exhausted");
    }
}
