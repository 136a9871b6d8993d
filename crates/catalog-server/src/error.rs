//! HTTP mapping of the catalog error taxonomy.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use catalog_core::CatalogError;
use catalog_query::ListParamsError;
use catalog_storage::StorageError;
use serde_json::{Map, Value, json};

/// Error returned by every API handler.
#[derive(Debug)]
pub struct ApiError(pub CatalogError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            CatalogError::StoreTimeout { .. } | CatalogError::StoreUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CatalogError::Validation { .. } => StatusCode::BAD_REQUEST,
            CatalogError::NotFound { .. } => StatusCode::NOT_FOUND,
            CatalogError::OversizedPayload { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CatalogError::FallbackChainExhausted { .. } => StatusCode::BAD_GATEWAY,
            CatalogError::Json(_) | CatalogError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Seconds for the `Retry-After` header, rounded up and at least one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.0.retry_after().map(|d| {
            let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
            secs.max(1)
        })
    }

    fn body(&self) -> Value {
        let mut error = Map::new();
        error.insert("code".into(), json!(self.0.code()));
        error.insert("message".into(), json!(self.0.to_string()));
        if let Some(secs) = self.retry_after_secs() {
            error.insert("retryAfterSecs".into(), json!(secs));
        }
        match &self.0 {
            CatalogError::OversizedPayload { hint, .. } => {
                error.insert("hint".into(), json!(hint));
            }
            CatalogError::FallbackChainExhausted { attempted } => {
                error.insert("attemptedStages".into(), json!(attempted));
            }
            CatalogError::Validation { field, .. } => {
                error.insert("field".into(), json!(field));
            }
            _ => {}
        }
        json!({ "error": error })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        Self(err)
    }
}

impl From<ListParamsError> for ApiError {
    fn from(err: ListParamsError) -> Self {
        Self(err.into())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(
                code = self.0.code(),
                category = %self.0.category(),
                error = %self.0,
                "Request failed"
            );
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "Request rejected");
        }

        let mut response = (status, Json(self.body())).into_response();
        if let Some(secs) = self.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
