use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domains::DomainError;
use tracing::error;

/// `DomainError` on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DomainError::InvalidTarget(_) | DomainError::UserNotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Unauthorized(_) => StatusCode::FORBIDDEN,
            DomainError::TargetKindMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::ConflictRetryExceeded { .. } | DomainError::RebuildContended { .. } => {
                StatusCode::CONFLICT
            }
            DomainError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            DomainError::Store(err) => {
                error!(error = %err, "store failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
            "retryable": self.0.is_transient(),
        });

        (status, axum::Json(body)).into_response()
    }
}
