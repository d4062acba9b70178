use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use thiserror::Error;

use super::models::MessageResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("No configs provided")]
    EmptyBatch,
    #[error("All configs are duplicates")]
    AllDuplicates,
    #[error("Refresh in progress, retry later")]
    RefreshInProgress,
    #[error("invalid or missing API key")]
    Unauthorized,
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("failed to submit task: {0}")]
    SubmitFailed(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) | ApiError::EmptyBatch | ApiError::AllDuplicates => {
                StatusCode::BAD_REQUEST
            }
            ApiError::RefreshInProgress => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CacheUnavailable(_) | ApiError::SubmitFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = MessageResponse { status: status.as_u16(), message: self.to_string() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::AllDuplicates.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::RefreshInProgress.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::JobNotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::CacheUnavailable("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn duplicate_message_is_stable() {
        // Clients match on this string.
        assert_eq!(ApiError::AllDuplicates.to_string(), "All configs are duplicates");
    }
}
