use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::{error, warn};
use serde::Serialize;

use crate::scoring::ScoringError;
use crate::storage::StorageError;

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

/// Errors as the HTTP client sees them.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Model not loaded")]
    Unavailable,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Inference(String),
    #[error("Results file not found")]
    NotFound,
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) | ApiError::Inference(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: self.to_string(),
        })
    }
}

impl From<ScoringError> for ApiError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::Unavailable => ApiError::Unavailable,
            ScoringError::Validation(_) | ScoringError::Batch(_) => {
                warn!("Rejected request: {}", err);
                ApiError::BadRequest(err.to_string())
            }
            ScoringError::Inference(_) => {
                error!("Prediction error: {}", err);
                ApiError::Inference(err.to_string())
            }
            ScoringError::Storage(e) => e.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound,
            StorageError::Io(e) => {
                error!("Results storage failure: {}", e);
                ApiError::Internal("Failed to store results".to_string())
            }
        }
    }
}
