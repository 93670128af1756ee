//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

use super::model::ErrorResponse;
use crate::PoolError;

pub const INVALID_POST_BODY: &str = "Invalid post body";
pub const INVALID_JSON_DATA: &str = "Invalid json data";
pub const URL_NOT_SET: &str = "invalid request, url is not set";
pub const BODY_NOT_BASE64: &str = "invalid request, body must be base64 encoded";

#[derive(Error, Debug)]
pub enum ApiError {
    /// Body too short, not JSON-looking, or malformed
    #[error("{0}")]
    BadRequest(String),

    /// A job failed validation
    #[error("{0}")]
    InvalidJob(&'static str),

    #[error("{0}")]
    Pool(#[from] PoolError),

    /// A batch element failed; earlier elements stay queued
    #[error("{source}")]
    Batch {
        index: usize,
        accepted: usize,
        source: Box<ApiError>,
    },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidJob(_) => StatusCode::BAD_REQUEST,
            ApiError::Pool(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Pool(_) => StatusCode::BAD_REQUEST,
            ApiError::Batch { source, .. } => source.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (index, accepted) = match &self {
            ApiError::Batch { index, accepted, .. } => (Some(*index), Some(*accepted)),
            _ => (None, None),
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            index,
            accepted,
        };

        (status, Json(body)).into_response()
    }
}
