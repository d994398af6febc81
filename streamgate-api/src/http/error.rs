// HTTP error handling

use axum::{
    http::{
        header::{CONTENT_TYPE, RETRY_AFTER},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Seconds for `Retry-After`, set on 429s only
    pub retry_after: Option<u64>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            retry_after: Some(retry_after_secs.max(1)),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, message)
        }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Error mapping for manifest and segment requests.
    ///
    /// Unknown, unavailable and unauthorized all answer 401 so the playback
    /// routes cannot be used to probe which stream ids exist.
    pub fn playback(err: streamgate_core::Error) -> Self {
        use streamgate_core::Error;

        match err {
            Error::NotFound(_) | Error::Unavailable(_) | Error::Unauthorized(_) => {
                Self::unauthorized("Invalid or expired playback token")
            }
            other => other.into(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Rate-limit rejections answer in plain text with Retry-After
        if let Some(retry_after) = self.retry_after {
            return (
                self.status,
                [
                    (RETRY_AFTER, retry_after.to_string()),
                    (CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                ],
                self.message,
            )
                .into_response();
        }

        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert streamgate_core errors to HTTP errors
impl From<streamgate_core::Error> for AppError {
    fn from(err: streamgate_core::Error) -> Self {
        use streamgate_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::Unavailable(msg) => Self::conflict(msg),
            Error::Unauthorized(msg) => Self::unauthorized(msg),
            Error::Forbidden(msg) => Self::forbidden(msg),
            Error::BadGateway(msg) => Self::bad_gateway(msg),
            Error::RateLimited { retry_after_secs } => Self::too_many_requests(
                format!("Rate limit exceeded. Try again in {retry_after_secs} seconds"),
                retry_after_secs,
            ),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Redis(e) => {
                tracing::error!(error = %e, "Redis error");
                Self::internal_server_error("Service temporarily unavailable")
            }
            Error::Serialization(e) => {
                tracing::error!(error = %e, "Serialization error");
                Self::internal_server_error("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                Self::internal_server_error("Internal server error")
            }
        }
    }
}
