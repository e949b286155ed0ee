use reqwest::StatusCode;
use thiserror::Error;

/// Longest response body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401: the session token is no longer accepted and the user must log in again.
    #[error("Unauthorized - session token rejected")]
    Unauthorized,

    #[error("Rate limited after repeated retries")]
    RateLimited,

    #[error("Request failed with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
            _ => ApiError::Status {
                status,
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            },
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::RateLimited => Some(StatusCode::TOO_MANY_REQUESTS),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(err) => err.status(),
        }
    }
}

/// Whether an error chain was caused by a rejected session token.
pub fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)))
}
