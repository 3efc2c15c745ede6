use thiserror::Error;

use crate::retry::Retryable;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - session token is invalid or expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Coarse failure classes the session store acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 401/403: the credential itself was refused.
    AuthRejected,
    /// Network trouble or a non-success status that may clear up.
    Transient,
    /// A success status with a body that does not match the schema.
    Malformed,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            code => ApiError::UnexpectedStatus {
                status: code,
                body: truncated,
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::Unauthorized | ApiError::AccessDenied(_) => FailureKind::AuthRejected,
            ApiError::InvalidResponse(_) => FailureKind::Malformed,
            _ => FailureKind::Transient,
        }
    }

    /// True when the server refused the credential (401 or 403).
    pub fn is_auth_rejection(&self) -> bool {
        self.kind() == FailureKind::AuthRejected
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        !self.is_auth_rejection()
    }
}
