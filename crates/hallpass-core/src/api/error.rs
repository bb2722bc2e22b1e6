use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Failure of an admin API call.
#[derive(Error, Debug)]
pub enum ApiError {
    /// 401. By the time a caller sees this, the session guard has logged out.
    #[error("Admin session was rejected, log in again")]
    SessionRejected,

    /// 403: the token is valid but lacks admin rights
    #[error("Not allowed: {0}")]
    Forbidden(String),

    /// 404, typically a contact id that no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    Server { status: StatusCode, message: String },

    #[error("Could not reach the API: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// 2xx with `success: false`
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Error bodies use the `{success, message}` envelope; prefer its message
    /// over the raw body, and the status reason over nothing.
    fn describe(status: StatusCode, body: &str) -> String {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message")?.as_str().map(str::to_string))
            .filter(|m| !m.trim().is_empty());
        match message {
            Some(message) => message,
            None if !body.trim().is_empty() => Self::truncate_body(body.trim()),
            None => status.canonical_reason().unwrap_or("no details").to_string(),
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::SessionRejected,
            403 => ApiError::Forbidden(Self::describe(status, body)),
            404 => ApiError::NotFound(Self::describe(status, body)),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::Server {
                status,
                message: Self::describe(status, body),
            },
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, Self::describe(status, body))),
        }
    }
}

/// Why a login attempt did not produce a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// The server refused the credentials; carries its user-facing message
    #[error("{0}")]
    Rejected(String),

    /// Detail is kept for logs, the display text is meant for the user
    #[error("Network error. Please check your connection and try again.")]
    Network(String),

    #[error("Login succeeded but the server did not return a token")]
    MissingToken,

    #[error("Could not save the session: {0}")]
    Storage(String),
}
