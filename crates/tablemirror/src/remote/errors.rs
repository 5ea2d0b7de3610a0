use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur when fetching records from the remote.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A filter formula referenced a field the remote does not have.
    ///
    /// Recoverable: callers drop the filter or fall back to a full sync.
    #[error("Unknown field referenced in filter: {message}")]
    UnknownField { message: String },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Authentication required or failed.
    #[error("Authentication failed ({status})")]
    Auth { status: u16 },

    /// Network or connection error.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Response body could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RemoteError {
    /// Create an API error.
    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Check if this error signals schema drift in a filter.
    #[inline]
    pub fn is_unknown_field(&self) -> bool {
        matches!(self, Self::UnknownField { .. })
    }

    /// Check if this error is a rate limit error (retryable).
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl From<HttpError> for RemoteError {
    fn from(err: HttpError) -> Self {
        RemoteError::network(err.to_string())
    }
}

/// Classify a non-2xx response.
///
/// The API reports unknown fields in a filter only through the error body, so
/// a 422 carrying one of the known codes is treated as [`RemoteError::UnknownField`].
/// This is a compatibility shim over the message content.
pub fn classify_error_response(status: u16, body: &str) -> RemoteError {
    match status {
        401 | 403 => RemoteError::Auth { status },
        429 => RemoteError::RateLimited,
        422 if is_unknown_field_body(body) => RemoteError::UnknownField {
            message: body.to_string(),
        },
        _ => RemoteError::api(status, body),
    }
}

/// Codes the API uses when a formula names a missing field.
const UNKNOWN_FIELD_MARKERS: &[&str] = &["UNKNOWN_FIELD_NAME", "Unknown field name"];

fn is_unknown_field_body(body: &str) -> bool {
    UNKNOWN_FIELD_MARKERS
        .iter()
        .any(|marker| body.contains(marker))
}

/// Get a short error message suitable for display.
pub fn short_error_message(err: &RemoteError) -> String {
    match err {
        RemoteError::Api { status, message } => {
            if message.len() > 50 {
                let truncated: String = message.chars().take(47).collect();
                format!("HTTP {}: {}...", status, truncated)
            } else {
                format!("HTTP {}: {}", status, message)
            }
        }
        RemoteError::UnknownField { .. } => "Unknown field in filter".to_string(),
        RemoteError::RateLimited => "Rate limited".to_string(),
        RemoteError::Auth { status } => format!("Authentication failed ({})", status),
        RemoteError::Network { .. } => "Network error".to_string(),
        RemoteError::Json(_) => "JSON parse error".to_string(),
        RemoteError::Config(msg) => format!("Config: {}", msg),
    }
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_field_is_detected_from_422_body() {
        let body = r#"{"error":{"type":"INVALID_FILTER_BY_FORMULA","message":"Unknown field names: published"}}"#;
        let err = classify_error_response(422, body);
        assert!(err.is_unknown_field());

        let body = r#"{"error":{"type":"UNKNOWN_FIELD_NAME","message":"Unknown field name: \"Published\""}}"#;
        assert!(classify_error_response(422, body).is_unknown_field());
    }

    #[test]
    fn test_other_422_is_plain_api_error() {
        let err = classify_error_response(422, r#"{"error":{"type":"INVALID_REQUEST"}}"#);
        assert!(!err.is_unknown_field());
        assert!(matches!(err, RemoteError::Api { status: 422, .. }));
    }

    #[test]
    fn test_unknown_field_marker_ignored_on_other_statuses() {
        let err = classify_error_response(500, "UNKNOWN_FIELD_NAME");
        assert!(!err.is_unknown_field());
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_error_response(429, "").is_rate_limited());
        assert!(matches!(
            classify_error_response(401, ""),
            RemoteError::Auth { status: 401 }
        ));
        assert!(matches!(
            classify_error_response(404, "missing"),
            RemoteError::Api { status: 404, .. }
        ));
    }

    #[test]
    fn test_http_error_maps_to_network() {
        let err: RemoteError = HttpError::Transport("reset".to_string()).into();
        assert!(matches!(err, RemoteError::Network { .. }));
    }

    #[test]
    fn test_short_error_message_truncates() {
        let err = RemoteError::api(500, "x".repeat(80));
        let msg = short_error_message(&err);
        assert!(msg.starts_with("HTTP 500: "));
        assert!(msg.ends_with("..."));

        assert_eq!(short_error_message(&RemoteError::RateLimited), "Rate limited");
    }
}
