//! Error types for the transport module.
//!
//! Every failure a single listing or object request can produce is mapped
//! into [`TransportError`], keeping enough context (path, status) for logs
//! and for the retry classifier.

use thiserror::Error;

/// Errors that can occur while issuing a single request.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the server (DNS, connection refused, reset, TLS).
    #[error("connection error requesting {path}: {source}")]
    Connect {
        /// Endpoint path that failed.
        path: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within its timeout.
    #[error("timeout requesting {path}")]
    Timeout {
        /// Endpoint path that timed out.
        path: String,
    },

    /// Non-2xx HTTP response.
    #[error("HTTP {status} requesting {path}")]
    HttpStatus {
        /// Endpoint path that returned the status.
        path: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server answered 2xx with an empty body.
    #[error("empty response body from {path}")]
    EmptyBody {
        /// Endpoint path that returned nothing.
        path: String,
    },

    /// The body was not valid JSON.
    #[error("malformed response from {path}: {source}")]
    Malformed {
        /// Endpoint path that returned garbage.
        path: String,
        /// The JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The body was valid JSON but not a JSON object.
    #[error("response from {path} is not a JSON object")]
    NotAnObject {
        /// Endpoint path.
        path: String,
    },

    /// The request could not be built (bad URL join, invalid header).
    #[error("invalid request to {path}: {reason}")]
    InvalidRequest {
        /// Endpoint path.
        path: String,
        /// Why the request was rejected before sending.
        reason: String,
    },
}

impl TransportError {
    /// Creates a connection error from a reqwest error.
    pub fn connect(path: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Connect {
            path: path.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(path: impl Into<String>) -> Self {
        Self::Timeout { path: path.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(path: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            path: path.into(),
            status,
        }
    }

    /// Creates an empty-body error.
    pub fn empty_body(path: impl Into<String>) -> Self {
        Self::EmptyBody { path: path.into() }
    }

    /// Creates a malformed-body error.
    pub fn malformed(path: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Malformed {
            path: path.into(),
            source,
        }
    }

    /// Creates a not-an-object error.
    pub fn not_an_object(path: impl Into<String>) -> Self {
        Self::NotAnObject { path: path.into() }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Maps a reqwest send error into the matching variant.
    pub fn from_reqwest(path: impl Into<String>, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(path)
        } else {
            Self::connect(path, error)
        }
    }

    /// Returns the HTTP status when this is a status error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display_includes_status_and_path() {
        let err = TransportError::http_status("/get/object", 503);
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("/get/object"));
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_timeout_display() {
        let err = TransportError::timeout("/get/page");
        assert_eq!(err.to_string(), "timeout requesting /get/page");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_malformed_keeps_source() {
        let source = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err = TransportError::malformed("/get/object", source);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("malformed response from /get/object"));
    }

    #[test]
    fn test_empty_body_and_not_an_object_display() {
        assert_eq!(
            TransportError::empty_body("/x").to_string(),
            "empty response body from /x"
        );
        assert_eq!(
            TransportError::not_an_object("/x").to_string(),
            "response from /x is not a JSON object"
        );
    }
}
