//! Error classification.
//!
//! `classify` maps one raw `TransportError` to a `ClassifiedError` with a
//! closed-set `ErrorCode`, so front-ends can branch on the code instead of
//! parsing messages. It performs no I/O and touches no shared state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::transport::TransportError;

pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please check your connection and try again.";
pub const NETWORK_MESSAGE: &str = "Network error. Please check your internet connection.";
pub const SERVER_MESSAGE: &str = "Server error. Our team has been notified. Please try again later.";
pub const CLIENT_FALLBACK_MESSAGE: &str = "Invalid request. Please check your input.";
pub const GENERIC_MESSAGE: &str = "An error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ErrorCode {
    Timeout,
    NetworkError,
    ServerError,
    ClientError,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::ClientError => "CLIENT_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request, normalized. Built once by `classify`, never mutated.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ClassifiedError {
    message: String,
    code: ErrorCode,
    status: Option<u16>,
    #[source]
    original_error: Arc<TransportError>,
}

impl ClassifiedError {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn original_error(&self) -> &TransportError {
        &self.original_error
    }
}

impl From<TransportError> for ClassifiedError {
    fn from(failure: TransportError) -> Self {
        classify(&Arc::new(failure))
    }
}

/// Classify a transport failure. First matching rule wins:
///
/// 1. timeout -> `TIMEOUT`
/// 2. sent but no response -> `NETWORK_ERROR`
/// 3. status 5xx -> `SERVER_ERROR`
/// 4. status 4xx -> `CLIENT_ERROR`, message from body `message`, then `detail`, then a fallback
/// 5. any other status with a body `message` -> `UNKNOWN` with that message
/// 6. any other status -> `UNKNOWN`, "An error occurred."
/// 7. anything else -> `UNKNOWN` carrying the original error's own message
pub fn classify(failure: &Arc<TransportError>) -> ClassifiedError {
    let (code, message, status) = match failure.as_ref() {
        TransportError::Timeout(_) => (ErrorCode::Timeout, TIMEOUT_MESSAGE.to_string(), None),
        TransportError::NoResponse(_) => {
            (ErrorCode::NetworkError, NETWORK_MESSAGE.to_string(), None)
        }
        TransportError::Status { status, body } => {
            let code = status.as_u16();
            match code {
                500..=599 => (ErrorCode::ServerError, SERVER_MESSAGE.to_string(), Some(code)),
                400..=499 => {
                    let message = body_field(body, "message")
                        .or_else(|| body_field(body, "detail"))
                        .unwrap_or(CLIENT_FALLBACK_MESSAGE);
                    (ErrorCode::ClientError, message.to_string(), Some(code))
                }
                _ => {
                    let message = body_field(body, "message").unwrap_or(GENERIC_MESSAGE);
                    (ErrorCode::Unknown, message.to_string(), Some(code))
                }
            }
        }
        other => (ErrorCode::Unknown, other.to_string(), None),
    };

    ClassifiedError {
        message,
        code,
        status,
        original_error: Arc::clone(failure),
    }
}

/// A non-empty string field of a JSON object body
fn body_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)?.as_str().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    fn status(code: u16, body: Value) -> Arc<TransportError> {
        Arc::new(TransportError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body,
        })
    }

    fn no_response() -> Arc<TransportError> {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        Arc::new(TransportError::NoResponse(Box::new(io)))
    }

    #[test]
    fn test_timeout() {
        let err = classify(&Arc::new(TransportError::Timeout(Duration::from_secs(30))));
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(err.message(), TIMEOUT_MESSAGE);
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_no_response_is_network_error() {
        let err = classify(&no_response());
        assert_eq!(err.code(), ErrorCode::NetworkError);
        assert_eq!(err.message(), NETWORK_MESSAGE);
    }

    #[test]
    fn test_server_errors_hide_backend_message() {
        for code in [500, 502, 503, 599] {
            let err = classify(&status(code, json!({"message": "db exploded"})));
            assert_eq!(err.code(), ErrorCode::ServerError);
            assert_eq!(err.message(), SERVER_MESSAGE);
            assert_eq!(err.status(), Some(code));
        }
    }

    #[test]
    fn test_client_error_message_resolution() {
        let err = classify(&status(422, json!({"message": "Bad email", "detail": "ignored"})));
        assert_eq!(err.code(), ErrorCode::ClientError);
        assert_eq!(err.message(), "Bad email");

        let err = classify(&status(404, json!({"detail": "X not found"})));
        assert_eq!(err.message(), "X not found");
        assert_eq!(err.status(), Some(404));

        let err = classify(&status(400, Value::Null));
        assert_eq!(err.message(), CLIENT_FALLBACK_MESSAGE);
    }

    #[test]
    fn test_client_error_ignores_structured_detail() {
        // Validation errors carry a list in `detail`
        let err = classify(&status(422, json!({"detail": [{"loc": ["body", "email"], "msg": "field required"}]})));
        assert_eq!(err.code(), ErrorCode::ClientError);
        assert_eq!(err.message(), CLIENT_FALLBACK_MESSAGE);
    }

    #[test]
    fn test_unauthorized_is_a_plain_client_error() {
        let err = classify(&status(401, json!({"detail": "Token expired"})));
        assert_eq!(err.code(), ErrorCode::ClientError);
        assert_eq!(err.message(), "Token expired");
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_other_statuses() {
        let err = classify(&status(304, json!({"message": "Not modified upstream"})));
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert_eq!(err.message(), "Not modified upstream");
        assert_eq!(err.status(), Some(304));

        let err = classify(&status(302, json!("<html>moved</html>")));
        assert_eq!(err.message(), GENERIC_MESSAGE);
    }

    #[test]
    fn test_non_transport_failures_pass_through() {
        let decode = serde_json::from_str::<Value>("{").unwrap_err();
        let original = Arc::new(TransportError::Decode(decode));
        let err = classify(&original);
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert_eq!(err.message(), original.to_string());
        assert!(matches!(err.original_error(), TransportError::Decode(_)));
    }

    #[test]
    fn test_classification_is_repeatable() {
        let failures = [
            Arc::new(TransportError::Timeout(Duration::from_millis(10))),
            no_response(),
            status(503, Value::Null),
            status(404, json!({"detail": "gone"})),
            status(301, Value::Null),
            Arc::new(TransportError::UnexpectedBody("missing refreshToken".into())),
        ];
        for failure in &failures {
            let a = classify(failure);
            let b = classify(failure);
            assert_eq!((a.code(), a.message(), a.status()), (b.code(), b.message(), b.status()));
            assert!(Arc::ptr_eq(&a.original_error, failure));
        }
    }

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(serde_json::to_value(ErrorCode::NetworkError).unwrap(), json!("NETWORK_ERROR"));
        assert_eq!(ErrorCode::ClientError.to_string(), "CLIENT_ERROR");
    }
}
