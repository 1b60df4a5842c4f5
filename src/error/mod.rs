//! Garmin Error Types
//!
//! Tagged error taxonomy for the request pipeline. Transport failures keep their
//! HTTP status and raw body as structured fields instead of being flattened to text.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Root error type for the Garmin integration.
#[derive(Error, Debug)]
pub enum GarminError {
    /// Missing, invalid or expired credential, acquisition failure, or 401/403.
    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        status: Option<u16>,
    },

    /// 4xx / 5xx responses and everything the pipeline did not anticipate.
    #[error("{kind}: {message}")]
    Client {
        kind: ClientErrorKind,
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },

    #[error("Circuit breaker is open")]
    CircuitOpen { retry_after: Option<Duration> },

    #[error("Rate limit exceeded: no permit acquired within {timeout:?}")]
    RateLimitExceeded { timeout: Duration },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl GarminError {
    /// Create an authentication error without an HTTP status.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            status: None,
        }
    }

    /// Create an `Unexpected` client error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Client {
            kind: ClientErrorKind::Unexpected,
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Map a transport-level failure into the error taxonomy.
    ///
    /// 401/403 become `Authentication`, other 4xx `ClientFault`, 5xx `ServerFault`,
    /// and everything else (timeouts, connection failures, decode errors) `Unexpected`.
    pub fn from_transport(error: TransportError) -> Self {
        match error {
            TransportError::Status { status, body } => match status {
                401 | 403 => Self::Authentication {
                    message: format!("Authentication failed: {}", body),
                    status: Some(status),
                },
                400..=499 => Self::Client {
                    kind: ClientErrorKind::ClientFault,
                    message: format!("Client error: {}", body),
                    status: Some(status),
                    body: Some(body),
                },
                500..=599 => Self::Client {
                    kind: ClientErrorKind::ServerFault,
                    message: format!("Server error: {}", body),
                    status: Some(status),
                    body: Some(body),
                },
                _ => Self::Client {
                    kind: ClientErrorKind::Unexpected,
                    message: format!("Unexpected error: HTTP {}", status),
                    status: Some(status),
                    body: Some(body),
                },
            },
            other => Self::unexpected(format!("Unexpected error: {}", other)),
        }
    }

    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "GARMIN_AUTH",
            Self::Client { kind, .. } => match kind {
                ClientErrorKind::ClientFault => "GARMIN_CLIENT_FAULT",
                ClientErrorKind::ServerFault => "GARMIN_SERVER_FAULT",
                ClientErrorKind::Unexpected => "GARMIN_UNEXPECTED",
            },
            Self::CircuitOpen { .. } => "GARMIN_CIRCUIT_OPEN",
            Self::RateLimitExceeded { .. } => "GARMIN_RATE_LIMITED",
            Self::Configuration(_) => "GARMIN_CONFIG",
        }
    }

    /// Check if the retry policy may re-attempt after this error.
    ///
    /// Circuit-open and rate-limit rejections are a policy's terminal decision for
    /// the attempt and stop the retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Client {
                kind: ClientErrorKind::ServerFault | ClientErrorKind::Unexpected,
                ..
            }
        )
    }

    /// Check if the circuit breaker should count this error as a failure.
    pub fn should_circuit_break(&self) -> bool {
        self.is_retryable()
    }

    /// Check if error requires re-authentication.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::Client { status, .. } => *status,
            _ => None,
        }
    }

    /// Client error kind, if this is a `Client` error.
    pub fn client_kind(&self) -> Option<ClientErrorKind> {
        match self {
            Self::Client { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Get user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Authentication { .. } => {
                "Your Garmin session is missing or expired. Please sign in again.".to_string()
            }
            Self::CircuitOpen { .. } => {
                "Garmin Connect is currently unavailable. Please try again later.".to_string()
            }
            Self::RateLimitExceeded { .. } => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            Self::Client {
                kind: ClientErrorKind::ServerFault,
                ..
            } => "Garmin Connect reported a server error. Please try again later.".to_string(),
            _ => "An error occurred while talking to Garmin Connect.".to_string(),
        }
    }
}

/// Classification of non-authentication request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// 4xx other than 401/403.
    ClientFault,
    /// 5xx.
    ServerFault,
    /// Timeouts, connection failures, undecodable bodies.
    Unexpected,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientFault => write!(f, "Client fault"),
            Self::ServerFault => write!(f, "Server fault"),
            Self::Unexpected => write!(f, "Unexpected failure"),
        }
    }
}

/// Transport-boundary error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Invalid response body: {message}")]
    Decode { message: String },

    #[error("Invalid request body: {message}")]
    Encode { message: String },
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },
}

/// Durable token record error.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },

    #[error("Corrupted data: {message}")]
    CorruptedData { message: String },
}

/// Result type for Garmin operations.
pub type GarminResult<T> = Result<T, GarminError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, body: &str) -> GarminError {
        GarminError::from_transport(TransportError::Status {
            status,
            body: body.to_string(),
        })
    }

    #[test]
    fn test_unauthorized_and_forbidden_map_to_authentication() {
        for code in [401, 403] {
            let error = status(code, "denied");
            assert!(error.needs_reauth());
            assert_eq!(error.status(), Some(code));
            assert!(!error.is_retryable());
        }
    }

    #[test]
    fn test_client_and_server_faults() {
        let error = status(404, "missing");
        assert_eq!(error.client_kind(), Some(ClientErrorKind::ClientFault));
        assert!(!error.is_retryable());

        let error = status(503, "down");
        assert_eq!(error.client_kind(), Some(ClientErrorKind::ServerFault));
        assert!(error.is_retryable());
        assert!(error.should_circuit_break());

        match status(502, "bad gateway") {
            GarminError::Client { body, .. } => assert_eq!(body.as_deref(), Some("bad gateway")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_status_transport_errors_are_unexpected() {
        let error = GarminError::from_transport(TransportError::Timeout {
            timeout: Duration::from_secs(30),
        });
        assert_eq!(error.client_kind(), Some(ClientErrorKind::Unexpected));
        assert_eq!(error.status(), None);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_policy_rejections_are_not_retryable() {
        assert!(!GarminError::CircuitOpen { retry_after: None }.is_retryable());
        assert!(!GarminError::RateLimitExceeded {
            timeout: Duration::from_secs(5)
        }
        .is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GarminError::authentication("x").error_code(), "GARMIN_AUTH");
        assert_eq!(status(500, "").error_code(), "GARMIN_SERVER_FAULT");
        assert_eq!(status(400, "").error_code(), "GARMIN_CLIENT_FAULT");
    }
}
