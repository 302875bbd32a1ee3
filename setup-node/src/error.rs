use std::fmt;
use thiserror::Error;

/// Classified failure of a single call to the cluster API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectionReset,
    NotFound,
    NetworkError,
    Aborted,
    Unknown,
    HttpStatus(u16),
}

impl TransportErrorKind {
    /// Transport-level failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionReset | Self::NotFound | Self::NetworkError
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::ConnectionReset => f.write_str("connection reset"),
            Self::NotFound => f.write_str("not found"),
            Self::NetworkError => f.write_str("network error"),
            Self::Aborted => f.write_str("aborted"),
            Self::Unknown => f.write_str("unknown"),
            Self::HttpStatus(code) => write!(f, "HTTP {code}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error ({kind}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::new(TransportErrorKind::Aborted, "request aborted")
    }
}

/// Errors that can occur in the setup backend
#[derive(Error, Debug)]
pub enum SetupError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secret management error
    #[error("Secret error: {0}")]
    Secret(String),

    /// Malformed domain, body or host
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No bearer token supplied
    #[error("Unauthorized")]
    Unauthorized,

    /// Cluster API unreachable after retries
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Cluster API answered a read with a non-2xx status
    #[error("Cluster API returned {status}: {message}")]
    Remote { status: u16, message: String },

    /// Certificate tool failed
    #[error("Failed to generate certificate: {0}")]
    CertificateIssuance(String),

    /// TLS secret could not be created
    #[error("Can not create {prefix} TLS secret in the {namespace} namespace: {message}")]
    SecretCreate {
        prefix: String,
        namespace: String,
        status: u16,
        message: String,
    },

    /// PATCH of a cluster resource rejected or failed
    #[error("Failed to patch {resource}: {message}")]
    PatchFailed {
        resource: String,
        status: u16,
        message: String,
    },

    /// POST of a cluster resource rejected or failed
    #[error("Failed to create {resource}: {message}")]
    CreateFailed {
        resource: String,
        status: u16,
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using SetupError
pub type Result<T> = std::result::Result<T, SetupError>;

impl SetupError {
    /// HTTP status reported to the wizard for this error
    pub fn status_code(&self) -> u16 {
        match self {
            SetupError::InvalidInput(_) => 422,
            SetupError::Unauthorized => 401,
            SetupError::CreateFailed { status, .. } if (400..=599).contains(status) => *status,
            _ => 500,
        }
    }
}

impl From<String> for SetupError {
    fn from(s: String) -> Self {
        SetupError::Other(s)
    }
}

impl From<&str> for SetupError {
    fn from(s: &str) -> Self {
        SetupError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for SetupError {
    fn from(err: serde_json::Error) -> Self {
        SetupError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SetupError::Config("invalid listen address".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid listen address");

        let err = SetupError::PatchFailed {
            resource: "Ingress cluster resource".to_string(),
            status: 409,
            message: "conflict".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to patch Ingress cluster resource: conflict");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(SetupError::InvalidInput("x".into()).status_code(), 422);
        assert_eq!(SetupError::Unauthorized.status_code(), 401);
        assert_eq!(
            SetupError::CreateFailed {
                resource: "nncp".into(),
                status: 409,
                message: String::new()
            }
            .status_code(),
            409
        );
        assert_eq!(
            SetupError::CreateFailed {
                resource: "nncp".into(),
                status: 0,
                message: String::new()
            }
            .status_code(),
            500
        );
        assert_eq!(SetupError::CertificateIssuance("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(TransportErrorKind::Timeout.is_retryable());
        assert!(TransportErrorKind::NetworkError.is_retryable());
        assert!(!TransportErrorKind::Aborted.is_retryable());
        assert!(!TransportErrorKind::HttpStatus(503).is_retryable());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: SetupError = TransportError::aborted().into();
        assert!(matches!(
            err,
            SetupError::Transport(TransportError {
                kind: TransportErrorKind::Aborted,
                ..
            })
        ));
    }
}
