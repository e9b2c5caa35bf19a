//! Error types for vitalsync-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the vitalsync-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller supplied a value outside the accepted domain
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Platform capability is denied, unsupported, or unreachable
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Transport failure or timeout talking to the dashboard
    #[error("network error: {0}")]
    Network(String),

    /// Dashboard answered with a non-2xx status
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// Anything else
    #[error("{0}")]
    Unknown(String),
}

/// Result type alias for vitalsync-core
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes surfaced to sync callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureClass {
    CapabilityUnavailable,
    NetworkError,
    RemoteRejected,
    Unknown,
}

impl FailureClass {
    /// Whether a failure of this class should be queued for a later retry.
    ///
    /// Capability failures need the user to re-grant access first.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::CapabilityUnavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::CapabilityUnavailable => "capability_unavailable",
            FailureClass::NetworkError => "network_error",
            FailureClass::RemoteRejected => "remote_rejected",
            FailureClass::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capability_unavailable" => Some(FailureClass::CapabilityUnavailable),
            "network_error" => Some(FailureClass::NetworkError),
            "remote_rejected" => Some(FailureClass::RemoteRejected),
            "unknown" => Some(FailureClass::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Project this error onto the failure taxonomy shown to sync callers.
    pub fn class(&self) -> FailureClass {
        match self {
            Error::CapabilityUnavailable(_) => FailureClass::CapabilityUnavailable,
            Error::Network(_) => FailureClass::NetworkError,
            Error::RemoteRejected { .. } => FailureClass::RemoteRejected,
            _ => FailureClass::Unknown,
        }
    }

    /// HTTP status for `RemoteRejected`, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RemoteRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Cloneable, serializable projection of an [`Error`] for sync state and callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub class: FailureClass,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<&Error> for SyncFailure {
    fn from(error: &Error) -> Self {
        Self {
            class: error.class(),
            message: error.to_string(),
            status: error.status(),
        }
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            Error::CapabilityUnavailable("denied".into()).class(),
            FailureClass::CapabilityUnavailable
        );
        assert_eq!(
            Error::Network("timeout".into()).class(),
            FailureClass::NetworkError
        );
        assert_eq!(
            Error::RemoteRejected {
                status: 503,
                message: "busy".into()
            }
            .class(),
            FailureClass::RemoteRejected
        );
        assert_eq!(Error::Config("x".into()).class(), FailureClass::Unknown);
    }

    #[test]
    fn test_only_capability_failures_are_not_retryable() {
        assert!(!FailureClass::CapabilityUnavailable.is_retryable());
        assert!(FailureClass::NetworkError.is_retryable());
        assert!(FailureClass::RemoteRejected.is_retryable());
        assert!(FailureClass::Unknown.is_retryable());
    }

    #[test]
    fn test_sync_failure_keeps_status() {
        let err = Error::RemoteRejected {
            status: 502,
            message: "bad gateway".into(),
        };
        let failure = SyncFailure::from(&err);
        assert_eq!(failure.status, Some(502));
        assert_eq!(failure.class, FailureClass::RemoteRejected);
        assert!(failure.message.contains("502"));
    }
}
