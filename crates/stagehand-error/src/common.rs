//! Errors shared by the stagehand crates.

use thiserror::Error;

/// Failure modes that occur in more than one stagehand component.
///
/// Component errors wrap this type with `#[from]` so callers can match on
/// the shared cases (`is_not_found`, `is_timeout`, ...) without knowing
/// which component raised them.
#[derive(Debug, Error)]
pub enum CommonError {
    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Requested record (artifact, deployment, report) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record with the same identity but different content exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Stored bytes no longer match their recorded checksum.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Operation attempted in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Operation exceeded its time limit.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled by the caller.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Unexpected internal failure (poisoned lock, joined task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommonError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new already exists error.
    #[must_use]
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists(resource.into())
    }

    /// Creates a new integrity error.
    #[must_use]
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Creates a new invalid state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a new cancellation error.
    #[must_use]
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is an I/O error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is an integrity error.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    /// Returns true if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if this error should be retried by a step executor.
    ///
    /// I/O failures and timeouts are transient; everything else describes
    /// a condition that another attempt cannot fix.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let common_err: CommonError = io_err.into();
        assert!(common_err.is_io());
        assert!(common_err.is_transient());
        assert!(common_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_not_found_error() {
        let err = CommonError::not_found("artifact 42");
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "not found: artifact 42");
    }

    #[test]
    fn test_integrity_error() {
        let err = CommonError::integrity("checksum mismatch for setup.sh");
        assert!(err.is_integrity());
        assert_eq!(
            err.to_string(),
            "integrity error: checksum mismatch for setup.sh"
        );
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = CommonError::timeout("connect took longer than 30s");
        assert!(err.is_timeout());
        assert!(err.is_transient());
    }

    #[test]
    fn test_cancelled_error() {
        let err = CommonError::cancelled("deployment d-1");
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "cancelled: deployment d-1");
    }
}
