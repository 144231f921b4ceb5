//! Error types and classification.
//!
//! Every failure in a sync cycle maps onto an [`ErrorKind`], which decides
//! whether the retry decorator tries again and whether the loop keeps going.

use std::fmt;
use std::time::Duration;

use crate::config::ConfigError;
use crate::tracker::{Epoch, Slot};

/// Result alias used throughout the crate.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Source or sink did not answer; retry on the next attempt or tick.
    Transient,
    /// Two observations of the same slot disagree.
    Inconsistent,
    /// Upstream data or configuration is impossible.
    Malformed,
    /// The loop cannot continue.
    Irrecoverable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::Inconsistent => "INCONSISTENT",
            ErrorKind::Malformed => "MALFORMED",
            ErrorKind::Irrecoverable => "IRRECOVERABLE",
        }
    }

    /// Returns whether an operation failing with this kind may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("{count} proposer conflict(s) in epoch {epoch}")]
    Conflict { epoch: Epoch, count: usize },

    #[error("slot {slot} is outside epoch {epoch}")]
    SlotOutsideEpoch { slot: Slot, epoch: Epoch },

    #[error("invalid slots per epoch: {0}")]
    InvalidSlotsPerEpoch(u64),

    #[error("expected epoch {expected}, got {actual}")]
    EpochMismatch { expected: Epoch, actual: Epoch },

    #[error("head moved: expected assignments for epoch {expected}, got {actual}")]
    HeadMoved { expected: Epoch, actual: Epoch },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("response of {size} bytes exceeds limit of {limit} bytes")]
    ResponseTooLarge { size: usize, limit: usize },

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Http(e) if e.is_decode() || e.is_builder() => ErrorKind::Malformed,
            // Parse error, invalid request, method not found, invalid params.
            SyncError::Rpc { code, .. } if matches!(*code, -32700 | -32600 | -32601 | -32602) => {
                ErrorKind::Malformed
            }
            SyncError::Http(_)
            | SyncError::Rpc { .. }
            | SyncError::Timeout(_)
            | SyncError::Unavailable(_)
            | SyncError::HeadMoved { .. } => ErrorKind::Transient,
            SyncError::Conflict { .. } => ErrorKind::Inconsistent,
            SyncError::SlotOutsideEpoch { .. }
            | SyncError::InvalidSlotsPerEpoch(_)
            | SyncError::EpochMismatch { .. }
            | SyncError::Decode(_)
            | SyncError::ResponseTooLarge { .. } => ErrorKind::Malformed,
            SyncError::Startup(_) | SyncError::Config(_) => ErrorKind::Irrecoverable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_strings() {
        assert_eq!(ErrorKind::Transient.as_str(), "TRANSIENT");
        assert_eq!(ErrorKind::Inconsistent.as_str(), "INCONSISTENT");
        assert_eq!(ErrorKind::Irrecoverable.to_string(), "IRRECOVERABLE");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(SyncError::Unavailable("beacon node".into()).is_retryable());
        assert!(SyncError::Rpc {
            code: -32000,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!SyncError::Conflict { epoch: 1, count: 1 }.is_retryable());
        assert!(!SyncError::SlotOutsideEpoch { slot: 99, epoch: 1 }.is_retryable());
        assert!(!SyncError::EpochMismatch {
            expected: 2,
            actual: 3
        }
        .is_retryable());
        assert!(!SyncError::Startup("no head".into()).is_retryable());
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            SyncError::Conflict { epoch: 4, count: 2 }.kind(),
            ErrorKind::Inconsistent
        );
        assert_eq!(
            SyncError::ResponseTooLarge { size: 10, limit: 5 }.kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            SyncError::Rpc {
                code: -32601,
                message: "method not found".into()
            }
            .kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            SyncError::HeadMoved {
                expected: 3,
                actual: 4
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            SyncError::Config(ConfigError::ZeroRetries).kind(),
            ErrorKind::Irrecoverable
        );
    }

    #[test]
    fn test_internal_rpc_error_is_retryable() {
        let internal = SyncError::Rpc {
            code: -32603,
            message: "internal error".into(),
        };
        assert_eq!(internal.kind(), ErrorKind::Transient);
        assert!(internal.is_retryable());

        for code in [-32700, -32600, -32601, -32602] {
            let err = SyncError::Rpc {
                code,
                message: String::new(),
            };
            assert_eq!(err.kind(), ErrorKind::Malformed, "code {}", code);
        }
    }
}
