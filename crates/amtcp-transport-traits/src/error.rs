//! Transport error types.

use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur during transport operations.
///
/// Transient conditions (a socket that would block) never surface here; the
/// progress entry points absorb them. What remains is either a signal the
/// caller is expected to retry on ([`NoResource`](Self::NoResource),
/// [`Busy`](Self::Busy)) or a real failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The endpoint has data in flight and cannot accept another send yet.
    ///
    /// Retry after the next transmit progress, or queue a pending request.
    #[error("No resources available: endpoint has data in flight")]
    NoResource,

    /// A pending request was offered to an endpoint that can send right now.
    #[error("Endpoint is idle, send directly instead of queueing")]
    Busy,

    /// The active message id is outside the valid range.
    #[error("Invalid active message id {id} (must be below {max})")]
    InvalidAmId {
        /// The rejected id
        id: u8,
        /// Exclusive upper bound on valid ids
        max: u8,
    },

    /// The payload does not fit into a single frame.
    #[error(
        "Message size ({size} bytes) exceeds maximum allowed ({max} bytes). \
         Raise the configured segment size if this is expected."
    )]
    MessageTooLarge {
        /// The payload size in bytes
        size: usize,
        /// The maximum payload size in bytes
        max: usize,
    },

    /// The transport buffer could not be allocated.
    #[error("Out of memory allocating {size} byte transport buffer")]
    NoMemory {
        /// The requested allocation size
        size: usize,
    },

    /// The remote address could not be reached.
    #[error("Destination unreachable: {0}")]
    Unreachable(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// The endpoint has been torn down.
    #[error("Endpoint is closed")]
    Closed,

    /// The endpoint still holds queued requests and cannot be closed.
    #[error("Cannot close endpoint with {count} queued requests; purge the pending queue first")]
    PendingNotPurged {
        /// Number of requests still queued
        count: usize,
    },

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl TransportError {
    /// Returns `true` for conditions the caller is expected to retry later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NoResource | Self::Busy)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::NoResource.is_retryable());
        assert!(TransportError::Busy.is_retryable());
        assert!(!TransportError::Closed.is_retryable());
        assert!(!TransportError::Io("broken pipe".into()).is_retryable());
    }

    #[test]
    fn test_message_too_large_display() {
        let err = TransportError::MessageTooLarge { size: 100, max: 56 };
        let msg = err.to_string();
        assert!(msg.contains("100 bytes"));
        assert!(msg.contains("56 bytes"));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: TransportError = io.into();
        assert!(matches!(err, TransportError::Io(ref msg) if msg.contains("refused")));
    }
}
