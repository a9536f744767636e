//! Error types for ferrogroup

use thiserror::Error;

/// Result type for process-group operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported to callers of the public API.
///
/// Every failure surfaces as one of two kinds: a structural misuse of the
/// group, or a failure while moving data. Transport-level errors are always
/// wrapped in [`Error::CommunicationFailure`] together with the operation that
/// was being attempted.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller violated a structural precondition of the group
    /// (e.g. point-to-point on a group of size 1, peer rank out of range).
    #[error("Invalid process group: {0}")]
    InvalidProcessGroup(String),

    /// The transport failed while conducting an operation.
    #[error("{group} did not conduct {operation} successfully")]
    CommunicationFailure {
        /// Description of the group the operation ran on
        group: String,
        /// The attempted operation, annotated with peer/root/tag
        operation: String,
        /// Underlying transport error
        source: TransportError,
    },
}

impl Error {
    /// Returns `true` for [`Error::InvalidProcessGroup`].
    pub fn is_invalid_group(&self) -> bool {
        matches!(self, Error::InvalidProcessGroup(_))
    }

    /// Returns `true` for [`Error::CommunicationFailure`].
    pub fn is_communication_failure(&self) -> bool {
        matches!(self, Error::CommunicationFailure { .. })
    }

    /// The transport error behind a communication failure, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Error::CommunicationFailure { source, .. } => Some(source),
            Error::InvalidProcessGroup(_) => None,
        }
    }
}

/// Errors raised by transports and by payload encoding.
///
/// Implementors of [`Transport`](crate::Transport) return these; the public
/// API never exposes them except as the source of a communication failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport was torn down while the operation was pending
    #[error("transport aborted: {0}")]
    Aborted(String),

    /// No matching message arrived within the configured bound
    #[error("timed out after {0:?} waiting for a matching message")]
    Timeout(std::time::Duration),

    /// The peer rank is not part of the transport
    #[error("invalid peer rank {0}")]
    InvalidPeer(i32),

    /// A payload could not be encoded or decoded
    #[error("payload codec error: {0}")]
    Codec(String),

    /// The message carries a different element type than requested
    #[error("datatype mismatch: expected {expected}, message carries {found}")]
    TypeMismatch {
        /// Datatype the receiver asked for
        expected: String,
        /// Datatype recorded in the message
        found: String,
    },

    /// The destination buffer cannot hold the incoming elements
    #[error("output buffer holds {available} elements but {required} are required")]
    Capacity {
        /// Elements that must be stored
        required: usize,
        /// Elements the buffer can hold
        available: usize,
    },

    /// A peer contributed a different number of elements than expected
    #[error("expected {expected} elements but found {found}")]
    LengthMismatch {
        /// Expected element count
        expected: usize,
        /// Element count actually contributed
        found: usize,
    },

    /// Sizes/offsets do not describe a valid partition of the buffer
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// The root process failed and signalled the failure to its peers
    #[error("root process {0} reported a failure")]
    RootFailure(i32),

    /// A member of an operation without a root failed and told its peers
    #[error("process {0} reported a failure")]
    PeerFailure(i32),
}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        TransportError::Codec(err.to_string())
    }
}
