//! Error types for humboldt.

use thiserror::Error;

/// Result type alias for humboldt operations.
pub type Result<T> = std::result::Result<T, HumboldtError>;

/// Errors that can occur while driving a live session.
#[derive(Error, Debug)]
pub enum HumboldtError {
    /// Transport-level failure: dial errors, resets, unexpected EOF,
    /// and errors reported by the gateway mid-stream. Retryable when a
    /// reconnect policy is configured.
    #[error("connection error: {0}")]
    Connection(String),

    /// The gateway rejected the credentials, or the authentication
    /// handshake did not complete within the configured timeout.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A malformed frame or unsupported wire version. Always fatal to
    /// the current session: the stream cannot be resynchronized.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An invalid subscription request, reported synchronously to the
    /// caller of `subscribe`.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// A failure inside a user-registered callback or stream. Isolated
    /// per sink and never fatal to the session.
    #[error("callback error: {0}")]
    Callback(String),

    /// An operation that is invalid in the session's current state.
    #[error("cannot {operation} while session is {state}")]
    BadState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the session was in.
        state: String,
    },

    /// Invalid client configuration, rejected at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error outside the transport path (e.g. opening an output
    /// stream file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HumboldtError {
    /// Creates a connection error from any displayable cause.
    pub fn connection(cause: impl std::fmt::Display) -> Self {
        Self::Connection(cause.to_string())
    }

    /// Creates a bad-state error for the given operation.
    pub fn bad_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::BadState {
            operation,
            state: state.to_string(),
        }
    }

    /// Returns true if a reconnect policy may retry after this error.
    ///
    /// Only transport-level failures are retryable; authentication and
    /// protocol violations would fail again identically.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }

    /// Returns true if this error ends the current session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Authentication(_) | Self::Protocol(_) | Self::Io(_)
        )
    }
}
