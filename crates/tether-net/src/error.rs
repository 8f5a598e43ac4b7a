//! Errors surfaced to callers of the connection manager.

use std::time::Duration;

use crate::messages::RequestKind;

/// Why a login attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The TCP connection could not be opened.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Configured endpoint.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection was not established in time.
    #[error("timed out connecting to {endpoint} after {timeout:?}")]
    ConnectTimeout {
        /// Configured endpoint.
        endpoint: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// The server closed the connection before acknowledging the login.
    #[error("connection closed before login was acknowledged")]
    Closed,

    /// No acknowledgment arrived in time.
    #[error("no login acknowledgment within {0:?}")]
    NoAcknowledgment(Duration),

    /// The server broke the login exchange; the attempt was abandoned.
    #[error("protocol violation during login: {0}")]
    ProtocolViolation(String),

    /// The manager already holds a logged-in connection.
    #[error("already logged in")]
    AlreadyLoggedIn,

    /// Another login, or an automatic reconnect, is in flight.
    #[error("a login is already in progress")]
    LoginInProgress,

    /// `logout` was called while the login was in flight.
    #[error("login aborted by logout")]
    Aborted,

    /// The login frame could not be serialized.
    #[error("failed to encode login frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a request did not produce a response. Delivered only to the caller
/// whose request failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// No login is active and no reset is in progress.
    #[error("not logged in")]
    NotReady,

    /// No response arrived within the request timeout.
    #[error("no response within the request timeout")]
    Timeout,

    /// The connection was reset while the request was outstanding, or did not
    /// recover in time for the request to be sent.
    #[error("connection reset")]
    ConnectionReset,

    /// The request was discarded by `logout`.
    #[error("request aborted by logout")]
    Aborted,

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// The server broke the protocol while this entry was pending.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The matching reply lacks the fields of the requested kind.
    #[error("reply does not carry a {kind} result")]
    UnexpectedReply {
        /// Kind of the request that was answered.
        kind: RequestKind,
    },

    /// The request could not be recorded.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The request frame could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(String),
}

impl From<RequestError> for LoginError {
    /// Map the failure delivered to the pending login entry.
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::ProtocolViolation(detail) => LoginError::ProtocolViolation(detail),
            RequestError::Closed => LoginError::Closed,
            RequestError::Aborted => LoginError::Aborted,
            other => LoginError::ProtocolViolation(other.to_string()),
        }
    }
}
