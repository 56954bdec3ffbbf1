//! Error taxonomy.
//!
//! None of these are process-fatal. Connection errors are recovered by an
//! explicit reconnect, session errors by logout and local cleanup, storage
//! errors by falling back to an empty in-memory list. Listener registration
//! before a transport exists and notifications without an owner are not
//! errors at all: they are logged and handled in place.

use thiserror::Error;

/// Transport-level failure of the push channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The handshake did not finish within the connection timeout.
    #[error("handshake timed out after {0} ms")]
    Timeout(u64),
    /// The WebSocket could not be opened or failed mid-stream.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server refused the namespace connect (`44` packet).
    #[error("server rejected connection: {0}")]
    Rejected(String),
    /// The peer sent something that is not valid Engine.IO / Socket.IO.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The link closed before the handshake finished.
    #[error("connection closed during handshake")]
    Closed,
}

/// Failure of an authenticated HTTP call.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server answered 401. The session guard has already run.
    #[error("session invalid: 401 from {url}")]
    Invalid {
        /// URL of the failing request.
        url: String,
    },
    /// Any non-401 unsuccessful status.
    #[error("request to {url} failed with status {status}")]
    Status {
        /// URL of the failing request.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// Network or decoding failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SessionError {
    /// Returns `true` for the 401 case.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// Outcome classification of a failed identity check.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The server does not recognise the session (401).
    #[error("not authenticated")]
    Unauthenticated,
    /// Network trouble or a server error; says nothing about the session.
    #[error("identity check unavailable: {0}")]
    Unavailable(String),
}

/// Persistence failure in a notification storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error.
    #[error("storage I/O error for key {key}: {source}")]
    Io {
        /// Storage key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The persisted blob is not valid JSON for the expected shape.
    #[error("corrupt persisted value for key {key}: {source}")]
    Json {
        /// Storage key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}
