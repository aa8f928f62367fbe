//! Error types for wxlink.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Only transports, connectors and the
//! reconnect machinery produce errors: frame decoding reports bad input as
//! `bool`/`Option` results and never fails the caller.

/// The error type for all wxlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, TCP socket, HID device).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (unexpected bytes from a mock or device).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for data from the station.
    ///
    /// On free-running links this is routine: the console only talks when
    /// it has something to say.
    #[error("timeout waiting for data")]
    Timeout,

    /// No connection to the station has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the station was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// Another task is already running the reconnect sequence.
    #[error("reconnect already in progress")]
    ReconnectInProgress,

    /// Every attempt of the bounded reconnect sequence failed.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectFailed {
        /// Number of connection attempts made.
        attempts: u32,
    },

    /// The operation was abandoned because shutdown was requested.
    #[error("cancelled")]
    Cancelled,

    /// A builder or command was given an invalid or incomplete setting.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The configured device does not exist (unplugged, wrong path).
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if the error means the physical link is unusable and
    /// must be torn down and re-established.
    ///
    /// Timeouts are not link failures: a quiet console is a healthy console.
    pub fn is_link_failure(&self) -> bool {
        !matches!(self, Error::Timeout | Error::Cancelled)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
