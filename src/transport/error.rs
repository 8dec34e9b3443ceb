//! Error type shared by both SSH transports.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced while establishing or using a remote session.
///
/// A remote command that exits non-zero is *not* an error: it comes back as
/// an ordinary [`crate::transport::CommandResult`]. Only the must-succeed
/// wrappers turn it into [`TransportError::CommandFailed`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when a local helper process (`ssh`, `scp`) cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the session cannot be established (authentication
    /// rejected, connection refused, handshake timeout). The session is
    /// unusable and must be discarded.
    #[error("failed to connect to {target}: {message}")]
    Connect {
        /// `user@host:port` of the remote end.
        target: String,
        /// Diagnostic text, usually the captured `ssh` stderr.
        message: String,
    },
    /// Raised when the framed output stream ends or stalls before the end
    /// marker of the current command was seen.
    #[error("remote session desynchronised: {message}")]
    Desynchronized {
        /// Description of what went wrong on the stream.
        message: String,
    },
    /// Raised when a single read from the remote shell exceeds its window.
    #[error("no output from remote shell within {timeout:?}")]
    ReadTimeout {
        /// Per-read timeout that elapsed.
        timeout: Duration,
    },
    /// Raised when an operation is attempted on a disconnected session.
    #[error("session is not connected")]
    NotConnected,
    /// Raised when the caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
    /// Raised by must-succeed wrappers when the remote command exits
    /// non-zero.
    #[error("remote command `{command}` exited with status {exit_code}: {output}")]
    CommandFailed {
        /// Command as submitted by the caller.
        command: String,
        /// Exit status reported by the remote shell.
        exit_code: i32,
        /// Captured output, useful for diagnostics.
        output: String,
    },
    /// Raised when a file copy fails.
    #[error("{program} transfer of {source_path} to {destination} failed: {stderr}")]
    Transfer {
        /// Copy program used (`scp`).
        program: String,
        /// Source of the copy.
        source_path: String,
        /// Destination of the copy.
        destination: String,
        /// Stderr captured from the copy program.
        stderr: String,
    },
    /// Raised when credential material cannot be prepared locally.
    #[error("failed to prepare credentials: {0}")]
    Credential(String),
    /// Raised for local I/O errors on the session's pipes.
    #[error("session i/o failed: {0}")]
    Io(String),
}

impl TransportError {
    /// Returns `true` when the error leaves the session unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Desynchronized { .. } | Self::NotConnected | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
