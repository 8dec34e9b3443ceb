//! Remote command execution and file transfer over the system OpenSSH client.
//!
//! Two transports implement the same contract:
//!
//! - [`MultiplexedConnection`] keeps one authenticated master connection
//!   behind a control socket and runs every command as an independent
//!   client invocation, so commands may overlap.
//! - [`PersistentSession`] drives one long-lived remote shell and serialises
//!   commands through its pipes with the [`framing`] protocol.
//!
//! [`Session`] picks one of them once, when it is opened, and delegates every
//! call to it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::runner::{CommandRunner, ProcessCommandRunner};

mod context;
mod error;
pub mod framing;
mod multiplexed;
mod persistent;
mod selector;
mod ssh_args;
mod transfer;

pub use context::{
    ConnectionContext, Credential, DEFAULT_CONNECT_TIMEOUT, DEFAULT_CONTROL_PERSIST,
    DEFAULT_READ_TIMEOUT, DEFAULT_SSH_PORT, SessionOptions,
};
pub use error::TransportError;
pub use multiplexed::MultiplexedConnection;
pub use persistent::PersistentSession;
pub use selector::{ParseTransportError, TransportKind, TransportPreference, select_transport};
pub use ssh_args::expand_tilde;

/// Exit code reported when the transport failed before the remote command
/// produced a status (for example, the client was killed by a signal).
pub const TRANSPORT_FAILURE_EXIT_CODE: i32 = -1;

/// Outcome of one remote command.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CommandResult {
    /// Remote exit status, or [`TRANSPORT_FAILURE_EXIT_CODE`].
    pub exit_code: i32,
    /// Standard output. The persistent transport merges stderr into it.
    pub stdout: String,
    /// Standard error; always empty on the persistent transport.
    pub stderr: String,
}

impl CommandResult {
    /// Returns `true` when the remote command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout followed by stderr, for diagnostics.
    #[must_use]
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            (out, "") => out.to_owned(),
            ("", err) => err.to_owned(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Direction of a file copy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Local to remote.
    Upload,
    /// Remote to local.
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Download => "download",
        })
    }
}

/// Confirmation of a completed file copy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TransferReceipt {
    /// Which way the copy went.
    pub direction: TransferDirection,
    /// Path on the local machine.
    pub local: Utf8PathBuf,
    /// Path on the remote host.
    pub remote: String,
}

/// Future returned by [`RemoteExecutor::execute`].
pub type ExecFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandResult, TransportError>> + Send + 'a>>;

/// Anything that can run a shell command on the remote host.
///
/// The compose collector, health monitor and log inspector depend on this
/// trait rather than on [`Session`] so they can be driven by scripted output.
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` through the remote shell.
    ///
    /// A non-zero remote exit status is returned as data, not as an error.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the command could not be delivered
    /// or its result could not be recovered.
    fn execute<'a>(&'a self, command: &'a str, cancel: &'a CancellationToken) -> ExecFuture<'a>;
}

/// An open connection to one remote host, backed by exactly one transport.
#[derive(Debug)]
pub enum Session<R: CommandRunner = ProcessCommandRunner> {
    /// Control-socket multiplexing.
    Multiplexed(MultiplexedConnection<R>),
    /// Single long-lived remote shell.
    Persistent(PersistentSession<R>),
}

impl Session<ProcessCommandRunner> {
    /// Opens a session using the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the host cannot be reached or
    /// rejects authentication, and [`TransportError::Cancelled`] when
    /// `cancel` fires first.
    pub async fn open(
        context: ConnectionContext,
        options: SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        Self::open_with_runner(context, options, ProcessCommandRunner, cancel).await
    }

    /// Opens a session, runs `body` against it, and disconnects afterwards
    /// whether `body` succeeded or not.
    ///
    /// Dropping the returned future early still releases local resources:
    /// the multiplexed socket file is removed and the persistent shell is
    /// killed.
    ///
    /// # Errors
    ///
    /// Returns the connection error, or whatever `body` returns.
    pub async fn scoped<T, E, F>(
        context: ConnectionContext,
        options: SessionOptions,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<T, E>
    where
        F: AsyncFnOnce(&Self) -> Result<T, E>,
        E: From<TransportError>,
    {
        let session = Self::open(context, options, cancel).await?;
        let outcome = body(&session).await;
        session.disconnect().await;
        outcome
    }
}

impl<R: CommandRunner> Session<R> {
    /// Opens a session whose `ssh`/`scp` invocations go through `runner`.
    ///
    /// The transport is chosen from `options.transport` and the local
    /// operating system; the choice is fixed for the life of the session.
    ///
    /// # Errors
    ///
    /// See [`Session::open`].
    pub async fn open_with_runner(
        context: ConnectionContext,
        options: SessionOptions,
        runner: R,
        cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        let kind = select_transport(options.transport, std::env::consts::OS);
        info!(target = %context, transport = %kind, "opening remote session");
        match kind {
            TransportKind::Multiplexed => {
                MultiplexedConnection::connect(context, options, runner, cancel)
                    .await
                    .map(Self::Multiplexed)
            }
            TransportKind::Persistent => PersistentSession::connect(context, options, runner, cancel)
                .await
                .map(Self::Persistent),
        }
    }

    /// Transport backing this session.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Multiplexed(_) => TransportKind::Multiplexed,
            Self::Persistent(_) => TransportKind::Persistent,
        }
    }

    /// Connection the session was opened with.
    #[must_use]
    pub const fn context(&self) -> &ConnectionContext {
        match self {
            Self::Multiplexed(conn) => conn.context(),
            Self::Persistent(shell) => shell.context(),
        }
    }

    /// Returns `true` until the session is disconnected or hits a fatal
    /// error.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match self {
            Self::Multiplexed(conn) => conn.is_connected(),
            Self::Persistent(shell) => shell.is_connected(),
        }
    }

    /// Runs `command` remotely.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the transport fails; a remote
    /// non-zero exit is returned as an ordinary [`CommandResult`].
    pub async fn execute(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, TransportError> {
        match self {
            Self::Multiplexed(conn) => conn.execute(command, cancel).await,
            Self::Persistent(shell) => shell.execute(command, cancel).await,
        }
    }

    /// Runs `command` remotely and requires it to exit with status zero.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailed`] for a non-zero exit, plus
    /// everything [`Session::execute`] can return.
    pub async fn execute_checked(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, TransportError> {
        let result = self.execute(command, cancel).await?;
        if result.is_success() {
            return Ok(result);
        }
        Err(TransportError::CommandFailed {
            command: command.to_owned(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }

    /// Copies `local` (file or directory) to `remote`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Transfer`] when the copy fails.
    pub async fn upload(
        &self,
        local: &Utf8Path,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, TransportError> {
        match self {
            Self::Multiplexed(conn) => conn.upload(local, remote, cancel).await,
            Self::Persistent(shell) => shell.upload(local, remote, cancel).await,
        }
    }

    /// Copies `remote` (file or directory) to `local`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Transfer`] when the copy fails.
    pub async fn download(
        &self,
        remote: &str,
        local: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, TransportError> {
        match self {
            Self::Multiplexed(conn) => conn.download(remote, local, cancel).await,
            Self::Persistent(shell) => shell.download(remote, local, cancel).await,
        }
    }

    /// Tears the session down. Failures are logged, never returned.
    pub async fn disconnect(&self) {
        if !self.is_connected() {
            return;
        }
        match self {
            Self::Multiplexed(conn) => conn.disconnect().await,
            Self::Persistent(shell) => shell.disconnect().await,
        }
        info!(target = %self.context(), "remote session closed");
    }
}

impl<R: CommandRunner> RemoteExecutor for Session<R> {
    fn execute<'a>(&'a self, command: &'a str, cancel: &'a CancellationToken) -> ExecFuture<'a> {
        Box::pin(Self::execute(self, command, cancel))
    }
}

/// Logs `error` as a best-effort cleanup failure.
pub(crate) fn log_cleanup_failure(step: &str, error: &dyn fmt::Display) {
    warn!(step, error = %error, "cleanup step failed");
}
