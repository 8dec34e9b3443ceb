//! Local process execution and the runner abstraction used by the transports.
//!
//! The multiplexed transport and every file copy shell out to the system
//! `ssh`/`scp` binaries. Routing those calls through [`CommandRunner`] keeps
//! the argument construction testable with a scripted double.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::transport::TransportError;

/// Result of running a local helper process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Future returned by [`CommandRunner::run`].
pub type RunnerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, TransportError>> + Send + 'a>>;

/// Abstraction over process execution to support fakes in tests.
///
/// Implementations must be shareable across tasks: the multiplexed transport
/// runs several invocations at once.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Spawn`] if the command cannot be started.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a>;
}

/// Real command runner that spawns processes on the local host.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| TransportError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// Runs `program` through `runner`, abandoning it when `cancel` fires.
///
/// Dropping the in-flight future kills the child for [`ProcessCommandRunner`]
/// because it spawns with `kill_on_drop`.
///
/// # Errors
///
/// Returns [`TransportError::Cancelled`] on cancellation, otherwise whatever
/// the runner returns.
pub async fn run_cancellable<R: CommandRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[OsString],
    cancel: &CancellationToken,
) -> Result<CommandOutput, TransportError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransportError::Cancelled),
        result = runner.run(program, args) => result,
    }
}
