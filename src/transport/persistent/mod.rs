//! Transport that drives one long-lived remote shell.
//!
//! `ssh -T` starts the remote shell without a pseudo-terminal and every
//! command is written to its stdin wrapped in the [`framing`] protocol. The
//! whole write-then-drain cycle runs under one async mutex, so at most one
//! command is in flight and frames can never interleave.
//!
//! A command abandoned through cancellation or a read timeout leaves its
//! frame partially read. The channel remembers that, and the next command
//! first drains up to the abandoned frame's end marker.
//!
//! [`framing`]: super::framing

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::runner::{CommandRunner, ProcessCommandRunner};

use super::context::{ConnectionContext, PreparedCredential, SessionOptions};
use super::framing::{END_MARKER, FrameParser, wrap};
use super::ssh_args::{common_options, render, ssh_port};
use super::transfer::TransferPlan;
use super::{CommandResult, TransferDirection, TransferReceipt, TransportError, log_cleanup_failure};

/// Lines of ssh stderr kept for connection diagnostics.
const STDERR_TAIL_LINES: usize = 50;

/// Grace period for the remote shell to exit after `exit` is written.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Time allowed for the stderr drain to finish after a failed start.
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

type StderrTail = Arc<StdMutex<VecDeque<String>>>;

/// Pipes of the running remote shell.
struct Channel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Bytes of a line whose read was interrupted.
    partial: Vec<u8>,
    /// A frame was started but its end marker has not been consumed.
    pending_resync: bool,
    stderr_task: Option<JoinHandle<()>>,
}

impl Channel {
    /// Reads one line, giving up after `read_timeout` or on cancellation.
    ///
    /// Returns `Ok(None)` at end of stream. Interrupted reads keep their
    /// bytes in `partial`, so no output is lost across calls.
    async fn read_line(
        &mut self,
        read_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, TransportError> {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            read = tokio::time::timeout(
                read_timeout,
                self.stdout.read_until(b'\n', &mut self.partial),
            ) => read,
        };
        match read {
            Err(_) => Err(TransportError::ReadTimeout {
                timeout: read_timeout,
            }),
            Ok(Err(err)) => Err(TransportError::Desynchronized {
                message: format!("failed to read from remote shell: {err}"),
            }),
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => {
                let mut bytes = std::mem::take(&mut self.partial);
                if bytes.last() == Some(&b'\n') {
                    bytes.pop();
                }
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let write = async {
            self.stdin.write_all(text.as_bytes()).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        };
        write.await.map_err(|err| TransportError::Desynchronized {
            message: format!("failed to write to remote shell: {err}"),
        })
    }

    /// Consumes lines until the end marker, bounded per read.
    async fn drain_to_end_marker(
        &mut self,
        read_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        loop {
            match self.read_line(read_timeout, cancel).await {
                Ok(Some(line)) if line.trim_end_matches('\r') == END_MARKER => return Ok(()),
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(TransportError::Desynchronized {
                        message: String::from("remote shell closed while resynchronising"),
                    });
                }
                Err(TransportError::ReadTimeout { timeout }) => {
                    return Err(TransportError::Desynchronized {
                        message: format!(
                            "abandoned command produced no end marker within {timeout:?}"
                        ),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn kill(&mut self) {
        if let Err(err) = self.child.kill().await {
            log_cleanup_failure("kill remote shell", &err);
        }
    }
}

/// Session backed by a single remote shell process.
pub struct PersistentSession<R: CommandRunner = ProcessCommandRunner> {
    context: ConnectionContext,
    options: SessionOptions,
    runner: R,
    credential: PreparedCredential,
    channel: Mutex<Option<Channel>>,
    connected: AtomicBool,
    stderr_tail: StderrTail,
}

impl<R: CommandRunner + fmt::Debug> fmt::Debug for PersistentSession<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentSession")
            .field("context", &self.context)
            .field("connected", &self.is_connected())
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> PersistentSession<R> {
    /// Starts `ssh -T <destination> <shell>` and waits for the shell to echo
    /// a readiness marker.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the shell cannot be started
    /// or does not answer within the connect timeout (with whatever the
    /// client printed on stderr), and [`TransportError::Cancelled`] when
    /// `cancel` fires.
    pub async fn connect(
        context: ConnectionContext,
        options: SessionOptions,
        runner: R,
        cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        context.validate()?;
        let credential = PreparedCredential::prepare(&context.credential)?;
        let mut args = vec![OsString::from("-T")];
        args.extend(common_options(&context, &options, &credential));
        args.extend(ssh_port(context.port));
        args.push(OsString::from(context.destination()));
        args.push(OsString::from(options.remote_shell.as_str()));
        let program = options.ssh_bin.clone();
        Self::launch(&program, &args, context, options, runner, credential, cancel).await
    }

    /// Spawns `program` as the shell process and performs the readiness
    /// handshake.
    pub(crate) async fn launch(
        program: &str,
        args: &[OsString],
        context: ConnectionContext,
        options: SessionOptions,
        runner: R,
        credential: PreparedCredential,
        cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        debug!(command = %render(program, args), "starting remote shell");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TransportError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        let pipes_missing = || TransportError::Spawn {
            program: program.to_owned(),
            message: String::from("child pipes were not captured"),
        };
        let stdin = child.stdin.take().ok_or_else(pipes_missing)?;
        let stdout = child.stdout.take().ok_or_else(pipes_missing)?;
        let stderr = child.stderr.take().ok_or_else(pipes_missing)?;

        let stderr_tail = StderrTail::default();
        let stderr_task = tokio::spawn(drain_stderr(stderr, Arc::clone(&stderr_tail)));

        let mut channel = Channel {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            partial: Vec::new(),
            pending_resync: false,
            stderr_task: Some(stderr_task),
        };

        if let Err(err) = await_ready(&mut channel, context.connect_timeout, cancel).await {
            channel.kill().await;
            if let Some(task) = channel.stderr_task.take()
                && tokio::time::timeout(STDERR_FLUSH_TIMEOUT, task).await.is_err()
            {
                debug!("stderr drain still running after failed start");
            }
            return Err(match err {
                TransportError::Cancelled => TransportError::Cancelled,
                other => TransportError::Connect {
                    target: context.to_string(),
                    message: with_stderr(&other.to_string(), &stderr_tail),
                },
            });
        }

        info!(target = %context, "persistent remote shell ready");
        Ok(Self {
            context,
            options,
            runner,
            credential,
            channel: Mutex::new(Some(channel)),
            connected: AtomicBool::new(true),
            stderr_tail,
        })
    }

    /// Runs `command` in the remote shell.
    ///
    /// The command runs in a subshell, so `exit` or `cd` inside it does not
    /// affect later commands. Its stderr is merged into
    /// [`CommandResult::stdout`].
    ///
    /// # Errors
    ///
    /// - [`TransportError::Desynchronized`] when the shell exits or the
    ///   stream breaks before the end marker. The session is unusable
    ///   afterwards.
    /// - [`TransportError::ReadTimeout`] when no output arrives within the
    ///   read timeout. The session stays usable.
    /// - [`TransportError::Cancelled`] when `cancel` fires. The session stays
    ///   usable.
    /// - [`TransportError::NotConnected`] after disconnect or a fatal error.
    pub async fn execute(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, TransportError> {
        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = self.channel.lock() => guard,
        };
        let Some(channel) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let result = self.exchange(channel, command, cancel).await;
        if let Err(err) = &result
            && err.is_fatal()
        {
            self.connected.store(false, Ordering::SeqCst);
            if let Some(mut dead) = guard.take() {
                dead.kill().await;
            }
            warn!(
                target = %self.context,
                error = %err,
                stderr = %self.stderr_diagnostics(),
                "remote shell lost"
            );
        }
        result
    }

    async fn exchange(
        &self,
        channel: &mut Channel,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, TransportError> {
        let read_timeout = self.options.read_timeout;
        if channel.pending_resync {
            debug!(target = %self.context, "draining output of an abandoned command");
            channel.drain_to_end_marker(read_timeout, cancel).await?;
            channel.pending_resync = false;
        }

        debug!(target = %self.context, command, "executing remote command");
        channel.pending_resync = true;
        channel.send(&wrap(command)).await?;

        let mut parser = FrameParser::new();
        loop {
            let Some(line) = channel.read_line(read_timeout, cancel).await? else {
                return Err(TransportError::Desynchronized {
                    message: String::from("remote shell closed before the end marker"),
                });
            };
            if parser.push_line(&line) {
                break;
            }
        }
        channel.pending_resync = false;

        let frame = parser
            .finish()
            .ok_or_else(|| TransportError::Desynchronized {
                message: String::from("frame ended without completing"),
            })?;
        if !frame.exit_code_reported {
            debug!(target = %self.context, command, "exit status missing from frame; assuming 0");
        }
        debug!(target = %self.context, command, exit_code = frame.exit_code, "remote command finished");
        Ok(CommandResult {
            exit_code: frame.exit_code,
            stdout: frame.output,
            stderr: String::new(),
        })
    }

    /// Copies `local` to `remote` with a separate `scp` process.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Transfer`] when `scp` fails.
    pub async fn upload(
        &self,
        local: &Utf8Path,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, TransportError> {
        self.ensure_connected()?;
        self.transfer_plan()
            .run(&self.runner, TransferDirection::Upload, local, remote, cancel)
            .await
    }

    /// Copies `remote` to `local` with a separate `scp` process.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Transfer`] when `scp` fails.
    pub async fn download(
        &self,
        remote: &str,
        local: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, TransportError> {
        self.ensure_connected()?;
        self.transfer_plan()
            .run(&self.runner, TransferDirection::Download, local, remote, cancel)
            .await
    }

    fn transfer_plan(&self) -> TransferPlan<'_> {
        TransferPlan {
            context: &self.context,
            options: &self.options,
            credential: &self.credential,
            control_path: None,
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    /// Asks the shell to exit, killing it if it lingers.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let Some(mut channel) = self.channel.lock().await.take() else {
            return;
        };
        if let Err(err) = channel.send("exit").await {
            debug!(error = %err, "remote shell refused exit request");
        }
        match tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, channel.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "remote shell exited"),
            Ok(Err(err)) => log_cleanup_failure("wait for remote shell", &err),
            Err(_) => {
                debug!("remote shell ignored exit; killing it");
                channel.kill().await;
            }
        }
        if let Some(task) = channel.stderr_task.take() {
            task.abort();
        }
    }

    /// Returns `true` until disconnect or a fatal stream error.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connection the session was opened with.
    #[must_use]
    pub const fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Recent stderr output of the `ssh` client, oldest first.
    #[must_use]
    pub fn stderr_diagnostics(&self) -> String {
        join_tail(&self.stderr_tail)
    }
}

/// Writes the readiness probe and waits for its echo.
async fn await_ready(
    channel: &mut Channel,
    connect_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    channel.send(&format!("printf '%s\\n' '{END_MARKER}'")).await?;
    let deadline = tokio::time::Instant::now() + connect_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(no_marker(connect_timeout));
        }
        match channel.read_line(remaining, cancel).await {
            Ok(Some(line)) if line.trim_end_matches('\r') == END_MARKER => return Ok(()),
            Ok(Some(line)) => debug!(line = %line, "ignoring output before readiness marker"),
            Ok(None) => {
                return Err(TransportError::Desynchronized {
                    message: String::from("remote shell exited before becoming ready"),
                });
            }
            Err(TransportError::ReadTimeout { .. }) => return Err(no_marker(connect_timeout)),
            Err(err) => return Err(err),
        }
    }
}

fn no_marker(connect_timeout: Duration) -> TransportError {
    TransportError::Desynchronized {
        message: format!("remote shell did not answer within {connect_timeout:?}"),
    }
}

async fn drain_stderr(stderr: tokio::process::ChildStderr, tail: StderrTail) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(stderr = %line, "ssh");
                let mut buffer = tail.lock().unwrap_or_else(PoisonError::into_inner);
                if buffer.len() == STDERR_TAIL_LINES {
                    buffer.pop_front();
                }
                buffer.push_back(line);
            }
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "stopped reading ssh stderr");
                break;
            }
        }
    }
}

fn join_tail(tail: &StderrTail) -> String {
    let buffer = tail.lock().unwrap_or_else(PoisonError::into_inner);
    buffer.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
}

fn with_stderr(message: &str, tail: &StderrTail) -> String {
    let stderr = join_tail(tail);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        message.to_owned()
    } else {
        format!("{message}; ssh reported: {trimmed}")
    }
}

#[cfg(test)]
mod tests;
