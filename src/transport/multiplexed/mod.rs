//! Transport that shares one authenticated connection through an OpenSSH
//! control socket.
//!
//! The master is started in the background (`-f -N`) and bound to a socket
//! file with a random name. Every command, and every `scp` copy, then opens a
//! lightweight client connection through that socket, so invocations are
//! independent and may run concurrently.

use std::ffi::OsString;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::runner::{CommandOutput, CommandRunner, ProcessCommandRunner, run_cancellable};

use super::context::{ConnectionContext, PreparedCredential, SessionOptions};
use super::ssh_args::{common_options, control_options, render, ssh_port};
use super::transfer::TransferPlan;
use super::{
    CommandResult, TRANSPORT_FAILURE_EXIT_CODE, TransferDirection, TransferReceipt,
    TransportError, log_cleanup_failure,
};

/// Command used to prove the master accepts client connections.
const VERIFY_COMMAND: &str = "true";

/// Status `ssh` exits with when the client itself fails.
const SSH_CLIENT_FAILURE_STATUS: i32 = 255;

/// Connection manager backed by a control socket.
pub struct MultiplexedConnection<R: CommandRunner = ProcessCommandRunner> {
    context: ConnectionContext,
    options: SessionOptions,
    runner: R,
    credential: PreparedCredential,
    control_path: Utf8PathBuf,
    connected: AtomicBool,
}

impl<R: CommandRunner + fmt::Debug> fmt::Debug for MultiplexedConnection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedConnection")
            .field("context", &self.context)
            .field("control_path", &self.control_path)
            .field("connected", &self.is_connected())
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> MultiplexedConnection<R> {
    /// Starts the master connection and verifies it with a trivial command.
    ///
    /// Any failure tears the master down before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the master cannot be started
    /// or does not accept clients, [`TransportError::Credential`] when key
    /// material cannot be staged, and [`TransportError::Cancelled`] when
    /// `cancel` fires.
    pub async fn connect(
        context: ConnectionContext,
        options: SessionOptions,
        runner: R,
        cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        context.validate()?;
        let credential = PreparedCredential::prepare(&context.credential)?;
        let connection = Self {
            control_path: control_socket_path(),
            context,
            options,
            runner,
            credential,
            connected: AtomicBool::new(false),
        };

        match connection.establish(cancel).await {
            Ok(()) => {
                connection.connected.store(true, Ordering::SeqCst);
                info!(
                    target = %connection.context,
                    control_path = %connection.control_path,
                    "multiplexed master connection ready"
                );
                Ok(connection)
            }
            Err(err) => {
                connection.teardown().await;
                Err(err)
            }
        }
    }

    async fn establish(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let master_args = self.master_args();
        debug!(command = %render(&self.options.ssh_bin, &master_args), "starting ssh master");
        let master = run_cancellable(&self.runner, &self.options.ssh_bin, &master_args, cancel).await?;
        if !master.is_success() {
            return Err(self.connect_error("master connection failed", &master));
        }

        let verify_args = self.client_args(VERIFY_COMMAND);
        let verify = run_cancellable(&self.runner, &self.options.ssh_bin, &verify_args, cancel).await?;
        if !verify.is_success() {
            return Err(self.connect_error("control socket verification failed", &verify));
        }
        Ok(())
    }

    fn connect_error(&self, what: &str, output: &CommandOutput) -> TransportError {
        let status = output
            .code
            .map_or_else(|| String::from("signal"), |code| format!("status {code}"));
        let stderr = output.stderr.trim();
        let message = if stderr.is_empty() {
            format!("{what} ({status})")
        } else {
            format!("{what} ({status}): {stderr}")
        };
        TransportError::Connect {
            target: self.context.to_string(),
            message,
        }
    }

    fn base_args(&self) -> Vec<OsString> {
        let mut args = common_options(&self.context, &self.options, &self.credential);
        args.extend(ssh_port(self.context.port));
        args
    }

    fn master_args(&self) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(control_options(&self.control_path, true));
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ControlPersist={}s",
            self.options.control_persist.as_secs().max(1)
        )));
        args.push(OsString::from("-f"));
        args.push(OsString::from("-N"));
        args.push(OsString::from(self.context.destination()));
        args
    }

    fn client_args(&self, command: &str) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(control_options(&self.control_path, false));
        args.push(OsString::from(self.context.destination()));
        args.push(OsString::from(command));
        args
    }

    fn exit_args(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-o"),
            OsString::from(format!("ControlPath={}", self.control_path)),
            OsString::from("-O"),
            OsString::from("exit"),
        ];
        args.extend(ssh_port(self.context.port));
        args.push(OsString::from(self.context.destination()));
        args
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    /// Runs `command` through a fresh client connection.
    ///
    /// Only a client killed by a signal maps to
    /// [`TRANSPORT_FAILURE_EXIT_CODE`]. `ssh` also exits with 255 when the
    /// master is gone and its fallback connection fails, which cannot be told
    /// apart from a remote command exiting 255; inspect
    /// [`CommandResult::stderr`] when that status matters.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] after [`Self::disconnect`],
    /// [`TransportError::Spawn`] when `ssh` cannot start, and
    /// [`TransportError::Cancelled`] when `cancel` fires.
    pub async fn execute(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, TransportError> {
        self.ensure_connected()?;
        let args = self.client_args(command);
        debug!(target = %self.context, command, "executing remote command");
        let output = run_cancellable(&self.runner, &self.options.ssh_bin, &args, cancel).await?;
        let exit_code = output.code.unwrap_or(TRANSPORT_FAILURE_EXIT_CODE);
        if exit_code == SSH_CLIENT_FAILURE_STATUS {
            debug!(
                target = %self.context,
                command,
                stderr = %output.stderr.trim(),
                "status 255 may come from ssh itself rather than the remote command"
            );
        }
        debug!(target = %self.context, command, exit_code, "remote command finished");
        Ok(CommandResult {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Copies `local` to `remote` over the control socket.
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

    /// Copies `remote` to `local` over the control socket.
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
            control_path: Some(&self.control_path),
        }
    }

    /// Asks the master to exit and deletes the socket file.
    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.teardown().await;
        }
    }

    async fn teardown(&self) {
        let args = self.exit_args();
        let exit = tokio::time::timeout(
            self.context.connect_timeout,
            self.runner.run(&self.options.ssh_bin, &args),
        )
        .await;
        match exit {
            Ok(Ok(output)) if output.is_success() => {}
            Ok(Ok(output)) => debug!(
                code = ?output.code,
                stderr = %output.stderr.trim(),
                "ssh master did not acknowledge exit"
            ),
            Ok(Err(err)) => log_cleanup_failure("stop ssh master", &err),
            Err(_) => log_cleanup_failure("stop ssh master", &"timed out"),
        }
        remove_socket(&self.control_path);
    }

    /// Returns `true` between a successful connect and disconnect.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connection the manager was opened with.
    #[must_use]
    pub const fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Location of the control socket.
    #[must_use]
    pub fn control_path(&self) -> &Utf8Path {
        &self.control_path
    }
}

impl<R: CommandRunner> Drop for MultiplexedConnection<R> {
    fn drop(&mut self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            remove_socket(&self.control_path);
        }
    }
}

fn control_socket_path() -> Utf8PathBuf {
    // Unix socket paths are length-limited, so keep the name short.
    let id = Uuid::new_v4().simple().to_string();
    let short: String = id.chars().take(16).collect();
    let name = format!("skiff-{short}.sock");
    match Utf8PathBuf::from_path_buf(std::env::temp_dir()) {
        Ok(dir) => dir.join(name),
        Err(_) => Utf8PathBuf::from("/tmp").join(name),
    }
}

fn remove_socket(path: &Utf8Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => log_cleanup_failure("remove control socket", &err),
    }
}
