//! Command-line interface definitions for the `skiff` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! must not depend on the library crate.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `skiff` binary.
#[derive(Debug, Parser)]
#[command(
    name = "skiff",
    about = "Run commands, copy files, and watch Docker Compose health on a remote host over SSH",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) connection: ConnectionArgs,
    /// Increase log verbosity (repeat for more detail). `SKIFF_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Connection overrides applied on top of `skiff.toml` and `SKIFF_SSH_*`.
#[derive(Debug, Default, Args)]
pub(crate) struct ConnectionArgs {
    /// Remote host name or address.
    #[arg(long, global = true, value_name = "HOST")]
    pub(crate) host: Option<String>,
    /// Remote user.
    #[arg(long, global = true, value_name = "USER")]
    pub(crate) user: Option<String>,
    /// SSH port.
    #[arg(long, global = true, value_name = "PORT")]
    pub(crate) port: Option<u16>,
    /// Private key file used to authenticate.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) identity_file: Option<String>,
    /// Transport: auto, multiplexed, or persistent.
    #[arg(long, global = true, value_name = "KIND")]
    pub(crate) transport: Option<String>,
}

/// Compose project overrides applied on top of `SKIFF_MONITOR_*`.
#[derive(Debug, Default, Args)]
pub(crate) struct ComposeArgs {
    /// Remote directory holding the compose project.
    #[arg(long, value_name = "DIR")]
    pub(crate) project_dir: Option<String>,
    /// Compose project name.
    #[arg(short = 'p', long, value_name = "NAME")]
    pub(crate) project_name: Option<String>,
    /// Compose file; repeat for overlays.
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub(crate) files: Vec<String>,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Run a shell command remotely and exit with its status.
    #[command(name = "exec")]
    Exec(ExecCommand),
    /// Copy a local file or directory to the remote host.
    #[command(name = "upload")]
    Upload(UploadCommand),
    /// Copy a remote file or directory to the local machine.
    #[command(name = "download")]
    Download(DownloadCommand),
    /// Print a one-off compose status snapshot.
    #[command(name = "status")]
    Status(StatusCommand),
    /// Poll compose status until every service settles.
    #[command(name = "wait")]
    Wait(WaitCommand),
    /// Print recent log lines of one service.
    #[command(name = "logs")]
    Logs(LogsCommand),
    /// Wait for a start-up token to appear in a service's logs.
    #[command(name = "token")]
    Token(TokenCommand),
}

/// Arguments for `skiff exec`.
#[derive(Debug, Parser)]
pub(crate) struct ExecCommand {
    /// Command to execute on the remote host (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for `skiff upload`.
#[derive(Debug, Parser)]
pub(crate) struct UploadCommand {
    /// Local source path.
    pub(crate) local: String,
    /// Remote destination path.
    pub(crate) remote: String,
}

/// Arguments for `skiff download`.
#[derive(Debug, Parser)]
pub(crate) struct DownloadCommand {
    /// Remote source path.
    pub(crate) remote: String,
    /// Local destination path.
    pub(crate) local: String,
}

/// Arguments for `skiff status`.
#[derive(Debug, Parser)]
pub(crate) struct StatusCommand {
    #[command(flatten)]
    pub(crate) compose: ComposeArgs,
    /// Print the status as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Arguments for `skiff wait`.
#[derive(Debug, Parser)]
pub(crate) struct WaitCommand {
    #[command(flatten)]
    pub(crate) compose: ComposeArgs,
    /// Seconds between polls.
    #[arg(long, value_name = "SECS")]
    pub(crate) poll_interval: Option<u64>,
    /// Seconds before unsettled services count as timed out.
    #[arg(long, value_name = "SECS")]
    pub(crate) max_wait: Option<u64>,
    /// Print the final report as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Arguments for `skiff logs`.
#[derive(Debug, Parser)]
pub(crate) struct LogsCommand {
    #[command(flatten)]
    pub(crate) compose: ComposeArgs,
    /// Number of lines to show.
    #[arg(long, value_name = "LINES")]
    pub(crate) tail: Option<usize>,
    /// Service name.
    pub(crate) service: String,
}

/// Arguments for `skiff token`.
#[derive(Debug, Parser)]
pub(crate) struct TokenCommand {
    #[command(flatten)]
    pub(crate) compose: ComposeArgs,
    /// Seconds to keep polling before giving up.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout: Option<u64>,
    /// Phrase a log line must contain (case-insensitive).
    #[arg(long, value_name = "TEXT")]
    pub(crate) phrase: Option<String>,
    /// Regular expression whose first capture group is the token.
    #[arg(long, value_name = "REGEX")]
    pub(crate) pattern: Option<String>,
    /// Fallback delimiter; the token is the word after it.
    #[arg(long, value_name = "TEXT")]
    pub(crate) delimiter: Option<String>,
    /// Service name.
    pub(crate) service: String,
}
