//! Binary entry point for the skiff CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use serde::Serialize;
use shell_escape::unix::escape;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use skiff::compose::{DeploymentStatus, StatusCollector};
use skiff::config::{ConfigError, MonitorConfig, SshConfig};
use skiff::health::{HealthError, HealthMonitor, HealthReport};
use skiff::inspect::{
    DEFAULT_TOKEN_DELIMITER, DEFAULT_TOKEN_PATTERN, DEFAULT_TOKEN_PHRASE, ServiceInspector,
    TokenProbe,
};
use skiff::logging::{self, LoggingError};
use skiff::transport::{ConnectionContext, Session, SessionOptions, TransportError};

use cli::{
    Cli, Command, ComposeArgs, ConnectionArgs, DownloadCommand, ExecCommand, LogsCommand,
    StatusCommand, TokenCommand, UploadCommand, WaitCommand,
};

/// Exit status for failed health checks and missing tokens.
const EXIT_FAILURE: i32 = 1;
/// Exit status for configuration and usage errors.
const EXIT_USAGE: i32 = 2;
/// Exit status after Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;
/// Exit status for connection and transport failures, as `ssh` uses.
const EXIT_TRANSPORT: i32 = 255;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("invalid token pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error("no token found in {service} logs within {waited_secs}s")]
    TokenNotFound { service: String, waited_secs: u64 },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::InvalidCommand(_) | Self::InvalidPattern(_) | Self::Logging(_) => {
                EXIT_USAGE
            }
            Self::Transport(TransportError::Cancelled) | Self::Health(HealthError::Cancelled) => {
                EXIT_INTERRUPTED
            }
            Self::Transport(_) | Self::Health(HealthError::Transport(_)) => EXIT_TRANSPORT,
            Self::Health(_) | Self::TokenNotFound { .. } | Self::Output(_) => EXIT_FAILURE,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let Cli {
        connection,
        verbose,
        command,
    } = cli;
    logging::init(verbose)?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    dispatch(command, &connection, &cancel).await
}

fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            cancel.cancel();
        }
    });
}

async fn dispatch(
    command: Command,
    connection: &ConnectionArgs,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    match command {
        Command::Exec(args) => exec(connection, &args, cancel).await,
        Command::Upload(args) => upload(connection, &args, cancel).await,
        Command::Download(args) => download(connection, &args, cancel).await,
        Command::Status(args) => status(connection, &args, cancel).await,
        Command::Wait(args) => wait(connection, &args, cancel).await,
        Command::Logs(args) => logs(connection, &args, cancel).await,
        Command::Token(args) => token(connection, &args, cancel).await,
    }
}

async fn exec(
    connection: &ConnectionArgs,
    args: &ExecCommand,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;
    let remote_command = render_remote_command(&args.command);
    let (context, options) = load_connection(connection)?;

    Session::scoped(context, options, cancel, async |session| -> Result<i32, CliError> {
        let result = session.execute(&remote_command, cancel).await?;
        write!(io::stdout(), "{}", result.stdout)?;
        write!(io::stderr(), "{}", result.stderr)?;
        Ok(exit_status(result.exit_code))
    })
    .await
}

async fn upload(
    connection: &ConnectionArgs,
    args: &UploadCommand,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    let (context, options) = load_connection(connection)?;
    let local = Utf8PathBuf::from(args.local.as_str());

    Session::scoped(context, options, cancel, async |session| -> Result<i32, CliError> {
        let receipt = session.upload(&local, &args.remote, cancel).await?;
        writeln!(
            io::stdout(),
            "uploaded {} to {}:{}",
            receipt.local,
            session.context().host,
            receipt.remote
        )?;
        Ok(0)
    })
    .await
}

async fn download(
    connection: &ConnectionArgs,
    args: &DownloadCommand,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    let (context, options) = load_connection(connection)?;
    let local = Utf8PathBuf::from(args.local.as_str());

    Session::scoped(context, options, cancel, async |session| -> Result<i32, CliError> {
        let receipt = session.download(&args.remote, &local, cancel).await?;
        writeln!(
            io::stdout(),
            "downloaded {}:{} to {}",
            session.context().host,
            receipt.remote,
            receipt.local
        )?;
        Ok(0)
    })
    .await
}

async fn status(
    connection: &ConnectionArgs,
    args: &StatusCommand,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    let (context, options) = load_connection(connection)?;
    let monitor = load_monitor(&args.compose)?;
    let host = context.host.clone();

    Session::scoped(context, options, cancel, async |session| -> Result<i32, CliError> {
        let collector = StatusCollector::new(session, monitor.target());
        let deployment = collector.deployment_status(&host, cancel).await?;
        if args.json {
            write_json(&deployment)?;
        } else {
            write_deployment(&deployment)?;
        }
        Ok(if deployment.health.all_healthy {
            0
        } else {
            EXIT_FAILURE
        })
    })
    .await
}

async fn wait(
    connection: &ConnectionArgs,
    args: &WaitCommand,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    let (context, options) = load_connection(connection)?;
    let mut monitor = load_monitor(&args.compose)?;
    if let Some(secs) = args.poll_interval {
        monitor.poll_interval_secs = secs;
    }
    if let Some(secs) = args.max_wait {
        monitor.max_wait_secs = secs;
    }
    monitor.validate()?;

    Session::scoped(context, options, cancel, async |session| -> Result<i32, CliError> {
        let collector = StatusCollector::new(session, monitor.target());
        match HealthMonitor::new(collector, monitor.settings()).wait(cancel).await {
            Ok(report) => {
                write_report(&report, args.json)?;
                Ok(0)
            }
            Err(HealthError::ServicesFailed { report }) => {
                write_report(&report, args.json)?;
                Err(HealthError::ServicesFailed { report }.into())
            }
            Err(err) => Err(err.into()),
        }
    })
    .await
}

async fn logs(
    connection: &ConnectionArgs,
    args: &LogsCommand,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    let (context, options) = load_connection(connection)?;
    let monitor = load_monitor(&args.compose)?;
    let lines = args.tail.unwrap_or(monitor.log_tail_lines);

    Session::scoped(context, options, cancel, async |session| -> Result<i32, CliError> {
        let inspector = ServiceInspector::new(session, monitor.target());
        let output = inspector.tail_logs(&args.service, lines, cancel).await?;
        write!(io::stdout(), "{output}")?;
        Ok(0)
    })
    .await
}

async fn token(
    connection: &ConnectionArgs,
    args: &TokenCommand,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    let probe = TokenProbe::new(
        args.phrase.as_deref().unwrap_or(DEFAULT_TOKEN_PHRASE),
        args.pattern.as_deref().unwrap_or(DEFAULT_TOKEN_PATTERN),
        args.delimiter.as_deref().unwrap_or(DEFAULT_TOKEN_DELIMITER),
    )?;
    let (context, options) = load_connection(connection)?;
    let monitor = load_monitor(&args.compose)?;
    let timeout = args
        .timeout
        .map_or_else(|| monitor.token_timeout(), Duration::from_secs);

    Session::scoped(context, options, cancel, async |session| -> Result<i32, CliError> {
        let inspector = ServiceInspector::new(session, monitor.target())
            .with_tail_lines(monitor.log_tail_lines);
        let deadline = Instant::now() + timeout;
        match inspector
            .wait_for_token(&args.service, &probe, deadline, cancel)
            .await?
        {
            Some(found) => {
                writeln!(io::stdout(), "{found}")?;
                Ok(0)
            }
            None if cancel.is_cancelled() => Err(TransportError::Cancelled.into()),
            None => Err(CliError::TokenNotFound {
                service: args.service.clone(),
                waited_secs: timeout.as_secs(),
            }),
        }
    })
    .await
}

fn load_connection(args: &ConnectionArgs) -> Result<(ConnectionContext, SessionOptions), CliError> {
    let mut config = SshConfig::load_without_cli_args()?;
    apply_connection_overrides(&mut config, args);
    let context = config.connection_context(args.host.as_deref())?;
    let options = config.session_options()?;
    Ok((context, options))
}

fn apply_connection_overrides(config: &mut SshConfig, args: &ConnectionArgs) {
    if let Some(user) = &args.user {
        config.user.clone_from(user);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = &args.identity_file {
        config.identity_file = Some(path.clone());
        config.private_key = None;
    }
    if let Some(transport) = &args.transport {
        config.transport.clone_from(transport);
    }
}

fn load_monitor(args: &ComposeArgs) -> Result<MonitorConfig, CliError> {
    let mut config = MonitorConfig::load_without_cli_args()?;
    apply_compose_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_compose_overrides(config: &mut MonitorConfig, args: &ComposeArgs) {
    if let Some(dir) = &args.project_dir {
        config.project_dir = Some(dir.clone());
    }
    if let Some(name) = &args.project_name {
        config.project_name = Some(name.clone());
    }
    if !args.files.is_empty() {
        config.compose_file = Some(args.files.join(","));
    }
}

/// Maps a remote exit code onto a process exit status; codes outside
/// `0..=255` (including the no-status sentinel) become [`EXIT_TRANSPORT`].
fn exit_status(code: i32) -> i32 {
    if (0..=255).contains(&code) {
        code
    } else {
        EXIT_TRANSPORT
    }
}

fn render_remote_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| matches!(ch, '\u{0000}'..='\u{001F}' | '\u{007F}'))
        {
            return Err(CliError::InvalidCommand(String::from(concat!(
                "command arguments must not contain control characters (ASCII ",
                "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
            ))));
        }
    }
    Ok(())
}

fn write_json(value: &impl Serialize) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(io::Error::from)?;
    writeln!(stdout)?;
    Ok(())
}

fn write_deployment(deployment: &DeploymentStatus) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    let health = &deployment.health;
    writeln!(
        stdout,
        "{}: {} services, {} healthy, {} unhealthy, {} failed",
        deployment.host, health.total, health.healthy, health.unhealthy, health.failed
    )?;
    for service in &health.services {
        let url = service.url.as_deref().unwrap_or("-");
        writeln!(stdout, "{}\t{}\t{url}", service.name, service.status)?;
    }
    Ok(())
}

fn write_report(report: &HealthReport, json: bool) -> Result<(), CliError> {
    if json {
        return write_json(report);
    }
    let mut stdout = io::stdout().lock();
    for outcome in &report.outcomes {
        writeln!(stdout, "{}\t{}\t{}", outcome.name, outcome.kind, outcome.status)?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "skiff: {err}").ok();
}
