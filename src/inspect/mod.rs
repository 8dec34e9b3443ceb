//! Service log tailing and token discovery.
//!
//! Some services print a one-time credential at start-up (a notebook access
//! token, an admin bootstrap password). [`ServiceInspector::wait_for_token`]
//! polls the service's recent log lines until such a value shows up or the
//! caller's deadline passes.

use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::ComposeTarget;
use crate::transport::{CommandResult, RemoteExecutor, TransportError};

/// Delay between log polls while waiting for a token.
pub const TOKEN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Log lines fetched per poll unless configured otherwise.
pub const DEFAULT_LOG_TAIL: usize = 100;

/// Default introductory phrase.
pub const DEFAULT_TOKEN_PHRASE: &str = "token";

/// Default structured pattern; the first capture group is the token.
pub const DEFAULT_TOKEN_PATTERN: &str = r"token[=:]\s*([A-Za-z0-9._~+/-]+)";

/// Default delimiter for the plain fallback scan.
pub const DEFAULT_TOKEN_DELIMITER: &str = "token=";

/// What a token line looks like.
#[derive(Clone, Debug)]
pub struct TokenProbe {
    /// Case-insensitive phrase a line must contain to be considered.
    pub phrase: String,
    /// Structured pattern; capture group 1 (or the whole match) is the token.
    pub pattern: Regex,
    /// Fallback: the token is the run of non-whitespace after this text.
    pub delimiter: String,
}

impl TokenProbe {
    /// Builds a probe from its parts.
    ///
    /// # Errors
    ///
    /// Returns the regex error when `pattern` does not compile.
    pub fn new(
        phrase: impl Into<String>,
        pattern: &str,
        delimiter: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            phrase: phrase.into(),
            pattern: Regex::new(pattern)?,
            delimiter: delimiter.into(),
        })
    }

    /// Probe for `token=...` / `token: ...` lines.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the default pattern is a literal.
    pub fn standard() -> Result<Self, regex::Error> {
        Self::new(DEFAULT_TOKEN_PHRASE, DEFAULT_TOKEN_PATTERN, DEFAULT_TOKEN_DELIMITER)
    }
}

/// Finds the most recent token in `text`.
///
/// Lines are scanned newest first. Only lines containing the probe's phrase
/// are considered; the structured pattern is tried before the delimiter
/// scan.
///
/// # Examples
///
/// ```
/// use skiff::inspect::{TokenProbe, extract_token};
///
/// let probe = TokenProbe::standard().expect("default pattern compiles");
/// let logs = "starting\nOpen http://127.0.0.1:8888/lab?token=3f9a1c\n";
/// assert_eq!(extract_token(logs, &probe).as_deref(), Some("3f9a1c"));
/// assert_eq!(extract_token("no credentials here", &probe), None);
/// ```
#[must_use]
pub fn extract_token(text: &str, probe: &TokenProbe) -> Option<String> {
    let phrase = probe.phrase.to_lowercase();
    text.lines()
        .rev()
        .filter(|line| line.to_lowercase().contains(&phrase))
        .find_map(|line| structured_token(line, probe).or_else(|| delimited_token(line, probe)))
}

fn structured_token(line: &str, probe: &TokenProbe) -> Option<String> {
    let captures = probe.pattern.captures(line)?;
    let token = captures.get(1).or_else(|| captures.get(0))?.as_str();
    (!token.is_empty()).then(|| token.to_owned())
}

fn delimited_token(line: &str, probe: &TokenProbe) -> Option<String> {
    if probe.delimiter.is_empty() {
        return None;
    }
    let (_, rest) = line.split_once(probe.delimiter.as_str())?;
    rest.split_whitespace().next().map(str::to_owned)
}

/// Reads logs of compose services.
#[derive(Debug)]
pub struct ServiceInspector<'a, E: RemoteExecutor + ?Sized> {
    executor: &'a E,
    target: ComposeTarget,
    tail_lines: usize,
    poll_interval: Duration,
}

impl<'a, E: RemoteExecutor + ?Sized> ServiceInspector<'a, E> {
    /// Creates an inspector for the given compose project.
    #[must_use]
    pub const fn new(executor: &'a E, target: ComposeTarget) -> Self {
        Self {
            executor,
            target,
            tail_lines: DEFAULT_LOG_TAIL,
            poll_interval: TOKEN_POLL_INTERVAL,
        }
    }

    /// Sets how many lines each token poll reads.
    #[must_use]
    pub const fn with_tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    fn logs_command(&self, service: &str, lines: usize) -> String {
        let lines = lines.to_string();
        self.target
            .command(&["logs", "--no-color", "--tail", &lines, service])
    }

    /// Returns the last `lines` log lines of `service`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailed`] when the logs command exits
    /// non-zero, plus any transport error.
    pub async fn tail_logs(
        &self,
        service: &str,
        lines: usize,
        cancel: &CancellationToken,
    ) -> Result<String, TransportError> {
        let command = self.logs_command(service, lines);
        let result = self.executor.execute(&command, cancel).await?;
        if result.is_success() {
            return Ok(result.stdout);
        }
        Err(command_failed(command, &result))
    }

    /// Polls `service`'s logs until `probe` finds a token or `deadline`
    /// passes.
    ///
    /// Returns `Ok(None)` when the deadline passes or `cancel` fires. A
    /// failing logs command is logged and retried on the next poll.
    ///
    /// # Errors
    ///
    /// Propagates transport errors other than cancellation.
    pub async fn wait_for_token(
        &self,
        service: &str,
        probe: &TokenProbe,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, TransportError> {
        let command = self.logs_command(service, self.tail_lines);
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match self.executor.execute(&command, cancel).await {
                Ok(result) if result.is_success() => {
                    if let Some(token) = extract_token(&result.stdout, probe) {
                        info!(service, "token found in service logs");
                        return Ok(Some(token));
                    }
                    debug!(service, "no token in service logs yet");
                }
                Ok(result) => warn!(
                    service,
                    exit_code = result.exit_code,
                    output = %result.combined_output(),
                    "reading service logs failed; retrying"
                ),
                Err(TransportError::Cancelled) => return Ok(None),
                Err(err) => return Err(err),
            }

            let now = Instant::now();
            if now >= deadline {
                info!(service, "gave up waiting for a token");
                return Ok(None);
            }
            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(pause) => {}
            }
        }
    }
}

fn command_failed(command: String, result: &CommandResult) -> TransportError {
    TransportError::CommandFailed {
        command,
        exit_code: result.exit_code,
        output: result.combined_output(),
    }
}
