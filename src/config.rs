//! Configuration loading via `ortho-config`.
//!
//! Two sections are loaded independently: [`SshConfig`] describes the remote
//! host and how to reach it, [`MonitorConfig`] describes the compose project
//! and the polling cadence. Both merge defaults, `skiff.toml`, and
//! environment variables, and both convert into the runtime types the
//! library works with.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::compose::{ComposeTarget, DEFAULT_COMPOSE_BIN};
use crate::health::MonitorSettings;
use crate::inspect::DEFAULT_LOG_TAIL;
use crate::transport::{
    ConnectionContext, Credential, DEFAULT_SSH_PORT, SessionOptions, TransportPreference,
};

/// Name of the configuration file searched for by both sections.
pub const CONFIG_FILE_NAME: &str = "skiff.toml";

/// SSH connection settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SKIFF_SSH",
    discovery(
        app_name = "skiff",
        env_var = "SKIFF_CONFIG_PATH",
        config_file_name = "skiff.toml",
        dotfile_name = ".skiff.toml",
        project_file_name = "skiff.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote host name or address. Required before connecting; the CLI
    /// `--host` flag takes precedence.
    pub host: Option<String>,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub user: String,
    /// SSH daemon port.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub port: u16,
    /// Private key file; supports `~/` expansion. Mutually exclusive with
    /// `private_key`.
    pub identity_file: Option<String>,
    /// Inline private key material, typically injected through the
    /// environment by CI.
    pub private_key: Option<String>,
    /// Seconds allowed for the handshake.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
    /// Seconds allowed for a single read from the persistent shell.
    #[ortho_config(default = 120)]
    pub read_timeout_secs: u64,
    /// Seconds the multiplexed master lingers once idle.
    #[ortho_config(default = 60)]
    pub control_persist_secs: u64,
    /// Known hosts file override.
    pub known_hosts_file: Option<String>,
    /// Transport preference: `auto`, `multiplexed`, or `persistent`.
    #[ortho_config(default = "auto".to_owned())]
    pub transport: String,
}

/// Compose project and polling settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SKIFF_MONITOR",
    discovery(
        app_name = "skiff",
        env_var = "SKIFF_CONFIG_PATH",
        config_file_name = "skiff.toml",
        dotfile_name = ".skiff.toml",
        project_file_name = "skiff.toml"
    )
)]
pub struct MonitorConfig {
    /// Compose invocation on the remote host.
    #[ortho_config(default = DEFAULT_COMPOSE_BIN.to_owned())]
    pub compose_bin: String,
    /// Remote directory holding the compose project.
    pub project_dir: Option<String>,
    /// Compose file(s), comma separated.
    pub compose_file: Option<String>,
    /// Compose project name.
    pub project_name: Option<String>,
    /// Seconds between status polls.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// Seconds before unsettled services count as timed out.
    #[ortho_config(default = 300)]
    pub max_wait_secs: u64,
    /// Seconds to wait for a start-up token in service logs.
    #[ortho_config(default = 120)]
    pub token_timeout_secs: u64,
    /// Log lines read per token poll.
    #[ortho_config(default = DEFAULT_LOG_TAIL)]
    pub log_tail_lines: usize,
}

/// Where a configuration value can be set, for error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            field: self.toml_key.to_owned(),
            env_var: self.env_var.to_owned(),
            reason: reason.into(),
        }
    }
}

const HOST: FieldMetadata = FieldMetadata::new("remote host", "SKIFF_SSH_HOST", "host");
const USER: FieldMetadata = FieldMetadata::new("remote user", "SKIFF_SSH_USER", "user");
const SSH_BIN: FieldMetadata = FieldMetadata::new("ssh executable", "SKIFF_SSH_SSH_BIN", "ssh_bin");
const SCP_BIN: FieldMetadata = FieldMetadata::new("scp executable", "SKIFF_SSH_SCP_BIN", "scp_bin");
const PORT: FieldMetadata = FieldMetadata::new("SSH port", "SKIFF_SSH_PORT", "port");
const IDENTITY_FILE: FieldMetadata =
    FieldMetadata::new("identity file", "SKIFF_SSH_IDENTITY_FILE", "identity_file");
const PRIVATE_KEY: FieldMetadata =
    FieldMetadata::new("private key", "SKIFF_SSH_PRIVATE_KEY", "private_key");
const CONNECT_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "connect timeout",
    "SKIFF_SSH_CONNECT_TIMEOUT_SECS",
    "connect_timeout_secs",
);
const READ_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "read timeout",
    "SKIFF_SSH_READ_TIMEOUT_SECS",
    "read_timeout_secs",
);
const TRANSPORT: FieldMetadata =
    FieldMetadata::new("transport", "SKIFF_SSH_TRANSPORT", "transport");
const COMPOSE_BIN: FieldMetadata =
    FieldMetadata::new("compose command", "SKIFF_MONITOR_COMPOSE_BIN", "compose_bin");
const POLL_INTERVAL: FieldMetadata = FieldMetadata::new(
    "poll interval",
    "SKIFF_MONITOR_POLL_INTERVAL_SECS",
    "poll_interval_secs",
);
const MAX_WAIT: FieldMetadata =
    FieldMetadata::new("maximum wait", "SKIFF_MONITOR_MAX_WAIT_SECS", "max_wait_secs");
const LOG_TAIL: FieldMetadata =
    FieldMetadata::new("log tail length", "SKIFF_MONITOR_LOG_TAIL_LINES", "log_tail_lines");

fn require_value(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

fn require_optional_value(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    match value {
        Some(text) if text.trim().is_empty() => Err(metadata.invalid("must not be blank")),
        _ => Ok(()),
    }
}

fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(metadata.invalid("must be greater than zero"));
    }
    Ok(())
}

fn blank_to_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

impl SshConfig {
    /// Loads defaults, configuration files, and environment variables
    /// without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("skiff")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks every field that does not depend on the target host.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending environment variable and
    /// `skiff.toml` key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_value(&self.ssh_bin, &SSH_BIN)?;
        require_value(&self.scp_bin, &SCP_BIN)?;
        require_value(&self.user, &USER)?;
        require_optional_value(self.identity_file.as_deref(), &IDENTITY_FILE)?;
        require_optional_value(self.private_key.as_deref(), &PRIVATE_KEY)?;
        if self.identity_file.is_some() && self.private_key.is_some() {
            return Err(PRIVATE_KEY.invalid("cannot be combined with identity_file"));
        }
        if self.port == 0 {
            return Err(PORT.invalid("must be between 1 and 65535"));
        }
        require_positive(self.connect_timeout_secs, &CONNECT_TIMEOUT)?;
        require_positive(self.read_timeout_secs, &READ_TIMEOUT)?;
        self.transport_preference()?;
        Ok(())
    }

    /// Parses the `transport` field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown names.
    pub fn transport_preference(&self) -> Result<TransportPreference, ConfigError> {
        self.transport
            .parse()
            .map_err(|err: crate::transport::ParseTransportError| TRANSPORT.invalid(err.to_string()))
    }

    /// Credential implied by the key settings.
    #[must_use]
    pub fn credential(&self) -> Credential {
        if let Some(path) = blank_to_none(self.identity_file.as_deref()) {
            return Credential::KeyFile(Utf8PathBuf::from(path));
        }
        if let Some(material) = self.private_key.as_deref().filter(|key| !key.trim().is_empty()) {
            return Credential::PrivateKey(material.to_owned());
        }
        Credential::Agent
    }

    /// Builds the connection descriptor; `host_override` wins over the
    /// configured host.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or no host is known.
    pub fn connection_context(
        &self,
        host_override: Option<&str>,
    ) -> Result<ConnectionContext, ConfigError> {
        self.validate()?;
        let host = blank_to_none(host_override)
            .or_else(|| blank_to_none(self.host.as_deref()))
            .ok_or_else(|| HOST.missing())?;
        Ok(ConnectionContext::new(host, self.user.as_str())
            .with_credential(self.credential())
            .with_port(self.port)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs)))
    }

    /// Builds the client-side session options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        self.validate()?;
        Ok(SessionOptions {
            ssh_bin: self.ssh_bin.trim().to_owned(),
            scp_bin: self.scp_bin.trim().to_owned(),
            transport: self.transport_preference()?,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            control_persist: Duration::from_secs(self.control_persist_secs),
            known_hosts_file: blank_to_none(self.known_hosts_file.as_deref()),
            ..SessionOptions::default()
        })
    }
}

impl MonitorConfig {
    /// Loads defaults, configuration files, and environment variables
    /// without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("skiff")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the compose command and timing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending environment variable and
    /// `skiff.toml` key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_value(&self.compose_bin, &COMPOSE_BIN)?;
        require_positive(self.poll_interval_secs, &POLL_INTERVAL)?;
        require_positive(self.max_wait_secs, &MAX_WAIT)?;
        if self.log_tail_lines == 0 {
            return Err(LOG_TAIL.invalid("must be greater than zero"));
        }
        Ok(())
    }

    /// Compose files listed in `compose_file`.
    #[must_use]
    pub fn compose_files(&self) -> Vec<String> {
        self.compose_file
            .as_deref()
            .map(|files| {
                files
                    .split(',')
                    .map(str::trim)
                    .filter(|file| !file.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Compose project the commands should address.
    #[must_use]
    pub fn target(&self) -> ComposeTarget {
        ComposeTarget {
            compose_bin: self.compose_bin.trim().to_owned(),
            project_dir: blank_to_none(self.project_dir.as_deref()),
            compose_files: self.compose_files(),
            project_name: blank_to_none(self.project_name.as_deref()),
        }
    }

    /// Polling cadence for the health monitor.
    #[must_use]
    pub const fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }

    /// How long token discovery may take.
    #[must_use]
    pub const fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required value is empty or missing.
    #[error("{0}")]
    MissingField(String),
    /// A value is present but unusable.
    #[error("invalid {field} (set via {env_var} or {field} in skiff.toml): {reason}")]
    InvalidValue {
        /// `skiff.toml` key.
        field: String,
        /// Environment variable carrying the value.
        env_var: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Merging configuration layers failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
