//! Connection descriptor and per-session tuning knobs.

use std::fmt;
use std::io::Write as _;
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::NamedTempFile;

use super::TransportError;
use super::selector::TransportPreference;
use super::ssh_args::expand_tilde;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default time allowed for the initial handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default window for a single read from the persistent shell.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time the multiplexed master lingers after its last client.
pub const DEFAULT_CONTROL_PERSIST: Duration = Duration::from_secs(60);

/// How the session authenticates.
#[derive(Clone, Eq, PartialEq)]
pub enum Credential {
    /// No material: defer to `ssh-agent` or the client's default keys.
    Agent,
    /// Private key file on the local machine. Supports `~/` expansion.
    KeyFile(Utf8PathBuf),
    /// Inline private key material (PEM/OpenSSH format).
    PrivateKey(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => f.write_str("Agent"),
            Self::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            Self::PrivateKey(_) => f.write_str("PrivateKey(<redacted>)"),
        }
    }
}

/// Immutable description of the remote end.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionContext {
    /// Hostname or IP address.
    pub host: String,
    /// Remote user to log in as.
    pub username: String,
    /// Authentication material.
    pub credential: Credential,
    /// TCP port of the SSH daemon.
    pub port: u16,
    /// Time allowed for the handshake and readiness probe.
    pub connect_timeout: Duration,
}

impl ConnectionContext {
    /// Creates a context using agent authentication and default port/timeout.
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into().trim().to_owned(),
            username: username.into().trim().to_owned(),
            credential: Credential::Agent,
            port: DEFAULT_SSH_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the credential.
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    /// Sets the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the `user@host` destination understood by `ssh` and `scp`.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Checks that host and user are present.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] naming the missing field.
    pub fn validate(&self) -> Result<(), TransportError> {
        for (value, field) in [(&self.host, "host"), (&self.username, "username")] {
            if value.trim().is_empty() {
                return Err(TransportError::Connect {
                    target: self.to_string(),
                    message: format!("missing {field}"),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Client-side settings that are not part of the remote identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    pub scp_bin: String,
    /// Which transport to use; `Auto` probes the local platform.
    pub transport: TransportPreference,
    /// Per-read timeout on the persistent shell.
    pub read_timeout: Duration,
    /// How long the multiplexed master lingers once idle.
    pub control_persist: Duration,
    /// Known hosts file override; `None` keeps the client default.
    pub known_hosts_file: Option<String>,
    /// Remote program started by the persistent transport.
    pub remote_shell: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            transport: TransportPreference::Auto,
            read_timeout: DEFAULT_READ_TIMEOUT,
            control_persist: DEFAULT_CONTROL_PERSIST,
            known_hosts_file: None,
            remote_shell: String::from("sh"),
        }
    }
}

/// Credential material materialised for the lifetime of a session.
///
/// Inline keys are written to a private temporary file that is deleted when
/// this value drops.
#[derive(Debug)]
pub(crate) struct PreparedCredential {
    identity_file: Option<Utf8PathBuf>,
    _key_file: Option<NamedTempFile>,
}

impl PreparedCredential {
    pub(crate) fn prepare(credential: &Credential) -> Result<Self, TransportError> {
        match credential {
            Credential::Agent => Ok(Self {
                identity_file: None,
                _key_file: None,
            }),
            Credential::KeyFile(path) => Ok(Self {
                identity_file: Some(Utf8PathBuf::from(expand_tilde(path.as_str()))),
                _key_file: None,
            }),
            Credential::PrivateKey(material) => Self::write_key(material),
        }
    }

    fn write_key(material: &str) -> Result<Self, TransportError> {
        let credential_error = |err: std::io::Error| TransportError::Credential(err.to_string());
        let mut file = tempfile::Builder::new()
            .prefix("skiff-key-")
            .tempfile()
            .map_err(credential_error)?;
        file.write_all(material.trim_end().as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.flush())
            .map_err(credential_error)?;
        let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf()).map_err(|path| {
            TransportError::Credential(format!("key path is not UTF-8: {}", path.display()))
        })?;
        Ok(Self {
            identity_file: Some(path),
            _key_file: Some(file),
        })
    }

    pub(crate) const fn identity_file(&self) -> Option<&Utf8PathBuf> {
        self.identity_file.as_ref()
    }
}
