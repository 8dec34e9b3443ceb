//! Chooses between the multiplexed and persistent transports.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Concrete transport backing a session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransportKind {
    /// Control-socket connection sharing; commands may run concurrently.
    Multiplexed,
    /// One long-lived remote shell; commands are serialised.
    Persistent,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Multiplexed => "multiplexed",
            Self::Persistent => "persistent",
        })
    }
}

/// Configured transport choice.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum TransportPreference {
    /// Pick based on the local platform.
    #[default]
    Auto,
    /// Always use the multiplexed transport.
    Multiplexed,
    /// Always use the persistent transport.
    Persistent,
}

/// Raised when a transport preference string is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown transport `{value}`; expected auto, multiplexed or persistent")]
pub struct ParseTransportError {
    /// Rejected input.
    pub value: String,
}

impl FromStr for TransportPreference {
    type Err = ParseTransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "multiplexed" | "mux" => Ok(Self::Multiplexed),
            "persistent" | "shell" => Ok(Self::Persistent),
            _ => Err(ParseTransportError {
                value: value.to_owned(),
            }),
        }
    }
}

impl fmt::Display for TransportPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Multiplexed => "multiplexed",
            Self::Persistent => "persistent",
        })
    }
}

/// Resolves `preference` for the operating system named by `os` (as in
/// [`std::env::consts::OS`]).
///
/// Windows builds of OpenSSH cannot share a connection through a control
/// socket, so `Auto` falls back to the persistent shell there.
#[must_use]
pub fn select_transport(preference: TransportPreference, os: &str) -> TransportKind {
    match preference {
        TransportPreference::Multiplexed => TransportKind::Multiplexed,
        TransportPreference::Persistent => TransportKind::Persistent,
        TransportPreference::Auto if os == "windows" => TransportKind::Persistent,
        TransportPreference::Auto => TransportKind::Multiplexed,
    }
}
