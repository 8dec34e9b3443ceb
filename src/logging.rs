//! Tracing subscriber set-up for the `skiff` binary.
//!
//! Log lines go to stderr so stdout stays reserved for command output and
//! JSON reports. `SKIFF_LOG` takes any `EnvFilter` directive and overrides
//! the verbosity flag.

use std::io;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV_VAR: &str = "SKIFF_LOG";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// `SKIFF_LOG` held a directive `EnvFilter` could not parse.
    #[error("invalid {LOG_ENV_VAR} directive: {message}")]
    Directive {
        /// Parser message.
        message: String,
    },
    /// A global subscriber was already installed.
    #[error("failed to install log subscriber: {message}")]
    Install {
        /// Subscriber error text.
        message: String,
    },
}

/// Maps the count of `-v` flags to a default directive.
#[must_use]
pub const fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Builds the filter from `SKIFF_LOG`, falling back to `verbosity`.
///
/// # Errors
///
/// Returns [`LoggingError::Directive`] when `SKIFF_LOG` is set but invalid.
pub fn build_filter(verbosity: u8) -> Result<EnvFilter, LoggingError> {
    match std::env::var(LOG_ENV_VAR) {
        Ok(directive) if !directive.trim().is_empty() => {
            EnvFilter::try_new(directive.trim()).map_err(|err| LoggingError::Directive {
                message: err.to_string(),
            })
        }
        _ => Ok(EnvFilter::new(default_directive(verbosity))),
    }
}

/// Installs a compact fmt subscriber writing to stderr.
///
/// # Errors
///
/// Returns [`LoggingError`] when the directive is invalid or a subscriber is
/// already installed.
pub fn init(verbosity: u8) -> Result<(), LoggingError> {
    let filter = build_filter(verbosity)?;
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|err| LoggingError::Install {
            message: err.to_string(),
        })
}
