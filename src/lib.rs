//! Core library for the skiff remote deployment tool.
//!
//! The crate opens one SSH session per remote host and uses it to run shell
//! commands, copy files, and watch a Docker Compose project until every
//! service is healthy or has finished. Two transports back the session:
//! OpenSSH control-socket multiplexing where the local platform supports it,
//! and a single long-lived remote shell with framed output elsewhere.

pub mod compose;
pub mod config;
pub mod health;
pub mod inspect;
pub mod logging;
pub mod runner;
pub mod test_support;
pub mod transport;

pub use compose::{
    ComposeStatus, ComposeTarget, DeploymentStatus, HealthCheckResult, ServiceHealth,
    ServiceStatus, StatusCollector,
};
pub use config::{ConfigError, MonitorConfig, SshConfig};
pub use health::{HealthError, HealthMonitor, HealthReport, MonitorSettings, OutcomeKind};
pub use inspect::{ServiceInspector, TokenProbe, extract_token};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use transport::{
    CommandResult, ConnectionContext, Credential, RemoteExecutor, Session, SessionOptions,
    TransferDirection, TransferReceipt, TransportError, TransportKind, TransportPreference,
};
