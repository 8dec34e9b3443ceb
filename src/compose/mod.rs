//! Docker Compose status collection and the snapshot types derived from it.
//!
//! [`StatusCollector`] runs `docker compose ps` through a
//! [`RemoteExecutor`](crate::transport::RemoteExecutor) and turns its output
//! into [`ServiceStatus`] records with the pure parsers in [`parse`]. The
//! aggregate [`ComposeStatus`], [`HealthCheckResult`] and
//! [`DeploymentStatus`] values are plain data for callers to render or
//! persist.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Serialize;
use shell_escape::unix::escape;

mod collector;
pub mod parse;

pub use collector::StatusCollector;

/// Compose invocation used when none is configured.
pub const DEFAULT_COMPOSE_BIN: &str = "docker compose";

/// Where and how to invoke Docker Compose on the remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComposeTarget {
    /// Compose command, inserted verbatim (for example `docker compose` or
    /// `docker-compose`).
    pub compose_bin: String,
    /// Directory to change into before running compose.
    pub project_dir: Option<String>,
    /// Compose files passed with `-f`, in order.
    pub compose_files: Vec<String>,
    /// Project name passed with `-p`.
    pub project_name: Option<String>,
}

impl Default for ComposeTarget {
    fn default() -> Self {
        Self {
            compose_bin: String::from(DEFAULT_COMPOSE_BIN),
            project_dir: None,
            compose_files: Vec::new(),
            project_name: None,
        }
    }
}

impl ComposeTarget {
    /// Renders a shell command running compose with `args`.
    ///
    /// Every argument, directory and file name is shell-escaped.
    ///
    /// # Examples
    ///
    /// ```
    /// use skiff::compose::ComposeTarget;
    ///
    /// let target = ComposeTarget {
    ///     project_dir: Some(String::from("/srv/my app")),
    ///     project_name: Some(String::from("shop")),
    ///     ..ComposeTarget::default()
    /// };
    /// assert_eq!(
    ///     target.command(&["logs", "--tail", "5", "web"]),
    ///     "cd '/srv/my app' && docker compose -p shop logs --tail 5 web"
    /// );
    /// ```
    #[must_use]
    pub fn command(&self, args: &[&str]) -> String {
        let mut parts: Vec<Cow<'_, str>> = vec![Cow::Borrowed(self.compose_bin.trim())];
        for file in &self.compose_files {
            parts.push(Cow::Borrowed("-f"));
            parts.push(escape(Cow::Borrowed(file.as_str())));
        }
        if let Some(name) = self.project_name.as_deref() {
            parts.push(Cow::Borrowed("-p"));
            parts.push(escape(Cow::Borrowed(name)));
        }
        parts.extend(args.iter().map(|arg| escape(Cow::Borrowed(*arg))));
        let compose = parts.join(" ");

        match self.project_dir.as_deref() {
            Some(dir) => format!("cd {} && {compose}", escape(Cow::Borrowed(dir))),
            None => compose,
        }
    }
}

/// State of one compose service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServiceStatus {
    /// Service name as declared in the compose file.
    pub name: String,
    /// Container name.
    pub container: String,
    /// Status text as printed by compose, e.g. `Up 2 minutes (healthy)`.
    pub status: String,
    /// Published port mappings, e.g. `0.0.0.0:8080->80/tcp`.
    pub ports: String,
    /// Whether the service looks up and running.
    pub healthy: bool,
    /// Whether the service has stopped and will stay stopped.
    pub terminal: bool,
    /// Short human-readable summary of the classification.
    pub detail: String,
}

impl ServiceStatus {
    /// Builds a record and classifies `status`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        container: impl Into<String>,
        status: impl Into<String>,
        ports: impl Into<String>,
    ) -> Self {
        let status = status.into();
        let healthy = parse::is_healthy_status(&status);
        let terminal = parse::is_terminal_status(&status);
        let detail = describe(healthy, terminal, parse::exit_code_of(&status));
        Self {
            name: name.into(),
            container: container.into(),
            status,
            ports: ports.into(),
            healthy,
            terminal,
            detail,
        }
    }

    /// Healthy or terminal: the state will not change on its own.
    #[must_use]
    pub const fn is_stable(&self) -> bool {
        self.healthy || self.terminal
    }

    /// Terminal with a zero exit code, as expected of one-shot jobs.
    #[must_use]
    pub fn completed_successfully(&self) -> bool {
        self.terminal && parse::is_successful_exit(&self.status)
    }

    /// Terminal without a successful exit.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.terminal && !self.completed_successfully()
    }

    /// Neither healthy nor terminal yet.
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        !self.healthy && !self.terminal
    }
}

fn describe(healthy: bool, terminal: bool, exit_code: Option<i32>) -> String {
    match (terminal, exit_code) {
        (true, Some(0)) => String::from("completed"),
        (true, Some(code)) => format!("exited with code {code}"),
        (true, None) => String::from("stopped"),
        (false, _) if healthy => String::from("running"),
        (false, _) => String::from("not ready"),
    }
}

/// All services of a project plus aggregate counts.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ComposeStatus {
    /// Services in the order compose listed them.
    pub services: Vec<ServiceStatus>,
    /// Number of services.
    pub total: usize,
    /// Services classified healthy.
    pub healthy: usize,
    /// Services neither healthy nor terminal.
    pub unhealthy: usize,
    /// Terminal services without a successful exit.
    pub failed: usize,
}

impl ComposeStatus {
    /// Computes the counts for `services`.
    #[must_use]
    pub fn from_services(services: Vec<ServiceStatus>) -> Self {
        let healthy = services.iter().filter(|service| service.healthy).count();
        let unhealthy = services.iter().filter(|service| service.is_unhealthy()).count();
        let failed = services.iter().filter(|service| service.is_failed()).count();
        Self {
            total: services.len(),
            services,
            healthy,
            unhealthy,
            failed,
        }
    }

    /// Returns `true` when at least one service exists and every service is
    /// healthy or terminal.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        !self.services.is_empty() && self.services.iter().all(ServiceStatus::is_stable)
    }

    /// Looks a service up by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceStatus> {
        self.services.iter().find(|service| service.name == name)
    }
}

/// Health of one service as reported to callers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServiceHealth {
    /// Service name.
    pub name: String,
    /// Raw status text.
    pub status: String,
    /// Classification flags.
    pub healthy: bool,
    /// Whether the service has stopped.
    pub terminal: bool,
    /// First published endpoint, if any.
    pub url: Option<String>,
}

/// Aggregate health plus per-service details.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HealthCheckResult {
    /// At least one service, none failed and none still settling.
    pub all_healthy: bool,
    /// Number of services.
    pub total: usize,
    /// Services classified healthy.
    pub healthy: usize,
    /// Services neither healthy nor terminal.
    pub unhealthy: usize,
    /// Terminal services without a successful exit.
    pub failed: usize,
    /// Per-service details.
    pub services: Vec<ServiceHealth>,
}

impl HealthCheckResult {
    /// Derives the result from a snapshot; wildcard port binds resolve to
    /// `host`.
    #[must_use]
    pub fn from_status(status: &ComposeStatus, host: &str) -> Self {
        let services = status
            .services
            .iter()
            .map(|service| ServiceHealth {
                name: service.name.clone(),
                status: service.status.clone(),
                healthy: service.healthy,
                terminal: service.terminal,
                url: parse::published_url(&service.ports, host),
            })
            .collect();
        Self {
            all_healthy: status.total > 0 && status.failed == 0 && status.unhealthy == 0,
            total: status.total,
            healthy: status.healthy,
            unhealthy: status.unhealthy,
            failed: status.failed,
            services,
        }
    }
}

/// Snapshot of a deployment on one host.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DeploymentStatus {
    /// Host the deployment runs on.
    pub host: String,
    /// Compose project name, when known.
    pub project_name: Option<String>,
    /// Aggregate and per-service health.
    pub health: HealthCheckResult,
    /// Service name to URL, for services publishing a port.
    pub urls: BTreeMap<String, String>,
}

impl DeploymentStatus {
    /// Builds the snapshot for `status` observed on `host`.
    #[must_use]
    pub fn new(host: &str, project_name: Option<String>, status: &ComposeStatus) -> Self {
        let health = HealthCheckResult::from_status(status, host);
        let urls = health
            .services
            .iter()
            .filter_map(|service| {
                service
                    .url
                    .as_ref()
                    .map(|url| (service.name.clone(), url.clone()))
            })
            .collect();
        Self {
            host: host.to_owned(),
            project_name,
            health,
            urls,
        }
    }
}

#[cfg(test)]
mod tests;
