//! Polls compose status until the deployment settles, then reports every
//! service.
//!
//! The loop stops as soon as each service is either healthy or terminal, or
//! when the maximum wait elapses. The last sleep is shortened so the final
//! poll lands exactly on the deadline. Afterwards each service of the last
//! snapshot is classified once and logged, and only then is an aggregate
//! error raised.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::compose::{ComposeStatus, ServiceStatus, StatusCollector};
use crate::transport::{RemoteExecutor, TransportError};

/// Default delay between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default upper bound on the whole wait.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Timing of the polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MonitorSettings {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Time after which remaining unsettled services count as timed out.
    pub max_wait: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Final verdict for one service.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Up and running.
    Healthy,
    /// Exited with status zero, as one-shot jobs do.
    Completed,
    /// Stopped without a successful exit.
    Failed,
    /// Still neither running nor stopped when the wait ended.
    TimedOut,
}

impl OutcomeKind {
    /// Whether this outcome fails the deployment.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        })
    }
}

/// Verdict plus the evidence it was based on.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServiceOutcome {
    /// Service name.
    pub name: String,
    /// Last status text observed.
    pub status: String,
    /// Verdict.
    pub kind: OutcomeKind,
}

/// Result of one monitoring run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HealthReport {
    /// Last snapshot taken.
    pub status: ComposeStatus,
    /// One entry per service, in listing order.
    pub outcomes: Vec<ServiceOutcome>,
    /// Number of status polls made.
    pub polls: u32,
    /// Time from the first poll to the end of the loop.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Whether the loop ended because the maximum wait elapsed.
    pub timed_out: bool,
}

impl HealthReport {
    /// Outcomes that fail the deployment.
    pub fn failures(&self) -> impl Iterator<Item = &ServiceOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.kind.is_failure())
    }

    /// Returns `true` when services exist and none failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.outcomes.is_empty() && self.failures().next().is_none()
    }

    fn failure_summary(&self) -> String {
        let failed: Vec<String> = self
            .failures()
            .map(|outcome| format!("{} ({}: {})", outcome.name, outcome.kind, outcome.status))
            .collect();
        format!(
            "{} of {} services did not become healthy: {}",
            failed.len(),
            self.outcomes.len(),
            failed.join(", ")
        )
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

/// Errors raised by [`HealthMonitor::wait`].
#[derive(Debug, Error)]
pub enum HealthError {
    /// Raised after every service was reported when at least one failed or
    /// timed out.
    #[error("{}", .report.failure_summary())]
    ServicesFailed {
        /// Full report, including healthy services.
        report: Box<HealthReport>,
    },
    /// Raised when compose listed no services for the whole wait.
    #[error("no compose services found after waiting {waited_secs}s")]
    NoServices {
        /// Seconds spent waiting.
        waited_secs: u64,
    },
    /// Raised when the caller cancelled the wait.
    #[error("health monitoring cancelled")]
    Cancelled,
    /// Raised when status could not be collected.
    #[error("failed to collect compose status: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for HealthError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

/// Watches one compose project until it settles.
#[derive(Debug)]
pub struct HealthMonitor<'a, E: RemoteExecutor + ?Sized> {
    collector: StatusCollector<'a, E>,
    settings: MonitorSettings,
}

impl<'a, E: RemoteExecutor + ?Sized> HealthMonitor<'a, E> {
    /// Creates a monitor polling through `collector`.
    #[must_use]
    pub const fn new(collector: StatusCollector<'a, E>, settings: MonitorSettings) -> Self {
        Self {
            collector,
            settings,
        }
    }

    /// Polls until every service is stable or the maximum wait elapses.
    ///
    /// # Errors
    ///
    /// - [`HealthError::ServicesFailed`] when any service failed or timed
    ///   out; every service has been logged by then.
    /// - [`HealthError::NoServices`] when nothing was ever listed.
    /// - [`HealthError::Cancelled`] when `cancel` fires.
    /// - [`HealthError::Transport`] when collection fails.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<HealthReport, HealthError> {
        let started = Instant::now();
        let deadline = started + self.settings.max_wait;
        let mut polls = 0_u32;

        let (status, timed_out) = loop {
            if cancel.is_cancelled() {
                return Err(HealthError::Cancelled);
            }
            let status = self.collector.collect(cancel).await?;
            polls += 1;
            debug!(
                poll = polls,
                total = status.total,
                healthy = status.healthy,
                unhealthy = status.unhealthy,
                failed = status.failed,
                "compose status polled"
            );
            if status.is_stable() {
                break (status, false);
            }

            let now = Instant::now();
            if now >= deadline {
                break (status, true);
            }
            let pause = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(HealthError::Cancelled),
                () = tokio::time::sleep(pause) => {}
            }
        };

        let elapsed = started.elapsed();
        if status.services.is_empty() {
            error!(waited_secs = elapsed.as_secs(), "no compose services found");
            return Err(HealthError::NoServices {
                waited_secs: elapsed.as_secs(),
            });
        }

        let outcomes: Vec<ServiceOutcome> = status.services.iter().map(report_service).collect();
        let report = HealthReport {
            status,
            outcomes,
            polls,
            elapsed,
            timed_out,
        };
        if report.is_success() {
            info!(
                services = report.outcomes.len(),
                polls,
                elapsed_secs = elapsed.as_secs(),
                "deployment healthy"
            );
            Ok(report)
        } else {
            Err(HealthError::ServicesFailed {
                report: Box::new(report),
            })
        }
    }
}

/// Classifies one service and logs the verdict.
fn report_service(service: &ServiceStatus) -> ServiceOutcome {
    let kind = if service.terminal {
        if service.completed_successfully() {
            OutcomeKind::Completed
        } else {
            OutcomeKind::Failed
        }
    } else if service.healthy {
        OutcomeKind::Healthy
    } else {
        OutcomeKind::TimedOut
    };

    let name = service.name.as_str();
    let status = service.status.as_str();
    match kind {
        OutcomeKind::Healthy => info!(service = name, status, "service healthy"),
        OutcomeKind::Completed => info!(service = name, status, "service completed"),
        OutcomeKind::Failed => error!(service = name, status, detail = %service.detail, "service failed"),
        OutcomeKind::TimedOut => error!(service = name, status, "service did not settle in time"),
    }

    ServiceOutcome {
        name: service.name.clone(),
        status: service.status.clone(),
        kind,
    }
}
