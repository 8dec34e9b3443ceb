//! Runs `docker compose ps` remotely and parses the result.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::{RemoteExecutor, TransportError};

use super::parse::{PS_FORMAT, parse_formatted, parse_table};
use super::{ComposeStatus, ComposeTarget, DeploymentStatus};

/// Collects [`ComposeStatus`] snapshots for one compose project.
#[derive(Debug)]
pub struct StatusCollector<'a, E: RemoteExecutor + ?Sized> {
    executor: &'a E,
    target: ComposeTarget,
}

impl<'a, E: RemoteExecutor + ?Sized> StatusCollector<'a, E> {
    /// Creates a collector running commands through `executor`.
    #[must_use]
    pub const fn new(executor: &'a E, target: ComposeTarget) -> Self {
        Self { executor, target }
    }

    /// Compose project this collector inspects.
    #[must_use]
    pub const fn target(&self) -> &ComposeTarget {
        &self.target
    }

    /// Command used for the tab-separated listing.
    #[must_use]
    pub fn formatted_command(&self) -> String {
        self.target.command(&["ps", "-a", "--format", PS_FORMAT])
    }

    /// Command used for the table listing.
    #[must_use]
    pub fn table_command(&self) -> String {
        self.target.command(&["ps", "-a"])
    }

    /// Lists every service of the project.
    ///
    /// The tab-separated listing is tried first. When it exits non-zero or
    /// yields no services, the plain table is parsed heuristically instead.
    /// A failing table listing produces an empty status.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from either listing.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<ComposeStatus, TransportError> {
        let formatted = self
            .executor
            .execute(&self.formatted_command(), cancel)
            .await?;
        if formatted.is_success() {
            let services = parse_formatted(&formatted.stdout);
            if !services.is_empty() {
                return Ok(ComposeStatus::from_services(services));
            }
            debug!("formatted compose listing was empty; trying table output");
        } else {
            debug!(
                exit_code = formatted.exit_code,
                output = %formatted.combined_output(),
                "formatted compose listing failed; trying table output"
            );
        }

        let table = self.executor.execute(&self.table_command(), cancel).await?;
        if !table.is_success() {
            warn!(
                exit_code = table.exit_code,
                output = %table.combined_output(),
                "compose status listing failed"
            );
            return Ok(ComposeStatus::default());
        }
        let services = parse_table(&table.stdout, self.target.project_name.as_deref());
        Ok(ComposeStatus::from_services(services))
    }

    /// Collects a snapshot and derives per-service URLs for `host`.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from [`Self::collect`].
    pub async fn deployment_status(
        &self,
        host: &str,
        cancel: &CancellationToken,
    ) -> Result<DeploymentStatus, TransportError> {
        let status = self.collect(cancel).await?;
        Ok(DeploymentStatus::new(
            host,
            self.target.project_name.clone(),
            &status,
        ))
    }
}
