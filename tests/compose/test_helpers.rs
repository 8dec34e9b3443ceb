//! Shared world for the compose status scenarios.

use std::cell::{Cell, RefCell};

use rstest::fixture;
use skiff::compose::{ComposeTarget, DeploymentStatus};
use skiff::health::HealthReport;
use skiff::test_support::ScriptedExecutor;

pub const PROJECT: &str = "shop";

#[derive(Clone, Debug)]
pub struct FakeService {
    pub name: String,
    pub status: String,
    pub ports: String,
}

impl FakeService {
    fn container(&self) -> String {
        format!("{PROJECT}-{}-1", self.name)
    }

    fn formatted_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.container(),
            self.name,
            self.status,
            self.ports
        )
    }

    fn table_line(&self) -> String {
        format!(
            "{}   {PROJECT}/{}:latest   {}   {}",
            self.container(),
            self.name,
            self.status,
            self.ports
        )
    }
}

/// What the monitor run produced.
#[derive(Debug)]
pub enum MonitorOutcome {
    Healthy(HealthReport),
    Failed { report: HealthReport, message: String },
    Other(String),
}

impl MonitorOutcome {
    pub const fn report(&self) -> Option<&HealthReport> {
        match self {
            Self::Healthy(report) | Self::Failed { report, .. } => Some(report),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ComposeWorld {
    pub services: RefCell<Vec<FakeService>>,
    pub table_only: Cell<bool>,
    pub deployment: RefCell<Option<DeploymentStatus>>,
    pub monitor: RefCell<Option<MonitorOutcome>>,
}

impl ComposeWorld {
    pub fn add_service(&self, name: &str, status: &str, ports: &str) {
        self.services.borrow_mut().push(FakeService {
            name: name.to_owned(),
            status: status.to_owned(),
            ports: ports.to_owned(),
        });
    }

    /// Builds an executor answering `ps` the way the configured remote does.
    pub fn executor(&self) -> ScriptedExecutor {
        let executor = ScriptedExecutor::new();
        let services = self.services.borrow();
        if self.table_only.get() {
            executor.push_result(1, "unknown flag: --format");
            let mut table = String::from("NAME   IMAGE   STATUS   PORTS\n");
            for service in services.iter() {
                table.push_str(&service.table_line());
                table.push('\n');
            }
            executor.push_stdout(table);
        } else {
            let listing: Vec<String> = services.iter().map(FakeService::formatted_line).collect();
            executor.push_stdout(listing.join("\n"));
        }
        executor
    }

    pub fn target() -> ComposeTarget {
        ComposeTarget {
            project_dir: Some(String::from("/srv/shop")),
            project_name: Some(String::from(PROJECT)),
            ..ComposeTarget::default()
        }
    }
}

#[fixture]
pub fn compose_world() -> ComposeWorld {
    ComposeWorld::default()
}
