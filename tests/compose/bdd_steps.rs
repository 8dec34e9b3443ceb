//! BDD step definitions for compose status and health monitoring.

use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use skiff::compose::StatusCollector;
use skiff::health::{HealthError, HealthMonitor, MonitorSettings};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{ComposeWorld, MonitorOutcome};

#[given("the remote compose only prints tables")]
fn table_only(compose_world: &ComposeWorld) {
    compose_world.table_only.set(true);
}

#[given("a running service \"{name}\" publishing \"{ports}\"")]
fn running_service(compose_world: &ComposeWorld, name: String, ports: String) {
    compose_world.add_service(&name, "Up 2 minutes", &ports);
}

#[given("a service \"{name}\" with status \"{status}\"")]
fn service_with_status(compose_world: &ComposeWorld, name: String, status: String) {
    compose_world.add_service(&name, &status, "");
}

#[when("the deployment status is collected from \"{host}\"")]
fn collect_status(compose_world: &ComposeWorld, host: String) {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("build runtime: {err}"));
    let executor = compose_world.executor();
    let collector = StatusCollector::new(&executor, ComposeWorld::target());

    let deployment = runtime
        .block_on(collector.deployment_status(&host, &CancellationToken::new()))
        .unwrap_or_else(|err| panic!("status collection should succeed: {err}"));
    compose_world.deployment.replace(Some(deployment));
}

#[when("the deployment is monitored for {secs} seconds")]
fn monitor_deployment(compose_world: &ComposeWorld, secs: u64) {
    let runtime = Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap_or_else(|err| panic!("build runtime: {err}"));
    let executor = compose_world.executor();
    let settings = MonitorSettings {
        poll_interval: Duration::from_secs(10),
        max_wait: Duration::from_secs(secs),
    };

    let outcome = runtime.block_on(async {
        let collector = StatusCollector::new(&executor, ComposeWorld::target());
        HealthMonitor::new(collector, settings)
            .wait(&CancellationToken::new())
            .await
    });
    let recorded = match outcome {
        Ok(report) => MonitorOutcome::Healthy(report),
        Err(HealthError::ServicesFailed { report }) => {
            let message = HealthError::ServicesFailed {
                report: report.clone(),
            }
            .to_string();
            MonitorOutcome::Failed {
                report: *report,
                message,
            }
        }
        Err(other) => MonitorOutcome::Other(other.to_string()),
    };
    compose_world.monitor.replace(Some(recorded));
}

#[then("{count} services are reported")]
fn services_reported(compose_world: &ComposeWorld, count: usize) {
    let deployment = compose_world.deployment.borrow();
    let health = &deployment.as_ref().expect("status collected").health;
    assert_eq!(health.total, count, "services: {:?}", health.services);
}

#[then("the deployment is healthy")]
fn deployment_healthy(compose_world: &ComposeWorld) {
    let deployment = compose_world.deployment.borrow();
    let health = &deployment.as_ref().expect("status collected").health;
    assert!(health.all_healthy, "services: {:?}", health.services);
}

#[then("the deployment is not healthy")]
fn deployment_not_healthy(compose_world: &ComposeWorld) {
    let deployment = compose_world.deployment.borrow();
    let health = &deployment.as_ref().expect("status collected").health;
    assert!(!health.all_healthy, "services: {:?}", health.services);
}

#[then("{count} service has failed")]
fn services_failed(compose_world: &ComposeWorld, count: usize) {
    let deployment = compose_world.deployment.borrow();
    let health = &deployment.as_ref().expect("status collected").health;
    assert_eq!(health.failed, count);
}

#[then("the URL for \"{name}\" is \"{url}\"")]
fn url_for(compose_world: &ComposeWorld, name: String, url: String) {
    let deployment = compose_world.deployment.borrow();
    let urls = &deployment.as_ref().expect("status collected").urls;
    assert_eq!(urls.get(&name), Some(&url), "urls: {urls:?}");
}

#[then("service \"{name}\" has no URL")]
fn no_url_for(compose_world: &ComposeWorld, name: String) {
    let deployment = compose_world.deployment.borrow();
    let urls = &deployment.as_ref().expect("status collected").urls;
    assert!(!urls.contains_key(&name), "urls: {urls:?}");
}

#[then("service \"{name}\" is reported as \"{kind}\"")]
fn service_outcome(compose_world: &ComposeWorld, name: String, kind: String) {
    let monitor = compose_world.monitor.borrow();
    let outcome = monitor.as_ref().expect("monitor ran");
    let report = outcome
        .report()
        .unwrap_or_else(|| panic!("expected a report, got {outcome:?}"));
    let found = report
        .outcomes
        .iter()
        .find(|service| service.name == name)
        .unwrap_or_else(|| panic!("no outcome for {name}: {:?}", report.outcomes));
    assert_eq!(found.kind.to_string(), kind);
}

#[then("the monitor failure mentions \"{text}\"")]
fn monitor_failure_mentions(compose_world: &ComposeWorld, text: String) {
    let monitor = compose_world.monitor.borrow();
    match monitor.as_ref().expect("monitor ran") {
        MonitorOutcome::Failed { message, .. } => {
            assert!(message.contains(&text), "{message}");
        }
        other => panic!("expected a failure, got {other:?}"),
    }
}
