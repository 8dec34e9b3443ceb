//! BDD scenarios for compose status collection.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ComposeWorld, compose_world};

#[scenario(
    path = "tests/features/compose_status.feature",
    name = "Running services expose their published URLs"
)]
fn scenario_published_urls(compose_world: ComposeWorld) {
    drop(compose_world);
}

#[scenario(
    path = "tests/features/compose_status.feature",
    name = "Table output is parsed when the formatted listing is unsupported"
)]
fn scenario_table_fallback(compose_world: ComposeWorld) {
    drop(compose_world);
}

#[scenario(
    path = "tests/features/compose_status.feature",
    name = "A crashed worker fails the deployment"
)]
fn scenario_crashed_worker(compose_world: ComposeWorld) {
    drop(compose_world);
}

#[scenario(
    path = "tests/features/compose_status.feature",
    name = "Waiting reports every service before failing"
)]
fn scenario_monitor_reports_all(compose_world: ComposeWorld) {
    drop(compose_world);
}
