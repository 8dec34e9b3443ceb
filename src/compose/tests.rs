//! Unit tests for compose parsing, classification and collection.

use super::parse::{
    derive_service_name, exit_code_of, is_healthy_status, is_terminal_status, parse_formatted,
    parse_table, published_url,
};
use super::*;
use crate::test_support::ScriptedExecutor;
use crate::transport::TransportError;
use rstest::{fixture, rstest};
use tokio_util::sync::CancellationToken;

const TABLE: &str = "\
NAME             IMAGE          COMMAND                  SERVICE   CREATED         STATUS                     PORTS
shop-web-1       nginx:1.27     \"/docker-entrypoint.…\"   web       2 minutes ago   Up 2 minutes (healthy)     0.0.0.0:8080->80/tcp, :::8080->80/tcp
shop-migrate-1   shop/migrate   \"./migrate\"              migrate   2 minutes ago   Exited (0) 1 minute ago
shop-worker-1    shop/worker    \"./worker\"               worker    2 minutes ago   Restarting (1) 5 seconds ago
";

#[fixture]
fn target() -> ComposeTarget {
    ComposeTarget {
        project_dir: Some(String::from("/srv/shop")),
        project_name: Some(String::from("shop")),
        ..ComposeTarget::default()
    }
}

#[rstest]
fn formatted_line_parses_into_service() {
    let services = parse_formatted("web-1\tweb\tUp 2 minutes\t0.0.0.0:8080->80/tcp");
    let web = services.first().expect("one service");
    assert_eq!(web.name, "web");
    assert_eq!(web.container, "web-1");
    assert_eq!(web.ports, "0.0.0.0:8080->80/tcp");
    assert!(web.healthy);
    assert!(!web.terminal);
    assert_eq!(web.detail, "running");
}

#[rstest]
#[case("a\tb")]
#[case("only-one-field")]
#[case("")]
#[case("   ")]
fn short_formatted_lines_are_dropped(#[case] line: &str) {
    assert!(parse_formatted(line).is_empty());
}

#[rstest]
fn malformed_lines_do_not_abort_collection() {
    let text = "garbage\nweb-1\tweb\tUp 1 second\t\nalso\tbad\ndb-1\tdb\tUp 1 second\n";
    let names: Vec<_> = parse_formatted(text)
        .into_iter()
        .map(|service| service.name)
        .collect();
    assert_eq!(names, ["web", "db"]);
}

#[rstest]
fn literal_backslash_t_separators_are_accepted() {
    let services = parse_formatted(r"api-1\tapi\tExited (2) 3 seconds ago\t");
    let api = services.first().expect("one service");
    assert_eq!(api.name, "api");
    assert!(api.terminal);
    assert!(api.is_failed());
    assert_eq!(api.detail, "exited with code 2");
}

#[rstest]
fn missing_service_field_falls_back_to_container_name() {
    let services = parse_formatted("shop-cache-2\t\tUp 4 hours\t");
    assert_eq!(services.first().map(|service| service.name.as_str()), Some("cache"));
}

#[rstest]
fn table_output_is_parsed_heuristically() {
    let services = parse_table(TABLE, Some("shop"));
    assert_eq!(services.len(), 3);

    let web = services.first().expect("web");
    assert_eq!(web.name, "web");
    assert_eq!(web.status, "Up 2 minutes (healthy)");
    assert_eq!(web.ports, "0.0.0.0:8080->80/tcp, :::8080->80/tcp");

    let migrate = services.get(1).expect("migrate");
    assert_eq!(migrate.name, "migrate");
    assert!(migrate.completed_successfully());

    let worker = services.get(2).expect("worker");
    assert_eq!(worker.status, "Restarting (1) 5 seconds ago");
    assert!(worker.is_unhealthy());
}

#[rstest]
fn legacy_table_with_single_spaces_is_parsed() {
    let text = "Name Command State Ports\n------\nshop_db_1 postgres Up 5432/tcp\n";
    let services = parse_table(text, None);
    let db = services.first().expect("db");
    assert_eq!(db.name, "db");
    assert_eq!(db.status, "Up 5432/tcp");
    assert!(db.healthy);
}

#[rstest]
fn table_lines_without_status_are_skipped() {
    assert!(parse_table("lonely\nshop-web-1 nginx something\n", None).is_empty());
}

#[rstest]
#[case("shop-web-1", Some("shop"), "web")]
#[case("shop_web_1", None, "web")]
#[case("my-shop-api-gateway-3", Some("my-shop"), "api-gateway")]
#[case("shop-api-gateway-1", None, "api-gateway")]
#[case("standalone", None, "standalone")]
fn service_names_are_derived_from_containers(
    #[case] container: &str,
    #[case] project: Option<&str>,
    #[case] expected: &str,
) {
    assert_eq!(derive_service_name(container, project), expected);
}

#[rstest]
#[case("Up 2 minutes", true)]
#[case("running", true)]
#[case("Up 3 seconds (health: starting)", true)]
#[case("Up 5 minutes (unhealthy)", true)]
#[case("Exited (1) 2 minutes ago", false)]
#[case("Created", false)]
#[case("Restarting (1) 5 seconds ago", false)]
fn healthy_classification(#[case] status: &str, #[case] expected: bool) {
    assert_eq!(is_healthy_status(status), expected, "{status}");
}

#[rstest]
#[case("Exited (0) 5 minutes ago", true, Some(0))]
#[case("exit code 1", true, Some(1))]
#[case("Exit (2)", true, Some(2))]
#[case("Exit 0", true, Some(0))]
#[case("Dead", true, None)]
#[case("stopped", true, None)]
#[case("Killed", true, None)]
#[case("Up 2 minutes", false, None)]
#[case("Restarting (1) 5 seconds ago", false, None)]
fn terminal_classification(
    #[case] status: &str,
    #[case] terminal: bool,
    #[case] code: Option<i32>,
) {
    assert_eq!(is_terminal_status(status), terminal, "{status}");
    assert_eq!(exit_code_of(status), code, "{status}");
}

#[rstest]
fn counts_split_services_by_outcome() {
    let status = ComposeStatus::from_services(vec![
        ServiceStatus::new("web", "shop-web-1", "Up 1 minute", ""),
        ServiceStatus::new("migrate", "shop-migrate-1", "Exited (0) 1 minute ago", ""),
        ServiceStatus::new("worker", "shop-worker-1", "Exited (3) 1 minute ago", ""),
        ServiceStatus::new("cache", "shop-cache-1", "Created", ""),
    ]);
    assert_eq!(status.total, 4);
    assert_eq!(status.healthy, 1);
    assert_eq!(status.failed, 1);
    assert_eq!(status.unhealthy, 1);
    assert!(!status.is_stable());
    assert_eq!(
        status.service("worker").map(|service| service.detail.as_str()),
        Some("exited with code 3")
    );
}

#[rstest]
fn empty_status_is_never_stable() {
    assert!(!ComposeStatus::default().is_stable());
}

#[rstest]
#[case("0.0.0.0:8080->80/tcp", "10.0.0.5", Some("http://10.0.0.5:8080"))]
#[case("[::]:9000->9000/tcp", "10.0.0.5", Some("http://10.0.0.5:9000"))]
#[case(":::3000->3000/tcp", "2001:db8::2", Some("http://[2001:db8::2]:3000"))]
#[case("127.0.0.1:5432->5432/tcp", "10.0.0.5", Some("http://127.0.0.1:5432"))]
#[case("0.0.0.0:8000-8001->8000-8001/tcp", "h", Some("http://h:8000"))]
#[case("80/tcp", "10.0.0.5", None)]
#[case("", "10.0.0.5", None)]
fn urls_come_from_first_published_port(
    #[case] ports: &str,
    #[case] host: &str,
    #[case] expected: Option<&str>,
) {
    assert_eq!(published_url(ports, host).as_deref(), expected);
}

#[rstest]
fn deployment_status_serialises_with_urls() {
    let status = ComposeStatus::from_services(parse_formatted(
        "shop-web-1\tweb\tUp 1 minute\t0.0.0.0:8080->80/tcp\nshop-db-1\tdb\tUp 1 minute\t5432/tcp\n",
    ));
    let deployment = DeploymentStatus::new("203.0.113.9", Some(String::from("shop")), &status);

    assert!(deployment.health.all_healthy);
    assert_eq!(
        deployment.urls.get("web").map(String::as_str),
        Some("http://203.0.113.9:8080")
    );
    assert!(!deployment.urls.contains_key("db"));

    let json = serde_json::to_value(&deployment).expect("serialise");
    assert_eq!(json["health"]["total"], 2);
    assert_eq!(json["urls"]["web"], "http://203.0.113.9:8080");
}

#[rstest]
fn target_renders_files_and_escapes_arguments() {
    let target = ComposeTarget {
        compose_files: vec![String::from("compose.yaml"), String::from("compose prod.yaml")],
        ..ComposeTarget::default()
    };
    assert_eq!(
        target.command(&["ps", "-a", "--format", super::parse::PS_FORMAT]),
        "docker compose -f compose.yaml -f 'compose prod.yaml' ps -a --format \
         '{{.Name}}\\t{{.Service}}\\t{{.Status}}\\t{{.Ports}}'"
    );
}

#[rstest]
#[tokio::test]
async fn collector_prefers_formatted_listing(target: ComposeTarget) {
    let executor = ScriptedExecutor::new();
    executor.push_stdout("shop-web-1\tweb\tUp 1 minute\t\n");
    let collector = StatusCollector::new(&executor, target);

    let status = collector
        .collect(&CancellationToken::new())
        .await
        .expect("collect");

    assert_eq!(status.total, 1);
    let commands = executor.commands();
    assert_eq!(commands.len(), 1);
    assert!(
        commands
            .first()
            .is_some_and(|command| command.starts_with("cd /srv/shop && docker compose -p shop ps -a --format")),
        "{commands:?}"
    );
}

#[rstest]
#[tokio::test]
async fn collector_falls_back_to_table_when_formatted_fails(target: ComposeTarget) {
    let executor = ScriptedExecutor::new();
    executor.push_result(1, "unknown flag: --format");
    executor.push_stdout(TABLE);
    let collector = StatusCollector::new(&executor, target);

    let status = collector
        .collect(&CancellationToken::new())
        .await
        .expect("collect");

    assert_eq!(status.total, 3);
    assert_eq!(
        executor.commands().last().map(String::as_str),
        Some("cd /srv/shop && docker compose -p shop ps -a")
    );
}

#[rstest]
#[tokio::test]
async fn collector_falls_back_when_formatted_output_is_empty(target: ComposeTarget) {
    let executor = ScriptedExecutor::new();
    executor.push_stdout("");
    executor.push_stdout(TABLE);
    let collector = StatusCollector::new(&executor, target);

    let status = collector
        .collect(&CancellationToken::new())
        .await
        .expect("collect");

    assert_eq!(status.total, 3);
}

#[rstest]
#[tokio::test]
async fn failing_table_listing_yields_empty_status(target: ComposeTarget) {
    let executor = ScriptedExecutor::new();
    executor.push_result(1, "");
    executor.push_result(14, "no configuration file provided");
    let collector = StatusCollector::new(&executor, target);

    let status = collector
        .collect(&CancellationToken::new())
        .await
        .expect("collect");

    assert_eq!(status, ComposeStatus::default());
}

#[rstest]
#[tokio::test]
async fn transport_errors_propagate(target: ComposeTarget) {
    let executor = ScriptedExecutor::new();
    executor.push_error(TransportError::NotConnected);
    let collector = StatusCollector::new(&executor, target);

    let err = collector
        .collect(&CancellationToken::new())
        .await
        .expect_err("transport failure should surface");

    assert_eq!(err, TransportError::NotConnected);
}
