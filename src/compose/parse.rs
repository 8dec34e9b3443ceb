//! Pure parsers for `docker compose ps` output and status classification.
//!
//! Nothing here fails: lines that cannot be understood are skipped so one odd
//! line never hides the rest of the listing.

use std::sync::LazyLock;

use regex::Regex;

use super::ServiceStatus;

/// Go template requesting tab-separated fields from `docker compose ps`.
pub const PS_FORMAT: &str = "{{.Name}}\\t{{.Service}}\\t{{.Status}}\\t{{.Ports}}";

/// Leading words that identify the status column of the table listing.
pub const STATUS_KEYWORDS: [&str; 7] = [
    "Up",
    "Exited",
    "Exit",
    "Restarting",
    "Dead",
    "Created",
    "Paused",
];

const HEALTHY_WORDS: [&str; 3] = ["up", "running", "healthy"];
const TERMINAL_WORDS: [&str; 4] = ["exited", "dead", "stopped", "killed"];
const MIN_FORMATTED_FIELDS: usize = 3;

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static PORT_MAPPING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\d{1,3}(?:\.\d{1,3}){3}|\[[0-9A-Fa-f:]*\]|::):\d+(?:-\d+)?->\d+(?:-\d+)?/\w+",
    )
    .expect("port mapping pattern is valid")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static PUBLISHED_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3}|\[[0-9A-Fa-f:]*\]|::):(\d+)(?:-\d+)?->")
        .expect("published port pattern is valid")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static EXIT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bexit(?:ed)?\b\s*(?:code\s*)?[(:=]?\s*(-?\d+)")
        .expect("exit code pattern is valid")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static COLUMN_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("column gap pattern is valid"));

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static REPLICA_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_]\d+$").expect("replica suffix pattern is valid"));

/// Parses output produced with [`PS_FORMAT`].
///
/// Fields are separated by tabs; some compose versions print the template's
/// `\t` literally, so a backslash-t separator is accepted too. Lines with
/// fewer than three fields are dropped.
///
/// # Examples
///
/// ```
/// use skiff::compose::parse::parse_formatted;
///
/// let services = parse_formatted("web-1\tweb\tUp 2 minutes\t0.0.0.0:8080->80/tcp\n");
/// assert_eq!(services.len(), 1);
/// assert_eq!(services[0].name, "web");
/// assert!(services[0].healthy);
/// assert!(!services[0].terminal);
/// assert_eq!(services[0].ports, "0.0.0.0:8080->80/tcp");
/// ```
#[must_use]
pub fn parse_formatted(text: &str) -> Vec<ServiceStatus> {
    text.lines().filter_map(parse_formatted_line).collect()
}

fn parse_formatted_line(raw: &str) -> Option<ServiceStatus> {
    let line = raw.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }
    let fields: Vec<&str> = if line.contains('\t') {
        line.split('\t').map(str::trim).collect()
    } else {
        line.split("\\t").map(str::trim).collect()
    };
    if fields.len() < MIN_FORMATTED_FIELDS {
        return None;
    }
    let [container, service, status, rest @ ..] = fields.as_slice() else {
        return None;
    };
    let name = if service.is_empty() {
        derive_service_name(container, None)
    } else {
        (*service).to_owned()
    };
    let ports = rest.first().copied().unwrap_or_default();
    Some(ServiceStatus::new(name, *container, *status, ports))
}

/// Parses the default table printed by `docker compose ps -a`.
///
/// The service name is derived from the container name, the status from the
/// column starting with one of [`STATUS_KEYWORDS`], and the ports from every
/// `address:port->port/proto` fragment on the line. Header, separator and
/// unrecognisable lines are skipped.
#[must_use]
pub fn parse_table(text: &str, project_name: Option<&str>) -> Vec<ServiceStatus> {
    text.lines()
        .filter_map(|line| parse_table_line(line, project_name))
        .collect()
}

fn parse_table_line(raw: &str, project_name: Option<&str>) -> Option<ServiceStatus> {
    let line = raw.trim_end_matches('\r').trim();
    if line.is_empty() || is_header(line) {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let container = tokens.next()?;
    tokens.next()?;
    let status = status_column(line)?;
    let ports = PORT_MAPPING
        .find_iter(line)
        .map(|found| found.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Some(ServiceStatus::new(
        derive_service_name(container, project_name),
        container,
        status,
        ports,
    ))
}

fn is_header(line: &str) -> bool {
    line.starts_with("NAME")
        || line.starts_with("Name")
        || line.chars().all(|ch| ch == '-' || ch.is_whitespace())
}

fn starts_with_keyword(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .is_some_and(|word| STATUS_KEYWORDS.contains(&word))
}

fn status_column(line: &str) -> Option<String> {
    if let Some(column) = COLUMN_GAP
        .split(line)
        .skip(1)
        .find(|column| starts_with_keyword(column))
    {
        return Some(column.trim().to_owned());
    }

    // Single-space separated output: scan tokens instead of columns.
    let tokens: Vec<&str> = line.split_whitespace().skip(1).collect();
    let start = tokens
        .iter()
        .position(|token| STATUS_KEYWORDS.contains(token))?;
    let status: Vec<&str> = tokens
        .iter()
        .skip(start)
        .take_while(|token| !token.contains("->"))
        .copied()
        .collect();
    Some(status.join(" "))
}

/// Recovers the service name from a container name such as `shop-web-1`.
///
/// The trailing replica index is dropped, then the project prefix: the
/// given `project_name` when it matches, otherwise the first `-`/`_`
/// separated token.
#[must_use]
pub fn derive_service_name(container: &str, project_name: Option<&str>) -> String {
    let without_replica = REPLICA_SUFFIX.replace(container, "");
    let base = without_replica.as_ref();

    if let Some(project) = project_name.filter(|project| !project.is_empty())
        && let Some(rest) = base.strip_prefix(project)
        && let Some(service) = rest.strip_prefix(['-', '_'])
        && !service.is_empty()
    {
        return service.to_owned();
    }

    match base.split_once(['-', '_']) {
        Some((_, service)) if !service.is_empty() => service.to_owned(),
        _ => base.to_owned(),
    }
}

/// `up`, `running` or `healthy` appears in the status, ignoring case.
///
/// The check is deliberately literal: `Up 5 minutes (unhealthy)` counts as
/// healthy because the container is up.
#[must_use]
pub fn is_healthy_status(status: &str) -> bool {
    let lowered = status.to_lowercase();
    HEALTHY_WORDS.iter().any(|word| lowered.contains(word))
}

/// The status says the container stopped, or carries an exit code.
#[must_use]
pub fn is_terminal_status(status: &str) -> bool {
    let lowered = status.to_lowercase();
    TERMINAL_WORDS.iter().any(|word| lowered.contains(word)) || exit_code_of(status).is_some()
}

/// Extracts the exit code from `Exited (1)`, `exit 0`, `exit code 2`, etc.
#[must_use]
pub fn exit_code_of(status: &str) -> Option<i32> {
    EXIT_CODE
        .captures(status)
        .and_then(|captures| captures.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

/// The status carries exit code zero.
#[must_use]
pub fn is_successful_exit(status: &str) -> bool {
    exit_code_of(status) == Some(0)
}

/// URL of the first published port in `ports`.
///
/// Wildcard binds (`0.0.0.0`, `::`, `[::]`) are reachable through `host`;
/// other bind addresses are kept.
///
/// # Examples
///
/// ```
/// use skiff::compose::parse::published_url;
///
/// assert_eq!(
///     published_url("0.0.0.0:8080->80/tcp, :::8080->80/tcp", "203.0.113.7"),
///     Some(String::from("http://203.0.113.7:8080")),
/// );
/// assert_eq!(published_url("80/tcp", "203.0.113.7"), None);
/// ```
#[must_use]
pub fn published_url(ports: &str, host: &str) -> Option<String> {
    let captures = PUBLISHED_PORT.captures(ports)?;
    let address = captures.get(1)?.as_str();
    let port = captures.get(2)?.as_str();
    let authority = match address {
        "0.0.0.0" | "::" | "[::]" if host.contains(':') => format!("[{host}]"),
        "0.0.0.0" | "::" | "[::]" => host.to_owned(),
        other => other.to_owned(),
    };
    Some(format!("http://{authority}:{port}"))
}
