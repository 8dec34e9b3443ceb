//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_every_subcommand() {
    let mut cmd = cargo_bin_cmd!("skiff");
    let lists_all = ["upload", "download", "status", "wait", "logs", "token"]
        .into_iter()
        .fold(predicate::str::contains("exec").boxed(), |acc, subcommand| {
            acc.and(predicate::str::contains(subcommand)).boxed()
        });
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(lists_all.from_utf8());
}

#[test]
fn exec_without_host_reports_actionable_config_error() {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.env_remove("SKIFF_SSH_HOST")
        .args(["exec", "--", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("SKIFF_SSH_HOST"))
        .stderr(predicate::str::contains("skiff.toml"));
}

#[test]
fn exec_rejects_control_characters_before_connecting() {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.args(["--host", "203.0.113.1", "exec", "--", "echo\nrm"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("control characters"));
}

#[test]
fn unknown_transport_is_rejected_before_connecting() {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.env_remove("SKIFF_SSH_TRANSPORT")
        .args([
            "--host",
            "203.0.113.1",
            "--transport",
            "carrier-pigeon",
            "exec",
            "--",
            "true",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("SKIFF_SSH_TRANSPORT"));
}

#[test]
fn invalid_token_pattern_is_a_usage_error() {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.args(["--host", "203.0.113.1", "token", "--pattern", "(", "notebook"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid token pattern"));
}
