//! Tests for the persistent shell transport, driven by a local `sh` standing
//! in for the remote end.

use super::*;
use crate::test_support::ScriptedRunner;
use crate::transport::{Credential, Session, TransportKind};
use rstest::{fixture, rstest};
use std::sync::Arc;

#[fixture]
fn context() -> ConnectionContext {
    ConnectionContext::new("localhost", "tester").with_connect_timeout(Duration::from_secs(5))
}

fn options(read_timeout: Duration) -> SessionOptions {
    SessionOptions {
        read_timeout,
        ..SessionOptions::default()
    }
}

async fn local_shell(
    context: ConnectionContext,
    read_timeout: Duration,
) -> PersistentSession<ScriptedRunner> {
    PersistentSession::launch(
        "sh",
        &[],
        context,
        options(read_timeout),
        ScriptedRunner::new(),
        PreparedCredential::prepare(&Credential::Agent).expect("agent credential"),
        &CancellationToken::new(),
    )
    .await
    .expect("local shell should start")
}

#[rstest]
#[tokio::test]
async fn executes_commands_and_reports_exit_codes(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_secs(5)).await;
    let cancel = CancellationToken::new();

    let ok = shell.execute("echo hello", &cancel).await.expect("echo");
    assert_eq!(ok.exit_code, 0);
    assert_eq!(ok.stdout, "hello\n");
    assert!(ok.stderr.is_empty());

    let failed = shell.execute("exit 1", &cancel).await.expect("exit 1");
    assert_eq!(failed.exit_code, 1);
    assert_eq!(failed.stdout, "");

    let merged = shell
        .execute("echo out; echo err 1>&2; exit 7", &cancel)
        .await
        .expect("merged streams");
    assert_eq!(merged.exit_code, 7);
    assert_eq!(merged.stdout, "out\nerr\n");

    assert!(shell.is_connected(), "non-zero exits must not end the session");
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn shell_state_survives_between_commands_but_subshell_changes_do_not(
    context: ConnectionContext,
) {
    let shell = local_shell(context, Duration::from_secs(5)).await;
    let cancel = CancellationToken::new();

    shell.execute("cd /", &cancel).await.expect("cd");
    let pwd = shell.execute("pwd", &cancel).await.expect("pwd");
    assert_ne!(pwd.stdout, "/\n", "cd runs in a subshell");
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn marker_lookalikes_are_returned_as_output(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_secs(5)).await;
    let line = format!("prefix {END_MARKER} suffix");

    let result = shell
        .execute(&format!("echo '{line}'"), &CancellationToken::new())
        .await
        .expect("execute");

    assert_eq!(result.stdout, format!("{line}\n"));
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn stdin_readers_do_not_swallow_the_next_command(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_millis(500)).await;
    let cancel = CancellationToken::new();

    let reader = shell
        .execute("read line; echo \"got[$line]\"", &cancel)
        .await
        .expect("stdin reader should see end of input");
    assert_eq!(reader.stdout, "got[]\n");

    let drained = shell.execute("cat", &cancel).await.expect("cat");
    assert_eq!(drained.stdout, "");

    let second = shell.execute("echo second", &cancel).await.expect("second");
    assert_eq!(second.stdout, "second\n");
    let third = shell.execute("echo third", &cancel).await.expect("third");
    assert_eq!(third.stdout, "third\n");
    assert!(shell.is_connected());
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn repeated_read_only_commands_return_identical_results(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_secs(5)).await;
    let cancel = CancellationToken::new();
    let command = "printf 'web\\tUp 2 minutes\\n'; echo warn 1>&2; exit 3";

    let first = shell.execute(command, &cancel).await.expect("first run");
    let second = shell.execute(command, &cancel).await.expect("second run");

    assert_eq!(first, second);
    assert_eq!(first.exit_code, 3);
    assert_eq!(first.stdout, "web\tUp 2 minutes\nwarn\n");
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn concurrent_callers_are_serialised(context: ConnectionContext) {
    let shell = Arc::new(local_shell(context, Duration::from_secs(5)).await);
    let tasks: Vec<_> = (0..8)
        .map(|index| {
            let shell = Arc::clone(&shell);
            tokio::spawn(async move {
                let command = format!("echo start-{index}; sleep 0.05; echo end-{index}");
                let result = shell
                    .execute(&command, &CancellationToken::new())
                    .await
                    .expect("execute");
                (index, result)
            })
        })
        .collect();

    for task in tasks {
        let (index, result) = task.await.expect("join");
        assert_eq!(result.stdout, format!("start-{index}\nend-{index}\n"));
    }
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn cancelled_command_does_not_corrupt_the_next_one(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_secs(5)).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = shell
        .execute("echo early; sleep 0.5; echo late", &cancel)
        .await
        .expect_err("command should be cancelled");
    assert_eq!(err, TransportError::Cancelled);
    assert!(shell.is_connected());

    let next = shell
        .execute("echo next", &CancellationToken::new())
        .await
        .expect("session should recover");
    assert_eq!(next.stdout, "next\n");
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn read_timeout_is_recoverable(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_millis(200)).await;

    let err = shell
        .execute("sleep 0.6; echo slow", &CancellationToken::new())
        .await
        .expect_err("silent command should time out");
    assert_eq!(
        err,
        TransportError::ReadTimeout {
            timeout: Duration::from_millis(200)
        }
    );
    assert!(err.to_string().contains("200ms"), "{err}");
    assert!(shell.is_connected());

    // The abandoned frame arrives well within one read window of the next
    // call's resynchronisation, so the session recovers.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let next = shell
        .execute("echo fresh", &CancellationToken::new())
        .await
        .expect("session should recover after the slow command finishes");
    assert_eq!(next.stdout, "fresh\n");
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn shell_exit_mid_command_is_fatal(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_secs(5)).await;

    let err = shell
        .execute("kill -9 $$", &CancellationToken::new())
        .await
        .expect_err("killing the shell should desynchronise");

    assert!(matches!(err, TransportError::Desynchronized { .. }), "{err:?}");
    assert!(!shell.is_connected());
    let after = shell
        .execute("true", &CancellationToken::new())
        .await
        .expect_err("session is unusable");
    assert_eq!(after, TransportError::NotConnected);
}

#[rstest]
#[tokio::test]
async fn silent_endpoint_fails_readiness_within_connect_timeout() {
    let context = ConnectionContext::new("localhost", "tester")
        .with_connect_timeout(Duration::from_millis(300));
    let args = [
        OsString::from("-c"),
        OsString::from("echo 'Permission denied' 1>&2; sleep 5"),
    ];
    let started = tokio::time::Instant::now();

    let err = PersistentSession::launch(
        "sh",
        &args,
        context,
        SessionOptions::default(),
        ScriptedRunner::new(),
        PreparedCredential::prepare(&Credential::Agent).expect("agent credential"),
        &CancellationToken::new(),
    )
    .await
    .expect_err("readiness should time out");

    assert!(started.elapsed() < Duration::from_secs(3), "must not hang");
    let TransportError::Connect { message, .. } = err else {
        panic!("expected Connect error, got {err:?}");
    };
    assert!(message.contains("did not answer"), "{message}");
}

#[rstest]
#[tokio::test]
async fn endpoint_exiting_early_reports_stderr() {
    let args = [
        OsString::from("-c"),
        OsString::from("echo 'Host key verification failed.' 1>&2; exit 255"),
    ];

    let err = PersistentSession::launch(
        "sh",
        &args,
        ConnectionContext::new("localhost", "tester"),
        SessionOptions::default(),
        ScriptedRunner::new(),
        PreparedCredential::prepare(&Credential::Agent).expect("agent credential"),
        &CancellationToken::new(),
    )
    .await
    .expect_err("exited endpoint cannot become ready");

    let TransportError::Connect { message, .. } = err else {
        panic!("expected Connect error, got {err:?}");
    };
    assert!(message.contains("Host key verification failed"), "{message}");
}

#[rstest]
#[tokio::test]
async fn disconnect_stops_the_shell(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_secs(5)).await;
    shell.disconnect().await;

    assert!(!shell.is_connected());
    let err = shell
        .execute("true", &CancellationToken::new())
        .await
        .expect_err("disconnected session must refuse work");
    assert_eq!(err, TransportError::NotConnected);
}

#[rstest]
#[tokio::test]
async fn uploads_go_through_scp(context: ConnectionContext) {
    let shell = local_shell(context, Duration::from_secs(5)).await;
    shell.runner.push_success();

    let receipt = shell
        .upload(
            Utf8Path::new("compose.yaml"),
            "/srv/app/compose.yaml",
            &CancellationToken::new(),
        )
        .await
        .expect("upload");

    assert_eq!(receipt.remote, "/srv/app/compose.yaml");
    let invocation = shell.runner.invocations().pop().expect("scp invocation");
    assert_eq!(invocation.program, "scp");
    assert!(!invocation.command_string().contains("ControlPath"));
    shell.disconnect().await;
}

#[rstest]
#[tokio::test]
async fn session_delegates_and_checks_exit_status(context: ConnectionContext) {
    let session = Session::Persistent(local_shell(context, Duration::from_secs(5)).await);
    let cancel = CancellationToken::new();

    assert_eq!(session.kind(), TransportKind::Persistent);
    assert_eq!(session.context().username, "tester");

    let ok = session
        .execute_checked("echo ready", &cancel)
        .await
        .expect("successful command");
    assert_eq!(ok.stdout, "ready\n");

    let err = session
        .execute_checked("echo nope; exit 4", &cancel)
        .await
        .expect_err("non-zero exit should fail");
    assert_eq!(
        err,
        TransportError::CommandFailed {
            command: String::from("echo nope; exit 4"),
            exit_code: 4,
            output: String::from("nope"),
        }
    );

    session.disconnect().await;
    assert!(!session.is_connected());
}
